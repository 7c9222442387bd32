//! Outbound adapters implementing the driven ports.
//!
//! - **persistence**: PostgreSQL notification and callback log store (Diesel)
//! - **cache**: Redis quota counters (bb8-redis, Lua scripts)
//! - **id**: time-ordered notification id generator
//!
//! Adapters translate between domain types and infrastructure
//! representations and contain no lifecycle logic.

pub mod cache;
pub mod id;
pub mod persistence;
