//! Notification lifecycle and quota control engine.
//!
//! `domain` holds the entities, ports and services; `outbound` holds the
//! PostgreSQL, Redis and id adapters that implement the driven ports.

pub mod config;
pub mod domain;
pub mod outbound;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
