//! Intake services: direct sends and the prepare/commit/cancel protocol,
//! both built on the lifecycle engine's driving port.

mod service;
mod transactional;

pub use service::NotificationIntakeService;
