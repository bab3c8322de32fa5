//! Monitoring loop and notification scheduling.
//!
//! The `MonitorService` polls margin readings on a fixed interval and drives
//! card creation, escalation and resolution. The `NotificationPolicy` is a
//! pure function of card timestamps deciding when a reminder is due.

mod scheduler;
mod service;

pub use scheduler::NotificationPolicy;
pub use service::{IgnoreWindow, MonitorService, MonitoringStatus, StartOutcome};
