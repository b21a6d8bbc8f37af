//! Incident Cache Maintenance
//!
//! Background jobs that keep the incident cache in step with Dynatrace:
//! problem ID reconciliation, periodic event resend and expiry of stale
//! incidents.

mod jobs;
mod scheduler;

pub use jobs::{IncidentJobs, ResendReport};
pub use scheduler::{JobConfig, JobScheduler};
