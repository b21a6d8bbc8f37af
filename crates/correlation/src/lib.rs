//! Alert Correlation
//!
//! Maps Alertmanager notifications onto Dynatrace custom devices, events
//! and problems, and keeps the local incident cache consistent with the
//! problems Dynatrace eventually opens.

mod alert;
mod controller;
mod devices;
mod error;
mod incidents;
mod reconcile;
mod summary;
mod tags;

pub use alert::{short_hash, Alert, AlertGroup, AlertStatus};
pub use controller::{close_comment, Controller, ControllerConfig, Outcome};
pub use devices::{
    legacy_device_migration, CustomDeviceRecord, DeviceCache, DeviceRegistry, DEVICE_CACHE_FILE,
};
pub use error::CorrelationError;
pub use incidents::{
    open_incident_store, IncidentCache, IncidentRecord, IncidentStore, INCIDENT_CACHE_FILE,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use summary::{BatchSummary, DEFAULT_TITLE, EVENT_SOURCE};
pub use tags::{apply_tags_with_retry, entity_selector, spawn_tag_task, TagPolicy};
