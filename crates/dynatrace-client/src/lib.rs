//! Dynatrace API Client
//!
//! The subset of the Dynatrace environment API the receiver talks to:
//! custom device registration, event ingestion, open problem listing,
//! problem closing, entity tagging and entity lookup.

mod client;
mod error;
#[cfg(feature = "mock")]
mod mock;
mod types;

pub use client::{ClientConfig, DynatraceClient};
pub use error::DynatraceError;
#[cfg(feature = "mock")]
pub use mock::{MockDynatrace, MockState};
pub use types::{
    AttachRules, CustomDevice, CustomDeviceResponse, EventCreation, EventStoreResult, EventType,
    Evidence, EvidenceDetails, Problem, ProblemList, Tag, TagResponse,
};

use async_trait::async_trait;

/// Operations the receiver needs from a Dynatrace environment
#[async_trait]
pub trait DynatraceApi: Send + Sync {
    /// Create (or update) the custom device pushed under `custom_device_id`
    async fn create_custom_device(
        &self,
        custom_device_id: &str,
        device: &CustomDevice,
    ) -> Result<CustomDeviceResponse, DynatraceError>;

    /// Push an event attached to the entities in its attach rules
    async fn create_event(&self, event: &EventCreation) -> Result<EventStoreResult, DynatraceError>;

    /// List every open problem together with its evidence details
    async fn list_open_problems(&self) -> Result<Vec<Problem>, DynatraceError>;

    /// Close a problem, leaving `message` as the closing comment
    async fn close_problem(&self, problem_id: &str, message: &str) -> Result<(), DynatraceError>;

    /// Apply tags to every entity matching `entity_selector`
    async fn apply_tags(
        &self,
        entity_selector: &str,
        tags: &[Tag],
    ) -> Result<TagResponse, DynatraceError>;

    /// Display name of an entity
    async fn entity_display_name(&self, entity_id: &str) -> Result<String, DynatraceError>;
}
