//! In-memory Dynatrace stand-in
//!
//! Records every call and answers from configurable state, so the
//! correlation logic can be exercised without an environment.

use crate::error::DynatraceError;
use crate::types::{
    CustomDevice, CustomDeviceResponse, EventCreation, EventStoreResult, Evidence,
    EvidenceDetails, Problem, Tag, TagResponse,
};
use crate::DynatraceApi;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Calls seen and canned answers of a [`MockDynatrace`]
#[derive(Debug, Default)]
pub struct MockState {
    /// `(custom device id, push message)` per create call
    pub created_devices: Vec<(String, CustomDevice)>,
    /// Every event pushed
    pub events: Vec<EventCreation>,
    /// `(problem id, comment)` per close call
    pub closed_problems: Vec<(String, String)>,
    /// `(selector, tags)` per tag call
    pub tag_requests: Vec<(String, Vec<Tag>)>,
    /// Number of open problem listings
    pub problem_listings: usize,
    /// Problems returned by listings
    pub open_problems: Vec<Problem>,
    /// Display names returned by entity lookups
    pub entity_names: HashMap<String, String>,
    /// Entities matched by tag requests
    pub tag_matches: u64,
    /// Time a custom device creation takes
    pub device_creation_delay: Duration,
    pub fail_device_creation: bool,
    pub fail_events: bool,
    pub fail_close: bool,
    pub fail_listing: bool,
}

/// Mock implementation of [`DynatraceApi`]
#[derive(Debug, Default)]
pub struct MockDynatrace {
    state: Mutex<MockState>,
}

impl MockDynatrace {
    /// Create a mock that accepts every call
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the recorded calls and canned answers
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the calls it recorded
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an open problem whose single event evidence is named `evidence_name`
    pub fn add_open_problem(&self, problem_id: &str, evidence_name: &str) {
        self.state().open_problems.push(Problem {
            problem_id: problem_id.to_string(),
            display_id: format!("P-{}", problem_id),
            title: evidence_name.to_string(),
            status: "OPEN".to_string(),
            evidence_details: EvidenceDetails {
                total_count: 1,
                details: vec![Evidence {
                    display_name: evidence_name.to_string(),
                    evidence_type: Some("EVENT".to_string()),
                }],
            },
        });
    }

    fn unavailable(operation: &'static str) -> DynatraceError {
        DynatraceError::Http {
            operation,
            status: 503,
            body: "mock failure".to_string(),
        }
    }
}

#[async_trait]
impl DynatraceApi for MockDynatrace {
    async fn create_custom_device(
        &self,
        custom_device_id: &str,
        device: &CustomDevice,
    ) -> Result<CustomDeviceResponse, DynatraceError> {
        let delay = self.state().device_creation_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_device_creation {
            return Err(Self::unavailable("create custom device"));
        }
        state
            .created_devices
            .push((custom_device_id.to_string(), device.clone()));
        Ok(CustomDeviceResponse {
            entity_id: format!("CUSTOM_DEVICE-{:016X}", state.created_devices.len()),
            group_id: None,
        })
    }

    async fn create_event(&self, event: &EventCreation) -> Result<EventStoreResult, DynatraceError> {
        let mut state = self.state();
        if state.fail_events {
            return Err(Self::unavailable("create event"));
        }
        state.events.push(event.clone());
        let n = state.events.len();
        Ok(EventStoreResult {
            stored_event_ids: vec![n as i64],
            stored_ids: vec![format!("stored-{}", n)],
            stored_correlation_ids: vec![format!("correlation-{}", n)],
        })
    }

    async fn list_open_problems(&self) -> Result<Vec<Problem>, DynatraceError> {
        let mut state = self.state();
        state.problem_listings += 1;
        if state.fail_listing {
            return Err(Self::unavailable("list problems"));
        }
        Ok(state.open_problems.clone())
    }

    async fn close_problem(&self, problem_id: &str, message: &str) -> Result<(), DynatraceError> {
        let mut state = self.state();
        if state.fail_close {
            return Err(Self::unavailable("close problem"));
        }
        state
            .closed_problems
            .push((problem_id.to_string(), message.to_string()));
        state.open_problems.retain(|p| p.problem_id != problem_id);
        Ok(())
    }

    async fn apply_tags(
        &self,
        entity_selector: &str,
        tags: &[Tag],
    ) -> Result<TagResponse, DynatraceError> {
        let mut state = self.state();
        state
            .tag_requests
            .push((entity_selector.to_string(), tags.to_vec()));
        Ok(TagResponse {
            matched_entities_count: state.tag_matches,
            applied_tags: tags.to_vec(),
        })
    }

    async fn entity_display_name(&self, entity_id: &str) -> Result<String, DynatraceError> {
        self.state()
            .entity_names
            .get(entity_id)
            .cloned()
            .ok_or(DynatraceError::Http {
                operation: "get entity",
                status: 404,
                body: format!("{} not found", entity_id),
            })
    }
}
