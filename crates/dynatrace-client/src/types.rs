//! API Payloads

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dynatrace event types the receiver can push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    AvailabilityEvent,
    CustomAlert,
    CustomInfo,
    /// Opens a problem on the attached entity
    ErrorEvent,
    PerformanceEvent,
    ResourceContentionEvent,
}

/// Entities an event is attached to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRules {
    pub entity_ids: Vec<String>,
}

/// Event pushed through `POST /api/v1/events`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCreation {
    pub event_type: EventType,
    /// Start time in epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// End time in epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    /// Minutes until Dynatrace considers the event over unless re-sent
    #[serde(default)]
    pub timeout_minutes: u32,
    pub attach_rules: AttachRules,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_davis_merge: bool,
}

/// Identifiers Dynatrace assigned to a pushed event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventStoreResult {
    pub stored_event_ids: Vec<i64>,
    pub stored_ids: Vec<String>,
    pub stored_correlation_ids: Vec<String>,
}

/// Custom device push message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomDevice {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

/// Answer to a custom device push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomDeviceResponse {
    pub entity_id: String,
    pub group_id: Option<String>,
}

/// One piece of evidence attached to a problem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Evidence {
    /// Human readable name, carries the event title for event evidence
    pub display_name: String,
    pub evidence_type: Option<String>,
}

/// Evidence section of a problem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvidenceDetails {
    pub total_count: u32,
    pub details: Vec<Evidence>,
}

/// Problem as returned by `GET /api/v2/problems`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Problem {
    pub problem_id: String,
    pub display_id: String,
    pub title: String,
    pub status: String,
    pub evidence_details: EvidenceDetails,
}

impl Problem {
    /// First evidence whose display name contains `token`
    pub fn evidence_containing(&self, token: &str) -> Option<&Evidence> {
        self.evidence_details
            .details
            .iter()
            .find(|evidence| evidence.display_name.contains(token))
    }
}

/// One page of problems
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemList {
    pub total_count: u64,
    pub next_page_key: Option<String>,
    pub problems: Vec<Problem>,
}

/// Entity tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Tag {
    /// Key/value tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// Answer to a tag request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagResponse {
    pub matched_entities_count: u64,
    pub applied_tags: Vec<Tag>,
}
