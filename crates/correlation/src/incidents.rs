//! Incident Cache
//!
//! Tracks every incident-worthy event sent to Dynatrace under its
//! correlation hash until the matching problem is closed or the entry expires.

use crate::alert::AlertGroup;
use chrono::{DateTime, Utc};
use dynatrace_client::{EventCreation, EventStoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use storage::{JsonStore, Snapshot};

/// File name of the incident cache inside the cache directory
pub const INCIDENT_CACHE_FILE: &str = "problems.json";

/// Store holding the [`IncidentCache`]
pub type IncidentStore = JsonStore<IncidentCache>;

/// Open the incident cache in `dir`
pub fn open_incident_store(dir: &Path) -> IncidentStore {
    JsonStore::new(dir.join(INCIDENT_CACHE_FILE))
}

/// An event sent to Dynatrace that is expected to open a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    /// Event as it was pushed, re-sent by the resend job
    pub event: EventCreation,
    /// Alert batch that produced the event
    pub alert: AlertGroup,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub event_store_result: EventStoreResult,
    /// Evidence name that matched during reconciliation
    #[serde(default)]
    pub correlation_token: String,
    /// Dynatrace problem, empty until reconciliation finds it
    #[serde(default, rename = "problemID")]
    pub problem_id: String,
}

impl IncidentRecord {
    /// Create an unresolved record for a freshly sent event
    pub fn new(event: EventCreation, alert: AlertGroup, result: EventStoreResult) -> Self {
        Self {
            event,
            alert,
            created_at: Utc::now(),
            event_store_result: result,
            correlation_token: String::new(),
            problem_id: String::new(),
        }
    }

    /// Whether the Dynatrace problem for this incident is known
    pub fn is_resolved(&self) -> bool {
        !self.problem_id.is_empty()
    }
}

/// Snapshot persisted in `problems.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCache {
    /// Records keyed by correlation hash
    #[serde(default)]
    pub problems: BTreeMap<String, IncidentRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl IncidentCache {
    /// Hashes still waiting for a problem ID
    pub fn unresolved(&self) -> Vec<String> {
        self.problems
            .iter()
            .filter(|(_, record)| !record.is_resolved())
            .map(|(hash, _)| hash.clone())
            .collect()
    }
}

impl Snapshot for IncidentCache {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_schema_record_loads_with_defaults() {
        let body = r#"{
            "problems": {
                "0a1b2c3d4e5f6071": {
                    "event": {
                        "eventType": "ERROR_EVENT",
                        "attachRules": {"entityIds": ["CUSTOM_DEVICE-EBFD2154C71FC3F7"]},
                        "title": "TargetDown (critical) [0a1b2c3d4e5f6071]"
                    },
                    "alert": {"status": "firing", "groupKey": "{}:{}"}
                }
            },
            "lastUpdated": "2021-03-19T01:35:45Z"
        }"#;

        let cache: IncidentCache = serde_json::from_str(body).unwrap();
        let record = &cache.problems["0a1b2c3d4e5f6071"];
        assert!(!record.is_resolved());
        assert!(record.correlation_token.is_empty());
        assert!(record.event_store_result.stored_correlation_ids.is_empty());
        assert_eq!(cache.unresolved(), vec!["0a1b2c3d4e5f6071".to_string()]);
    }

    #[test]
    fn test_problem_id_uses_legacy_field_name() {
        let mut cache = IncidentCache::default();
        let event: EventCreation = serde_json::from_value(serde_json::json!({
            "eventType": "ERROR_EVENT",
            "attachRules": {"entityIds": []}
        }))
        .unwrap();
        let alert: AlertGroup =
            serde_json::from_str(r#"{"status": "firing", "groupKey": "{}:{}"}"#).unwrap();
        let mut record = IncidentRecord::new(event, alert, EventStoreResult::default());
        record.problem_id = "-3046036278385745623_1616118600000V2".to_string();
        cache.problems.insert("h".to_string(), record);

        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(
            json["problems"]["h"]["problemID"],
            "-3046036278385745623_1616118600000V2"
        );
        assert!(cache.unresolved().is_empty());
    }

    #[tokio::test]
    async fn test_record_survives_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let event: EventCreation = serde_json::from_value(serde_json::json!({
            "eventType": "ERROR_EVENT",
            "timeoutMinutes": 120,
            "attachRules": {"entityIds": ["CUSTOM_DEVICE-EBFD2154C71FC3F7"]},
            "source": "AlertManager",
            "title": "TargetDown (critical) [0a1b2c3d4e5f6071]",
            "customProperties": {"GroupKeyHash": "0a1b2c3d4e5f6071"}
        }))
        .unwrap();
        let alert: AlertGroup = serde_json::from_value(serde_json::json!({
            "status": "firing",
            "groupKey": "{}:{alertname=\"TargetDown\"}",
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "TargetDown", "severity": "critical"},
                "startsAt": "2021-03-19T01:35:45.72Z",
                "endsAt": "0001-01-01T00:00:00Z",
                "generatorURL": "http://prometheus/graph"
            }],
            "externalURL": "http://alertmanager:9093"
        }))
        .unwrap();
        let result = EventStoreResult {
            stored_event_ids: vec![-4_611_686_018_427_387_904],
            stored_ids: vec!["stored-1".to_string()],
            stored_correlation_ids: vec!["correlation-1".to_string()],
        };

        let mut record = IncidentRecord::new(event, alert, result);
        record.problem_id = "-3046036278385745623_1616118600000V2".to_string();
        record.correlation_token = "TargetDown (critical) [0a1b2c3d4e5f6071]".to_string();

        let store = open_incident_store(dir.path());
        let stored = record.clone();
        store
            .mutate(move |cache| cache.problems.insert("0a1b2c3d4e5f6071".to_string(), stored))
            .await
            .unwrap();

        let reopened = open_incident_store(dir.path());
        let cache = reopened.load().await;
        assert_eq!(cache.problems["0a1b2c3d4e5f6071"], record);
        assert!(cache.last_updated.is_some());
    }
}
