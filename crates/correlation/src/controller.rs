//! Correlation Controller
//!
//! Turns an Alertmanager notification into a Dynatrace event, tracks the
//! problem it opens and closes that problem once the alert group resolves.

use crate::alert::{AlertGroup, AlertStatus};
use crate::devices::DeviceRegistry;
use crate::error::CorrelationError;
use crate::incidents::{IncidentCache, IncidentRecord, IncidentStore};
use crate::reconcile::Reconciler;
use crate::summary::BatchSummary;
use crate::tags::{spawn_tag_task, TagPolicy};
use dynatrace_client::DynatraceApi;
use std::sync::Arc;
use storage::StoreGuard;
use tracing::{debug, info, warn};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Custom device group every device is registered in
    pub device_group: String,
    /// Device name for batches without a `namespace` label
    pub default_device_name: String,
    /// Severities that open a Dynatrace problem
    pub problem_severities: Vec<String>,
    /// Event timeout in minutes (default: 120)
    pub event_timeout_minutes: u32,
    /// Entity tag enrichment
    pub tags: TagPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_group: "alertmanager".to_string(),
            default_device_name: "Alertmanager Events".to_string(),
            problem_severities: vec![
                "warning".to_string(),
                "error".to_string(),
                "critical".to_string(),
            ],
            event_timeout_minutes: 120,
            tags: TagPolicy::default(),
        }
    }
}

/// What handling a batch amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// An event was pushed; `incident` if it is tracked for closing
    EventSent { hash: String, incident: bool },
    /// The tracked problem was closed
    ProblemClosed { hash: String, problem_id: String },
    /// Resolved batch for an informational event
    Ignored { hash: String },
}

/// Closing comment left on every problem the receiver closes
pub fn close_comment(hash: &str) -> String {
    format!(
        "Dynatrace alertmanager receiver automatically closed the problem after receiving a resolved event with hash {}",
        hash
    )
}

/// Correlates alert batches with Dynatrace events and problems
pub struct Controller {
    api: Arc<dyn DynatraceApi>,
    devices: Arc<DeviceRegistry>,
    incidents: Arc<IncidentStore>,
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        api: Arc<dyn DynatraceApi>,
        devices: Arc<DeviceRegistry>,
        incidents: Arc<IncidentStore>,
        reconciler: Arc<Reconciler>,
        config: ControllerConfig,
    ) -> Self {
        info!(
            "Creating correlation controller for group {} with severities {:?}",
            config.device_group, config.problem_severities
        );
        Self {
            api,
            devices,
            incidents,
            reconciler,
            config,
        }
    }

    /// Incident cache shared with the background jobs
    pub fn incidents(&self) -> &Arc<IncidentStore> {
        &self.incidents
    }

    /// Device registry
    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    /// Process one alert batch
    pub async fn handle(&self, group: &AlertGroup) -> Result<Outcome, CorrelationError> {
        let summary = BatchSummary::from_group(group, &self.config);
        let hash = summary.correlation_hash.clone();
        info!(
            hash = %hash,
            status = %group.status,
            "Processing {} alerts for group {}", group.alerts.len(), group.group_key
        );

        let ids = device_id::derive(&self.config.device_group, &summary.device_name);
        debug!(
            hash = %hash,
            device_id = %ids.device_id,
            "Derived custom device id for {}", summary.device_name
        );
        self.devices
            .ensure_registered(&summary.device_name, &ids)
            .await?;

        let outcome = match group.status {
            AlertStatus::Firing => {
                let event = summary.event(&ids.device_id, self.config.event_timeout_minutes);
                let result = self.api.create_event(&event).await?;
                info!(
                    hash = %hash,
                    "Sent {:?} event {:?}", event.event_type, result.stored_correlation_ids
                );

                let incident = summary.is_incident();
                if incident {
                    let record = IncidentRecord::new(event, group.clone(), result);
                    let key = hash.clone();
                    self.incidents
                        .mutate(move |cache| cache.problems.insert(key, record))
                        .await?;
                    info!(hash = %hash, "Tracking incident until it resolves");
                }
                Outcome::EventSent {
                    hash: hash.clone(),
                    incident,
                }
            }
            AlertStatus::Resolved if summary.is_incident() => {
                let problem_id = self.close_incident(&hash).await?;
                Outcome::ProblemClosed {
                    hash: hash.clone(),
                    problem_id,
                }
            }
            AlertStatus::Resolved => {
                debug!(hash = %hash, "Resolved informational event, nothing to close");
                Outcome::Ignored { hash: hash.clone() }
            }
        };

        if !summary.tags.is_empty() {
            spawn_tag_task(
                self.api.clone(),
                ids.device_id,
                summary.tags,
                self.config.tags.clone(),
            );
        }

        Ok(outcome)
    }

    /// Close the Dynatrace problem tracked under `hash` and forget it.
    ///
    /// An incident whose problem ID is unknown gets one reconciliation pass
    /// before giving up. Returns the closed problem's ID.
    pub async fn close_incident(&self, hash: &str) -> Result<String, CorrelationError> {
        let mut guard = self.incidents.lock().await;
        let tracked = guard.load().await.problems.get(hash).cloned();
        let record = match tracked {
            Some(record) => record,
            None => {
                warn!(hash = %hash, "Resolved alert for an incident that is not tracked");
                guard.mutate(|cache| cache.problems.remove(hash)).await?;
                return Err(CorrelationError::NotTracked(hash.to_string()));
            }
        };

        if record.is_resolved() {
            return self.close_problem(&mut guard, hash, &record.problem_id).await;
        }

        warn!(hash = %hash, "Problem ID unknown, scanning open problems now");
        drop(guard);
        if let Err(e) = self.reconciler.run_once().await {
            warn!(hash = %hash, "Manual reconciliation failed: {}", e);
        }

        let mut guard = self.incidents.lock().await;
        let record = guard.load().await.problems.get(hash).cloned();
        match record {
            Some(record) if record.is_resolved() => {
                self.close_problem(&mut guard, hash, &record.problem_id).await
            }
            Some(_) => {
                warn!(hash = %hash, "No problem found for incident, dropping it");
                guard.mutate(|cache| cache.problems.remove(hash)).await?;
                Err(CorrelationError::Unresolved(hash.to_string()))
            }
            None => {
                warn!(hash = %hash, "Incident vanished while reconciling");
                Err(CorrelationError::NotTracked(hash.to_string()))
            }
        }
    }

    async fn close_problem(
        &self,
        guard: &mut StoreGuard<'_, IncidentCache>,
        hash: &str,
        problem_id: &str,
    ) -> Result<String, CorrelationError> {
        self.api
            .close_problem(problem_id, &close_comment(hash))
            .await?;
        guard.mutate(|cache| cache.problems.remove(hash)).await?;
        info!(hash = %hash, problem_id = %problem_id, "Closed problem");
        Ok(problem_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DEVICE_CACHE_FILE;
    use crate::incidents::open_incident_store;
    use dynatrace_client::{EventType, MockDynatrace};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        mock: Arc<MockDynatrace>,
        controller: Controller,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockDynatrace::new());
        let config = ControllerConfig::default();
        let devices = Arc::new(DeviceRegistry::new(
            dir.path(),
            mock.clone(),
            config.device_group.clone(),
        ));
        let incidents = Arc::new(open_incident_store(dir.path()));
        let reconciler = Arc::new(Reconciler::new(mock.clone(), incidents.clone()));
        let controller = Controller::new(mock.clone(), devices, incidents, reconciler, config);
        Harness {
            _dir: dir,
            mock,
            controller,
        }
    }

    fn batch(status: &str, severity: &str) -> AlertGroup {
        serde_json::from_value(serde_json::json!({
            "receiver": "dynatrace",
            "status": status,
            "groupKey": "{}:{alertname=\"TargetDown\", namespace=\"monitoring\"}",
            "alerts": [{
                "status": status,
                "labels": {
                    "alertname": "TargetDown",
                    "namespace": "monitoring",
                    "severity": severity
                },
                "annotations": {"message": "targets are down"}
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_firing_incident_is_sent_and_tracked() {
        let h = harness();
        let group = batch("firing", "critical");
        let hash = group.correlation_hash();

        let outcome = h.controller.handle(&group).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::EventSent {
                hash: hash.clone(),
                incident: true
            }
        );

        let ids = device_id::derive("alertmanager", "Alertmanager - monitoring");
        {
            let state = h.mock.state();
            assert_eq!(state.created_devices.len(), 1);
            assert_eq!(state.created_devices[0].0, "Alertmanager - monitoring");
            assert_eq!(state.events.len(), 1);
            assert_eq!(state.events[0].event_type, EventType::ErrorEvent);
            assert_eq!(state.events[0].attach_rules.entity_ids, vec![ids.device_id.clone()]);
            assert!(state.events[0].title.contains(&hash));
        }

        let cache = h.controller.incidents().load().await;
        let record = &cache.problems[&hash];
        assert!(!record.is_resolved());
        assert_eq!(record.alert, group);
        assert_eq!(
            record.event_store_result.stored_correlation_ids,
            vec!["correlation-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_informational_firing_is_not_tracked() {
        let h = harness();
        let outcome = h.controller.handle(&batch("firing", "info")).await.unwrap();

        assert!(matches!(outcome, Outcome::EventSent { incident: false, .. }));
        assert_eq!(h.mock.state().events[0].event_type, EventType::CustomInfo);
        assert!(h.controller.incidents().load().await.problems.is_empty());
    }

    #[tokio::test]
    async fn test_informational_resolved_is_a_noop() {
        let h = harness();
        let outcome = h.controller.handle(&batch("resolved", "info")).await.unwrap();

        assert!(matches!(outcome, Outcome::Ignored { .. }));
        let state = h.mock.state();
        assert!(state.events.is_empty());
        assert!(state.closed_problems.is_empty());
        assert_eq!(state.problem_listings, 0);
    }

    #[tokio::test]
    async fn test_full_lifecycle_closes_problem() {
        let h = harness();
        let firing = batch("firing", "critical");
        let hash = firing.correlation_hash();
        h.controller.handle(&firing).await.unwrap();

        let title = h.mock.state().events[0].title.clone();
        h.mock.add_open_problem("P-42", &title);
        let report = h.controller.reconciler.run_once().await.unwrap();
        assert_eq!(report.resolved, 1);

        let outcome = h.controller.handle(&batch("resolved", "critical")).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::ProblemClosed {
                hash: hash.clone(),
                problem_id: "P-42".to_string()
            }
        );

        let state = h.mock.state();
        assert_eq!(state.closed_problems.len(), 1);
        assert_eq!(state.closed_problems[0].0, "P-42");
        assert_eq!(state.closed_problems[0].1, close_comment(&hash));
        // One listing from the explicit pass, none from the close
        assert_eq!(state.problem_listings, 1);
        drop(state);
        assert!(h.controller.incidents().load().await.problems.is_empty());
    }

    #[tokio::test]
    async fn test_close_reconciles_once_when_problem_id_unknown() {
        let h = harness();
        let firing = batch("firing", "critical");
        let hash = firing.correlation_hash();
        h.controller.handle(&firing).await.unwrap();
        let title = h.mock.state().events[0].title.clone();
        h.mock.add_open_problem("P-7", &title);

        let problem_id = h.controller.close_incident(&hash).await.unwrap();
        assert_eq!(problem_id, "P-7");

        let state = h.mock.state();
        assert_eq!(state.problem_listings, 1);
        assert_eq!(state.closed_problems.len(), 1);
    }

    #[tokio::test]
    async fn test_close_unresolved_drops_entry() {
        let h = harness();
        let firing = batch("firing", "critical");
        let hash = firing.correlation_hash();
        h.controller.handle(&firing).await.unwrap();

        let result = h.controller.close_incident(&hash).await;
        assert!(matches!(result, Err(CorrelationError::Unresolved(ref id)) if id == &hash));

        let state = h.mock.state();
        assert_eq!(state.problem_listings, 1);
        assert!(state.closed_problems.is_empty());
        drop(state);
        assert!(h.controller.incidents().load().await.problems.is_empty());
    }

    #[tokio::test]
    async fn test_close_untracked_hash() {
        let h = harness();
        let result = h.controller.handle(&batch("resolved", "critical")).await;

        assert!(matches!(result, Err(CorrelationError::NotTracked(_))));
        let state = h.mock.state();
        assert!(state.closed_problems.is_empty());
        assert_eq!(state.problem_listings, 0);
    }

    #[tokio::test]
    async fn test_failed_close_keeps_entry() {
        let h = harness();
        let firing = batch("firing", "critical");
        let hash = firing.correlation_hash();
        h.controller.handle(&firing).await.unwrap();
        let title = h.mock.state().events[0].title.clone();
        h.mock.add_open_problem("P-9", &title);
        h.controller.reconciler.run_once().await.unwrap();
        h.mock.state().fail_close = true;

        let result = h.controller.close_incident(&hash).await;
        assert!(matches!(result, Err(CorrelationError::Remote(_))));
        assert!(h.controller.incidents().load().await.problems.contains_key(&hash));
    }

    #[tokio::test]
    async fn test_failed_event_caches_no_incident() {
        let h = harness();
        h.mock.state().fail_events = true;

        let result = h.controller.handle(&batch("firing", "critical")).await;
        assert!(matches!(result, Err(CorrelationError::Remote(_))));
        assert!(h.controller.incidents().load().await.problems.is_empty());
        // The device itself was registered before the event failed
        assert_eq!(h.controller.devices().devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_device_creation_aborts_batch() {
        let h = harness();
        h.mock.state().fail_device_creation = true;

        let result = h.controller.handle(&batch("firing", "critical")).await;
        assert!(matches!(result, Err(CorrelationError::Remote(_))));
        let state = h.mock.state();
        assert!(state.events.is_empty());
        assert!(!h._dir.path().join(DEVICE_CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn test_repeated_batches_register_device_once() {
        let h = harness();
        h.controller.handle(&batch("firing", "critical")).await.unwrap();
        h.controller.handle(&batch("firing", "critical")).await.unwrap();

        let state = h.mock.state();
        assert_eq!(state.created_devices.len(), 1);
        assert_eq!(state.events.len(), 2);
    }
}
