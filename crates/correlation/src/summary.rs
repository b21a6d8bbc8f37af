//! Alert Batch Summary
//!
//! Folds the alerts of a batch into what Dynatrace gets to see: the custom
//! device the event is attached to, the event title and description, its
//! type and custom properties.

use crate::alert::AlertGroup;
use crate::controller::ControllerConfig;
use dynatrace_client::{AttachRules, EventCreation, EventType, Tag};
use std::collections::BTreeMap;

/// Title used until an alert carries an `alertname` label
pub const DEFAULT_TITLE: &str = "Alert from AlertManager";

/// Event source reported to Dynatrace
pub const EVENT_SOURCE: &str = "AlertManager";

/// Everything derived from one alert batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub correlation_hash: String,
    pub device_name: String,
    pub title: String,
    pub description: String,
    pub event_type: EventType,
    pub properties: BTreeMap<String, String>,
    /// Tags derived from the last alert of the batch
    pub tags: Vec<Tag>,
}

impl BatchSummary {
    pub fn from_group(group: &AlertGroup, config: &ControllerConfig) -> Self {
        let correlation_hash = group.correlation_hash();

        let mut device_name = config.default_device_name.clone();
        let mut title = DEFAULT_TITLE.to_string();
        let mut description = format!("{}: {}", DEFAULT_TITLE, group.group_key);
        let mut event_type = EventType::CustomInfo;
        let mut tags = Vec::new();

        let mut properties = BTreeMap::new();
        properties.insert("GroupKey".to_string(), group.group_key.clone());
        properties.insert("GroupKeyHash".to_string(), correlation_hash.clone());

        for (index, alert) in group.alerts.iter().enumerate() {
            let number = index + 1;

            if let Some(namespace) = alert.labels.get("namespace") {
                device_name = format!("Alertmanager - {}", namespace);
            }
            if let Some(service) = alert.labels.get("service") {
                device_name = format!("{}: {}", device_name, service);
            }
            if let Some(alertname) = alert.labels.get("alertname") {
                title = alertname.clone();
            }
            if let Some(message) = alert.annotations.get("message") {
                description = message.clone();
            }
            if let Some(severity) = alert.labels.get("severity") {
                title = format!("{} ({})", title, severity);
                if config.problem_severities.iter().any(|s| s == severity) {
                    event_type = EventType::ErrorEvent;
                }
            }

            for (key, value) in &alert.labels {
                properties.insert(format!("Alert {} - Label: {}", number, key), value.clone());
            }
            for (key, value) in &alert.annotations {
                properties.insert(
                    format!("Alert {} - Annotation: {}", number, key),
                    value.clone(),
                );
            }

            tags = config.tags.tags_for(&alert.labels);
        }

        // Dynatrace copies the event title into the problem evidence, which
        // is where reconciliation looks for the hash.
        if event_type == EventType::ErrorEvent {
            title = format!("{} [{}]", title, correlation_hash);
        }

        Self {
            correlation_hash,
            device_name,
            title,
            description,
            event_type,
            properties,
            tags,
        }
    }

    /// Whether the batch opens a problem that has to be tracked and closed
    pub fn is_incident(&self) -> bool {
        self.event_type == EventType::ErrorEvent
    }

    /// Event attached to the custom device `device_id`
    pub fn event(&self, device_id: &str, timeout_minutes: u32) -> EventCreation {
        EventCreation {
            event_type: self.event_type,
            start: None,
            end: None,
            timeout_minutes,
            attach_rules: AttachRules {
                entity_ids: vec![device_id.to_string()],
            },
            source: EVENT_SOURCE.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            custom_properties: self.properties.clone(),
            allow_davis_merge: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertStatus};

    fn alert(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Alert {
        Alert {
            status: "firing".to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn group(alerts: Vec<Alert>) -> AlertGroup {
        AlertGroup {
            version: "4".to_string(),
            receiver: "dynatrace".to_string(),
            status: AlertStatus::Firing,
            group_key: "{}:{alertname=\"TargetDown\"}".to_string(),
            truncated_alerts: 0,
            alerts,
            group_labels: BTreeMap::new(),
            common_labels: BTreeMap::new(),
            common_annotations: BTreeMap::new(),
            external_url: String::new(),
        }
    }

    #[test]
    fn test_empty_batch_uses_defaults() {
        let g = group(Vec::new());
        let summary = BatchSummary::from_group(&g, &ControllerConfig::default());

        assert_eq!(summary.device_name, "Alertmanager Events");
        assert_eq!(summary.title, "Alert from AlertManager");
        assert_eq!(
            summary.description,
            "Alert from AlertManager: {}:{alertname=\"TargetDown\"}"
        );
        assert_eq!(summary.event_type, EventType::CustomInfo);
        assert_eq!(summary.properties.len(), 2);
        assert_eq!(summary.properties["GroupKeyHash"], g.correlation_hash());
    }

    #[test]
    fn test_critical_alert_is_incident() {
        let g = group(vec![alert(
            &[
                ("alertname", "TargetDown"),
                ("namespace", "kube-system"),
                ("service", "kubelet"),
                ("severity", "critical"),
            ],
            &[("message", "targets are down")],
        )]);
        let summary = BatchSummary::from_group(&g, &ControllerConfig::default());
        let hash = g.correlation_hash();

        assert!(summary.is_incident());
        assert_eq!(summary.device_name, "Alertmanager - kube-system: kubelet");
        assert_eq!(summary.title, format!("TargetDown (critical) [{}]", hash));
        assert_eq!(summary.description, "targets are down");
        assert_eq!(summary.properties["Alert 1 - Label: severity"], "critical");
        assert_eq!(
            summary.properties["Alert 1 - Annotation: message"],
            "targets are down"
        );
        assert_eq!(summary.tags, vec![Tag::new("Appname", "kube-system")]);
    }

    #[test]
    fn test_unlisted_severity_stays_informational() {
        let g = group(vec![alert(&[("alertname", "Watchdog"), ("severity", "none")], &[])]);
        let summary = BatchSummary::from_group(&g, &ControllerConfig::default());

        assert!(!summary.is_incident());
        assert_eq!(summary.title, "Watchdog (none)");
    }

    #[test]
    fn test_later_alerts_override_earlier_ones() {
        let g = group(vec![
            alert(&[("namespace", "a"), ("alertname", "First")], &[]),
            alert(&[("namespace", "b"), ("label_env", "p")], &[]),
        ]);
        let summary = BatchSummary::from_group(&g, &ControllerConfig::default());

        assert_eq!(summary.device_name, "Alertmanager - b");
        assert_eq!(summary.title, "First");
        assert_eq!(summary.properties["Alert 1 - Label: namespace"], "a");
        assert_eq!(summary.properties["Alert 2 - Label: namespace"], "b");
        assert_eq!(summary.tags.len(), 2);
    }

    #[test]
    fn test_event_shape() {
        let g = group(vec![alert(&[("severity", "warning")], &[])]);
        let summary = BatchSummary::from_group(&g, &ControllerConfig::default());
        let event = summary.event("CUSTOM_DEVICE-1", 120);

        assert_eq!(event.event_type, EventType::ErrorEvent);
        assert_eq!(event.source, "AlertManager");
        assert_eq!(event.timeout_minutes, 120);
        assert_eq!(event.attach_rules.entity_ids, vec!["CUSTOM_DEVICE-1".to_string()]);
        assert!(!event.allow_davis_merge);
    }
}
