//! Entity Tag Enrichment

use dynatrace_client::{DynatraceApi, Tag};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which alert labels become tags on the custom device, and how hard to try
#[derive(Debug, Clone)]
pub struct TagPolicy {
    /// Label name → tag key
    pub label_keys: BTreeMap<String, String>,
    /// Tag requests before giving up (default: 10)
    pub attempts: u32,
    /// Pause between tag requests (default: 5s)
    pub retry_delay: Duration,
}

impl Default for TagPolicy {
    fn default() -> Self {
        let label_keys = [
            ("label_code_app", "CodeAppli"),
            ("namespace", "Appname"),
            ("label_env", "Plateforme"),
            ("ocp_cluster", "Clustername"),
        ]
        .into_iter()
        .map(|(label, key)| (label.to_string(), key.to_string()))
        .collect();

        Self {
            label_keys,
            attempts: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl TagPolicy {
    /// Tags for the mapped labels present in `labels`
    pub fn tags_for(&self, labels: &BTreeMap<String, String>) -> Vec<Tag> {
        self.label_keys
            .iter()
            .filter_map(|(label, key)| labels.get(label).map(|value| Tag::new(key, value)))
            .collect()
    }
}

/// Selector addressing a single entity
pub fn entity_selector(entity_id: &str) -> String {
    format!("entityId(\"{}\")", entity_id)
}

/// Apply `tags` to `entity_id`, retrying until Dynatrace reports a matched
/// entity. A freshly created custom device takes a while to become
/// selectable. Returns whether the tags landed.
pub async fn apply_tags_with_retry(
    api: &dyn DynatraceApi,
    entity_id: &str,
    tags: &[Tag],
    policy: &TagPolicy,
) -> bool {
    let selector = entity_selector(entity_id);
    for attempt in 1..=policy.attempts {
        match api.apply_tags(&selector, tags).await {
            Ok(response) if response.matched_entities_count > 0 => {
                info!(
                    "Applied {} tags to {} on attempt {}",
                    tags.len(),
                    entity_id,
                    attempt
                );
                return true;
            }
            Ok(_) => debug!("No entity matched {} yet (attempt {})", selector, attempt),
            Err(e) => warn!("Tag request for {} failed (attempt {}): {}", entity_id, attempt, e),
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    warn!(
        "Gave up tagging {} after {} attempts",
        entity_id, policy.attempts
    );
    false
}

/// Run [`apply_tags_with_retry`] in the background
pub fn spawn_tag_task(
    api: Arc<dyn DynatraceApi>,
    entity_id: String,
    tags: Vec<Tag>,
    policy: TagPolicy,
) -> JoinHandle<bool> {
    tokio::spawn(async move { apply_tags_with_retry(api.as_ref(), &entity_id, &tags, &policy).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynatrace_client::MockDynatrace;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_tags_follow_label_mapping() {
        let policy = TagPolicy::default();
        let tags = policy.tags_for(&labels(&[
            ("label_code_app", "i3"),
            ("namespace", "monitoring"),
            ("severity", "critical"),
        ]));

        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&Tag::new("CodeAppli", "i3")));
        assert!(tags.contains(&Tag::new("Appname", "monitoring")));
    }

    #[test]
    fn test_no_mapped_labels_no_tags() {
        let policy = TagPolicy::default();
        assert!(policy.tags_for(&labels(&[("alertname", "TargetDown")])).is_empty());
    }

    #[test]
    fn test_entity_selector() {
        assert_eq!(
            entity_selector("CUSTOM_DEVICE-EBFD2154C71FC3F7"),
            "entityId(\"CUSTOM_DEVICE-EBFD2154C71FC3F7\")"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tagging_stops_at_first_match() {
        let mock = MockDynatrace::new();
        mock.state().tag_matches = 1;
        let tags = vec![Tag::new("Appname", "monitoring")];

        assert!(apply_tags_with_retry(&mock, "CUSTOM_DEVICE-1", &tags, &TagPolicy::default()).await);
        assert_eq!(mock.state().tag_requests.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tagging_gives_up_after_attempts() {
        let mock = MockDynatrace::new();
        let policy = TagPolicy {
            attempts: 3,
            ..Default::default()
        };
        let tags = vec![Tag::new("Appname", "monitoring")];

        assert!(!apply_tags_with_retry(&mock, "CUSTOM_DEVICE-1", &tags, &policy).await);
        let state = mock.state();
        assert_eq!(state.tag_requests.len(), 3);
        assert_eq!(state.tag_requests[0].0, "entityId(\"CUSTOM_DEVICE-1\")");
    }
}
