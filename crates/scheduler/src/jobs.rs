//! Expiry and Resend Jobs

use chrono::{DateTime, Utc};
use correlation::IncidentStore;
use dynatrace_client::DynatraceApi;
use std::sync::Arc;
use std::time::Duration;
use storage::StorageError;
use tracing::{error, info};

/// Outcome of a resend pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResendReport {
    pub sent: usize,
    pub failed: usize,
}

/// Maintenance jobs over the incident cache
pub struct IncidentJobs {
    api: Arc<dyn DynatraceApi>,
    incidents: Arc<IncidentStore>,
    /// Age after which an incident is forgotten
    retention: Duration,
}

impl IncidentJobs {
    pub fn new(api: Arc<dyn DynatraceApi>, incidents: Arc<IncidentStore>, retention: Duration) -> Self {
        Self {
            api,
            incidents,
            retention,
        }
    }

    /// Drop incidents created more than the retention period before `now`.
    /// Returns the number of incidents removed.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let retention = self.retention;
        let removed = self
            .incidents
            .mutate(|cache| {
                let before = cache.problems.len();
                cache.problems.retain(|hash, record| {
                    // Records stamped in the future count as fresh
                    let expired = now
                        .signed_duration_since(record.created_at)
                        .to_std()
                        .map(|alive| alive > retention)
                        .unwrap_or(false);
                    if expired {
                        info!(
                            hash = %hash,
                            "Expiring incident created at {}", record.created_at
                        );
                        false
                    } else {
                        true
                    }
                });
                before - cache.problems.len()
            })
            .await?;

        if removed > 0 {
            info!("Expired {} stale incidents", removed);
        }
        Ok(removed)
    }

    /// Push every tracked event again so Dynatrace keeps the problem open
    /// past the event timeout. Failures are logged and counted.
    pub async fn resend(&self) -> ResendReport {
        let cache = self.incidents.load().await;
        let mut report = ResendReport::default();

        for (hash, record) in &cache.problems {
            match self.api.create_event(&record.event).await {
                Ok(result) => {
                    report.sent += 1;
                    info!(
                        hash = %hash,
                        "Re-sent event {:?}", result.stored_correlation_ids
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(hash = %hash, "Could not re-send event: {}", e);
                }
            }
        }

        info!(
            "Resend done: {} sent, {} failed",
            report.sent, report.failed
        );
        report
    }
}
