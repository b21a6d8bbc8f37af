//! Problem Reconciliation
//!
//! Dynatrace opens problems asynchronously, so the problem ID of an
//! incident is only known once a listing of open problems shows an event
//! evidence carrying the incident's correlation hash.

use crate::error::CorrelationError;
use crate::incidents::IncidentStore;
use dynatrace_client::DynatraceApi;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Incidents still waiting for a problem ID
    pub pending: usize,
    /// Incidents matched to a problem during this pass
    pub resolved: usize,
}

/// Matches tracked incidents with open Dynatrace problems
pub struct Reconciler {
    api: Arc<dyn DynatraceApi>,
    incidents: Arc<IncidentStore>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn DynatraceApi>, incidents: Arc<IncidentStore>) -> Self {
        Self { api, incidents }
    }

    /// Run a single pass.
    ///
    /// Must not be called while holding the incident store lock: the remote
    /// listing happens unlocked and only the final update takes the lock.
    pub async fn run_once(&self) -> Result<ReconcileReport, CorrelationError> {
        let unresolved = self.incidents.load().await.unresolved();
        if unresolved.is_empty() {
            debug!("No incident waiting for a problem ID");
            return Ok(ReconcileReport::default());
        }

        info!("Looking up problem IDs for {} incidents", unresolved.len());
        let problems = match self.api.list_open_problems().await {
            Ok(problems) => problems,
            Err(e) => {
                warn!("Could not list open problems: {}", e);
                return Err(e.into());
            }
        };

        let report = self
            .incidents
            .mutate(|cache| {
                let mut report = ReconcileReport::default();
                for (hash, record) in cache.problems.iter_mut() {
                    if record.is_resolved() {
                        continue;
                    }
                    let found = problems.iter().find_map(|problem| {
                        problem
                            .evidence_containing(hash)
                            .map(|evidence| (problem, evidence))
                    });
                    match found {
                        Some((problem, evidence)) => {
                            info!(
                                hash = %hash,
                                problem_id = %problem.problem_id,
                                "Found problem {} for incident", problem.display_id
                            );
                            record.problem_id = problem.problem_id.clone();
                            record.correlation_token = evidence.display_name.clone();
                            report.resolved += 1;
                        }
                        None => report.pending += 1,
                    }
                }
                report
            })
            .await?;

        info!(
            "Reconciliation done: {} resolved, {} pending",
            report.resolved, report.pending
        );
        Ok(report)
    }
}
