//! Periodic Job Scheduler

use crate::jobs::IncidentJobs;
use chrono::Utc;
use correlation::Reconciler;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Intervals of the background jobs
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Problem ID reconciliation (default: 2 minutes)
    pub reconcile_interval: Duration,
    /// Event resend (default: 30 minutes)
    pub resend_interval: Duration,
    /// Stale incident expiry (default: 1 hour)
    pub expire_interval: Duration,
    /// Age after which an incident expires (default: 5 days)
    pub retention: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(2 * 60),
            resend_interval: Duration::from_secs(30 * 60),
            expire_interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(5 * 24 * 60 * 60),
        }
    }
}

/// Runs reconciliation, resend and expiry on their own intervals
pub struct JobScheduler {
    jobs: Arc<IncidentJobs>,
    reconciler: Arc<Reconciler>,
    config: JobConfig,
}

impl JobScheduler {
    pub fn new(jobs: Arc<IncidentJobs>, reconciler: Arc<Reconciler>, config: JobConfig) -> Self {
        Self {
            jobs,
            reconciler,
            config,
        }
    }

    /// Spawn one loop per job. Every loop stops when `shutdown` fires.
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!("Starting background jobs: {:?}", self.config);

        let reconciler = self.reconciler.clone();
        let reconcile = tokio::spawn(run_periodic(
            "reconcile",
            self.config.reconcile_interval,
            shutdown.subscribe(),
            move || {
                let reconciler = reconciler.clone();
                async move {
                    if let Err(e) = reconciler.run_once().await {
                        error!("Reconciliation failed: {}", e);
                    }
                }
            },
        ));

        let jobs = self.jobs.clone();
        let resend = tokio::spawn(run_periodic(
            "resend",
            self.config.resend_interval,
            shutdown.subscribe(),
            move || {
                let jobs = jobs.clone();
                async move {
                    jobs.resend().await;
                }
            },
        ));

        let jobs = self.jobs;
        let expire = tokio::spawn(run_periodic(
            "expire",
            self.config.expire_interval,
            shutdown.subscribe(),
            move || {
                let jobs = jobs.clone();
                async move {
                    if let Err(e) = jobs.expire_stale(Utc::now()).await {
                        error!("Incident expiry failed: {}", e);
                    }
                }
            },
        ));

        vec![reconcile, resend, expire]
    }
}

/// Run `job` every `period` until a shutdown signal arrives. The first run
/// happens one period after start; ticks missed while a run is in progress
/// are skipped.
async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("{} job received shutdown signal", name);
                break;
            }

            _ = ticker.tick() => {
                debug!("Running {} job", name);
                job().await;
            }
        }
    }

    info!("{} job stopped", name);
}
