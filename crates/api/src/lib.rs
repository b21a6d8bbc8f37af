//! Dynatrace Alertmanager Receiver
//!
//! Webhook server that forwards Alertmanager notifications to Dynatrace and
//! runs the incident cache maintenance jobs next to it.

use axum::{
    routing::{get, post},
    Router,
};
use correlation::{open_incident_store, Controller, DeviceRegistry, Reconciler};
use dynatrace_client::{DynatraceApi, DynatraceClient, DynatraceError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use scheduler::{IncidentJobs, JobScheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, Layer};

pub mod settings;
mod routes;

pub use settings::ReceiverConfig;
pub use routes::{health::HealthResponse, webhook::WebhookResponse};

/// Errors that stop the receiver
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics setup failed: {0}")]
    Metrics(String),

    #[error("Dynatrace client error: {0}")]
    Client(#[from] DynatraceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state shared across handlers
pub struct AppState {
    pub controller: Arc<Controller>,
    /// Prometheus exposition, absent when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

/// Everything the receiver runs, wired together
pub struct Receiver {
    pub state: Arc<AppState>,
    pub scheduler: JobScheduler,
}

impl Receiver {
    /// Wire the controller, caches and jobs around `api`
    pub fn assemble(
        config: &ReceiverConfig,
        api: Arc<dyn DynatraceApi>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let controller_config = config.controller_config();
        let job_config = config.job_config();
        info!("Using cache directory {}", config.cache.dir.display());

        let incidents = Arc::new(open_incident_store(&config.cache.dir));
        let devices = Arc::new(DeviceRegistry::new(
            &config.cache.dir,
            api.clone(),
            controller_config.device_group.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(api.clone(), incidents.clone()));
        let jobs = Arc::new(IncidentJobs::new(
            api.clone(),
            incidents.clone(),
            job_config.retention,
        ));

        let controller = Arc::new(Controller::new(
            api,
            devices,
            incidents,
            reconciler.clone(),
            controller_config,
        ));

        Self {
            state: Arc::new(AppState {
                controller,
                metrics,
                version: env!("CARGO_PKG_VERSION").to_string(),
                start_time: Instant::now(),
            }),
            scheduler: JobScheduler::new(jobs, reconciler, job_config),
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/webhook", post(routes::webhook::receive))
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::metrics::render))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Prefix of the rotated log files
pub const LOG_FILE_PREFIX: &str = "dynatrace-receiver";

/// Initialize logging to stdout and, with `config.dir` set, to daily rotated
/// files.
///
/// The returned guard flushes the file writer when dropped and must be held
/// until the receiver exits.
pub fn init_logging(config: &settings::LoggingConfig) -> Result<Option<WorkerGuard>, ServerError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| ServerError::Logging(format!("unknown log level {}", config.level)))?;

    let stdout = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            let (writer, guard) = log_file_writer(dir, config.max_files)?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .with(LevelFilter::from_level(level))
        .try_init()
        .map_err(|e| ServerError::Logging(e.to_string()))?;

    if let Some(dir) = &config.dir {
        info!("Writing log files to {}", dir.display());
    }
    Ok(guard)
}

/// Non-blocking writer over daily rotated files in `dir`
fn log_file_writer(dir: &Path, max_files: usize) -> Result<(NonBlocking, WorkerGuard), ServerError> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| ServerError::Logging(format!("cannot log to {}: {}", dir.display(), e)))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Run the receiver until a shutdown signal arrives
pub async fn run_server(config: ReceiverConfig) -> Result<(), ServerError> {
    let addr = config.socket_addr().map_err(ServerError::Config)?;
    let api: Arc<dyn DynatraceApi> = Arc::new(DynatraceClient::new(config.client_config())?);

    let metrics = if config.metrics.enabled {
        Some(init_metrics()?)
    } else {
        None
    };

    let receiver = Receiver::assemble(&config, api, metrics);
    match receiver.state.controller.devices().backfill_display_names().await {
        Ok(0) => {}
        Ok(updated) => info!("Backfilled display names of {} custom devices", updated),
        Err(e) => warn!("Could not backfill custom device names: {}", e),
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let jobs = receiver.scheduler.spawn(&shutdown_tx);

    let app = create_router(receiver.state, config.request_timeout());
    info!("Starting webhook on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    for job in jobs {
        if let Err(e) = job.await {
            warn!("Background job ended abnormally: {}", e);
        }
    }

    info!("Receiver stopped");
    Ok(())
}
