//! Correlation Errors

use dynatrace_client::DynatraceError;
use storage::StorageError;
use thiserror::Error;

/// Errors that abort the processing of an alert batch
#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error("Dynatrace call failed: {0}")]
    Remote(#[from] DynatraceError),

    #[error("Cache write failed: {0}")]
    Storage(#[from] StorageError),

    #[error("No incident tracked for hash {0}, cannot close the problem")]
    NotTracked(String),

    #[error("Incident {0} has no Dynatrace problem ID even after a manual scan")]
    Unresolved(String),
}
