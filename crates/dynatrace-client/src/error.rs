//! Dynatrace Client Error Types

use thiserror::Error;

/// Errors returned by Dynatrace API calls
#[derive(Debug, Error)]
pub enum DynatraceError {
    /// Request could not be sent or the response not read
    #[error("Network error during {operation}: {message}")]
    Network {
        operation: &'static str,
        message: String,
    },

    /// API answered with a non-success status
    #[error("{operation} returned HTTP {status}: {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not match the expected shape
    #[error("Could not decode {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    /// Invalid base URL or HTTP client settings
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl DynatraceError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DynatraceError::Network { .. } => true,
            DynatraceError::Http { status, .. } => *status == 429 || *status >= 500,
            DynatraceError::Decode { .. } | DynatraceError::Config(_) => false,
        }
    }
}
