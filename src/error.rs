//! Error taxonomy shared by the engine, the transports and the host bridge.

use crate::engine::InstanceId;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Non-success HTTP status from the model or transcript provider
    #[error("Transport error {status}: {body}")]
    Transport { status: u16, body: String },

    /// Connection-level failure before a status was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an unexpected payload shape
    #[error("Format error: {0}")]
    Format(String),

    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    #[error("Scrape failed: {0}")]
    Scrape(String),

    /// Raised at a checkpoint once cancellation was requested. The engine
    /// turns it into the `cancelled` status, never into a failure.
    #[error("Run cancelled")]
    Cancelled,

    #[error("Scenario already registered: {0}")]
    DuplicateScenario(String),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Run instance not found: {0}")]
    NotFound(InstanceId),

    /// A step's input requirements are not met
    #[error("{0}")]
    Precondition(String),

    #[error("Step panicked: {0}")]
    StepPanicked(String),

    /// A finished run's recorded failure, passed on unchanged
    #[error("{0}")]
    RunFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Build a transport error from a failed response, consuming its body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        PipelineError::Transport { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_message() {
        let err = PipelineError::Transport {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "Transport error 503: overloaded");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_flagged() {
        assert!(PipelineError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_run_failed_keeps_message() {
        let err = PipelineError::RunFailed("Transport error 429: quota".to_string());
        assert_eq!(err.to_string(), "Transport error 429: quota");
    }
}
