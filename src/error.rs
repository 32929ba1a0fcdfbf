// Error types for the dispatcher and the simulation.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single decision request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No pool keys and no premium provider.
    #[error("no dispatch keys configured")]
    NoKeys,

    /// HTTP 429 from every attempt that reached the provider.
    #[error("rate limited by decision provider")]
    RateLimited,

    /// HTTP 5xx, treated as transient.
    #[error("decision provider failed with status {status}")]
    Upstream { status: u16 },

    /// Any other non-success status; not retried.
    #[error("decision provider rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("decision request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// Provider envelope was not the expected chat-completion shape.
    #[error("malformed provider response: {0}")]
    MalformedEnvelope(String),

    /// Model content held no recoverable JSON object.
    #[error("decision content could not be repaired")]
    Unparseable,
}

impl DispatchError {
    /// Whether another key or provider may succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::RateLimited
                | DispatchError::Upstream { .. }
                | DispatchError::Timeout(_)
                | DispatchError::Transport(_)
        )
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::NoKeys => "no_keys",
            DispatchError::RateLimited => "rate_limited",
            DispatchError::Upstream { .. } => "upstream",
            DispatchError::Rejected { .. } => "rejected",
            DispatchError::Timeout(_) => "timeout",
            DispatchError::Transport(_) => "transport",
            DispatchError::ResponseTooLarge { .. } => "too_large",
            DispatchError::MalformedEnvelope(_) => "malformed",
            DispatchError::Unparseable => "unparseable",
        }
    }
}

/// Errors from the simulation control surface.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulation is already running")]
    AlreadyRunning,

    #[error("simulation is not running")]
    NotRunning,

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("failed to read scenario '{path}': {message}")]
    ScenarioLoad { path: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DispatchError::RateLimited.is_retryable());
        assert!(DispatchError::Upstream { status: 503 }.is_retryable());
        assert!(DispatchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!DispatchError::Rejected { status: 401 }.is_retryable());
        assert!(!DispatchError::Unparseable.is_retryable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DispatchError::Upstream { status: 502 }.to_string(),
            "decision provider failed with status 502"
        );
        assert_eq!(
            SimError::InvalidScenario("duplicate id b1".into()).to_string(),
            "invalid scenario: duplicate id b1"
        );
    }
}
