//! Passive health signals from proxied requests.
//!
//! # Responsibilities
//! - Classify the outcome of a proxied call as success or failure
//!
//! # Design Decisions
//! - Only connection errors and 5xx count as failures
//! - Timeouts are failures
//! - 4xx are NOT failures (client error, not backend)

use axum::http::StatusCode;

/// How a proxied call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The upstream answered with this status.
    Status(StatusCode),
    /// The upstream did not answer within the endpoint timeout.
    Timeout,
    /// The connection to the upstream failed.
    ConnectionError,
}

impl Outcome {
    /// True if the call should count against the instance.
    pub fn is_failure(&self) -> bool {
        match self {
            Outcome::Status(status) => status.is_server_error(),
            Outcome::Timeout | Outcome::ConnectionError => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes() {
        assert!(!Outcome::Status(StatusCode::OK).is_failure());
        assert!(!Outcome::Status(StatusCode::NOT_FOUND).is_failure());
        assert!(!Outcome::Status(StatusCode::TOO_MANY_REQUESTS).is_failure());
        assert!(Outcome::Status(StatusCode::BAD_GATEWAY).is_failure());
        assert!(Outcome::Timeout.is_failure());
        assert!(Outcome::ConnectionError.is_failure());
    }
}
