//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap store commands and health probes with a deadline
//! - Convert elapsed deadlines into typed errors at the call site
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out future is dropped, never left running in the background

use std::future::Future;
use std::time::Duration;

/// Marker returned when a deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded(pub Duration);

impl std::fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline of {:?} exceeded", self.0)
    }
}

impl std::error::Error for DeadlineExceeded {}

/// Run `fut` to completion or fail once `limit` elapses.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DeadlineExceeded(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_fast_future() {
        let v = with_deadline(Duration::from_millis(100), async { 7 }).await;
        assert_eq!(v, Ok(7));
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let limit = Duration::from_millis(10);
        let v = with_deadline(limit, tokio::time::sleep(Duration::from_millis(200))).await;
        assert_eq!(v, Err(DeadlineExceeded(limit)));
    }
}
