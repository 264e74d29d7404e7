//! Health history.
//!
//! # Responsibilities
//! - Append one record per probe
//! - Serve the most recent records for operators

use std::collections::VecDeque;
use std::sync::Mutex;
use async_trait::async_trait;
use serde::Serialize;

use crate::health::state::HealthStatus;

/// One probe result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// Instance id.
    pub service: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Append-only sink for probe results.
#[async_trait]
pub trait HealthHistory: Send + Sync + std::fmt::Debug {
    async fn record(&self, record: HealthRecord);

    /// Newest first, optionally for one service.
    async fn recent(&self, service: Option<&str>, limit: usize) -> Vec<HealthRecord>;
}

/// Bounded in-memory history; the oldest record is dropped when full.
#[derive(Debug)]
pub struct InMemoryHealthHistory {
    capacity: usize,
    records: Mutex<VecDeque<HealthRecord>>,
}

impl InMemoryHealthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl HealthHistory for InMemoryHealthHistory {
    async fn record(&self, record: HealthRecord) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    async fn recent(&self, service: Option<&str>, limit: usize) -> Vec<HealthRecord> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records
            .iter()
            .rev()
            .filter(|r| service.map_or(true, |s| r.service == s))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(service: &str, timestamp: u64) -> HealthRecord {
        HealthRecord {
            service: service.into(),
            status: HealthStatus::Healthy,
            response_time_ms: 3,
            error: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_bounded_newest_first() {
        let history = InMemoryHealthHistory::new(3);
        for t in 0..5 {
            history.record(record("a", t)).await;
        }
        let recent = history.recent(None, 10).await;
        let stamps: Vec<u64> = recent.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_filter_by_service() {
        let history = InMemoryHealthHistory::new(10);
        history.record(record("a", 1)).await;
        history.record(record("b", 2)).await;
        history.record(record("a", 3)).await;

        let recent = history.recent(Some("a"), 1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp, 3);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(record("a", 9)).unwrap();
        assert_eq!(json["responseTimeMs"], 3);
        assert_eq!(json["status"], "healthy");
        assert!(json.get("error").is_none());
    }
}
