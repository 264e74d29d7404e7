//! Wall-clock helpers.
//!
//! Persisted timestamps are milliseconds since the Unix epoch so that every
//! gateway process sharing a store agrees on them.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
