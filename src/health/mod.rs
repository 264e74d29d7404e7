//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     One task per instance, first tick immediate
//!     → GET <instance>/health with timeout
//!     → state.rs (classify Healthy / Degraded / Unhealthy)
//!     → instance health, history.rs, circuit breaker, metrics
//!
//! Passive signals (passive.rs):
//!     Proxied call completes
//!     → Outcome classified as success or failure
//!     → circuit breaker (by the gateway)
//! ```
//!
//! # Design Decisions
//! - Tasks are keyed by instance id and explicitly cancelable
//! - Probes never block the request path; routing may briefly use stale health
//! - An in-flight probe is not aborted on stop; its result is discarded

pub mod active;
pub mod history;
pub mod passive;
pub mod state;

pub use active::{HealthMonitor, ProbeError, ProbeOutcome};
pub use history::{HealthHistory, HealthRecord, InMemoryHealthHistory};
pub use passive::Outcome;
pub use state::HealthStatus;
