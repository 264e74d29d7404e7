//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted route:
//!     → rate_limit.rs (key by API key / user / IP / endpoint)
//!     → StateStore INCR + EXPIRE on the current window
//!     → allowed, or 429 with X-RateLimit-* headers
//! ```
//!
//! # Design Decisions
//! - Fixed windows, one counter per key and window
//! - Fail open: a store outage never rejects traffic
//! - Missing caller identity falls back to the client IP

pub mod rate_limit;

pub use rate_limit::{CallerIdentity, RateLimitKey, RateLimitResult, RateLimiter};
