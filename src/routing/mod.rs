//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, method, version)
//!     → router.rs (exact lookup, then pattern scan)
//!     → matcher.rs (anchored path patterns)
//!     → Return: matched Endpoint or NoMatch
//!
//! Router Compilation (at startup and on reload):
//!     EndpointConfig[]
//!     → Resolve per-endpoint settings against defaults
//!     → Compile patterns, keep registration order
//!     → Freeze as immutable EndpointRouter
//! ```
//!
//! # Design Decisions
//! - Routers are immutable; a reload swaps in a new one
//! - Exact matches always beat patterns
//! - Deterministic: first registered matching pattern wins

pub mod matcher;
pub mod router;

pub use router::{Endpoint, EndpointDefaults, EndpointRouter};
