//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → Store → Gateway
//!     (health checks start per instance) → Listeners → Config watcher
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain → Stop health checks → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Fail fast: any startup error is fatal
//! - Health checks are stopped explicitly, never left to process exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
