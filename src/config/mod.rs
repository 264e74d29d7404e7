//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → endpoint set handed to the load balancer (sync_endpoints)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the endpoint set is live-reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::GatewayConfig;
pub use schema::{
    BalanceStrategy, CircuitBreakerConfig, EndpointConfig, HealthCheckConfig, InstanceConfig,
    RateLimitPolicy, RateLimitScope, Target,
};
