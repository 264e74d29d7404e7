//! Adaptive traffic control for an API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!         │
//!         ▼
//!     http (axum proxy handler)
//!         │
//!         ▼
//!     gateway::admit ──▶ routing (endpoint lookup)
//!         │          ──▶ security::rate_limit ──▶ store
//!         │          ──▶ load_balancer (health + circuit filtering, strategy)
//!         ▼
//!     upstream instance
//!         │
//!         ▼
//!     gateway::report ──▶ resilience::circuit_breaker ──▶ store
//!
//!     health (active probes) ──▶ instance health + circuit breaker
//!     admin (operator API)   ──▶ instances, circuits, health history
//! ```

// Core
pub mod clock;
pub mod config;
pub mod gateway;
pub mod routing;
pub mod store;

// Traffic management
pub mod health;
pub mod load_balancer;

// Outer surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use gateway::{Admission, Gateway, Rejection, RouteRequest};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
