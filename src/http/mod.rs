//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout layers)
//!     → request.rs (request ID, API version, caller identity)
//!     → gateway admission (route, rate limit, instance selection)
//!     → upstream call under the endpoint timeout
//!     → response.rs (rejections, rate-limit headers, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use server::{AppState, HttpServer};
