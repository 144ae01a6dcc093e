//! Rate-limiting API Gateway
//!
//! Clean Architecture structure:
//! - `domain/` - Identity, quota, route table, lookup trait
//! - `application/` - Token verification, quota resolution, admission, config
//! - `infra/` - HTTP subscription lookup and upstream forwarding
//! - `presentation/` - Proxy handler and router
//!
//! ## Pipeline
//! - First matching route wins; unmatched paths are answered with 404
//! - Public paths bypass authentication and admission
//! - Protected paths need a valid HMAC-signed bearer token
//! - Each `(principal, service)` pair has a token bucket sized from the
//!   caller's subscription, with a fallback tier when the lookup fails
//! - Identity headers are set by the gateway only, never passed through

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use infra::subscription_client::HttpSubscriptionClient;
pub use presentation::handlers::GatewayAppState;
pub use presentation::router::gateway_router;

pub use kernel::error::{app_error::AppError, kind::ErrorKind};
