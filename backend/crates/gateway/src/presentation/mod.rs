//! Presentation Layer
//!
//! The proxy handler and the router it is mounted on.

pub mod handlers;
pub mod router;
