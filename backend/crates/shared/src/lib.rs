//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the "smallest core" of vocabulary shared by every
//! gateway crate:
//! - The error classification and its stable codes
//! - The unified error type and the JSON envelope clients receive
//!
//! **Design Principle**: Only include things that are "hard to change"
//! and have consistent meaning across all crates.

pub mod error {
    pub mod app_error;
    pub mod kind;
    #[cfg(feature = "axum")]
    pub mod response;
}

pub use error::app_error::{AppError, AppResult, ErrorBody};
pub use error::kind::ErrorKind;
