//! Application Layer
//!
//! Token verification, quota resolution and admission, wired from config.

pub mod admission;
pub mod config;
pub mod quota_resolver;
pub mod token_verifier;
