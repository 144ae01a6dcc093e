//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Cryptographic utilities (HMAC-SHA2, Base64 / Base64url)
//! - Client identification helpers (IP, bearer token)
//! - Bounded, time-expiring concurrent cache
//! - Token bucket rate limiting

pub mod cache;
pub mod client;
pub mod crypto;
pub mod rate_limit;
