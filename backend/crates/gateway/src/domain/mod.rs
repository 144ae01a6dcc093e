//! Domain Layer
//!
//! Identity, quota and routing vocabulary plus the lookup trait.

pub mod identity;
pub mod quota;
pub mod repository;
pub mod route;

// Re-exports
pub use identity::{Identity, UserId};
pub use quota::{Quota, QuotaSource};
pub use repository::SubscriptionLookup;
pub use route::{PathPattern, Route, RouteFilter, RouteTable, is_canonical_path, service_name};
