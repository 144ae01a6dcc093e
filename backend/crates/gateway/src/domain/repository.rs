//! Repository Traits
//!
//! Interfaces for external lookups. Implementations are in the infra layer.

use crate::domain::identity::UserId;
use crate::error::FetchError;

/// Source of per-user subscription limits
#[trait_variant::make(SubscriptionLookup: Send)]
pub trait LocalSubscriptionLookup {
    /// Requests per minute granted by the user's active subscription
    async fn max_requests(&self, user_id: UserId) -> Result<u32, FetchError>;
}
