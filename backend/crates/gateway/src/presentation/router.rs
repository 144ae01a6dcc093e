//! Gateway Router

use axum::Router;

use crate::domain::repository::SubscriptionLookup;
use crate::presentation::handlers::{self, GatewayAppState};

/// Every method and path goes through the proxy pipeline; the route table
/// decides what happens next.
pub fn gateway_router<L>(state: GatewayAppState<L>) -> Router
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    Router::new()
        .fallback(handlers::proxy::<L>)
        .with_state(state)
}
