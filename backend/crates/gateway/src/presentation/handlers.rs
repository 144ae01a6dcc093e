//! HTTP Handlers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::response::Response;
use platform::client::{extract_bearer_token, extract_client_ip};

use crate::application::admission::{AdmissionController, AdmissionDecision};
use crate::application::config::GatewayConfig;
use crate::application::quota_resolver::QuotaResolver;
use crate::application::token_verifier::TokenVerifier;
use crate::domain::identity::Identity;
use crate::domain::repository::SubscriptionLookup;
use crate::domain::route::{Route, RouteFilter, RouteTable, is_canonical_path, service_name};
use crate::error::{GatewayError, GatewayResult, X_RATE_LIMIT_LIMIT, X_RATE_LIMIT_REMAINING};
use crate::infra::subscription_client::HttpSubscriptionClient;
use crate::infra::upstream::UpstreamClient;

/// Shared state for the gateway pipeline
pub struct GatewayAppState<L>
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    pub routes: Arc<RouteTable>,
    pub verifier: Arc<TokenVerifier>,
    pub admission: Arc<AdmissionController<L>>,
    pub upstream: Arc<UpstreamClient>,
}

impl<L> Clone for GatewayAppState<L>
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
            verifier: self.verifier.clone(),
            admission: self.admission.clone(),
            upstream: self.upstream.clone(),
        }
    }
}

impl<L> GatewayAppState<L>
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    /// Wire the pipeline around an arbitrary subscription lookup
    pub fn new(lookup: L, config: &GatewayConfig) -> GatewayResult<Self> {
        let resolver = QuotaResolver::new(lookup, config.quota.clone())
            .map_err(|e| GatewayError::Internal(format!("quota cache: {e}")))?;
        let admission = AdmissionController::new(resolver, config.admission.clone())
            .map_err(|e| GatewayError::Internal(format!("bucket store: {e}")))?;
        let upstream = UpstreamClient::new(config.upstream_timeout)
            .map_err(|e| GatewayError::Internal(format!("upstream client: {e}")))?;

        Ok(Self {
            routes: Arc::new(config.route_table()),
            verifier: Arc::new(TokenVerifier::new(&config.token)),
            admission: Arc::new(admission),
            upstream: Arc::new(upstream),
        })
    }
}

impl GatewayAppState<HttpSubscriptionClient> {
    /// State backed by the identity store's HTTP subscription endpoint
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let lookup = HttpSubscriptionClient::new(&config.quota.lookup_url, config.quota.fetch_timeout)
            .map_err(|e| GatewayError::Internal(format!("subscription client: {e}")))?;
        Self::new(lookup, config)
    }
}

/// Every path: route, authenticate, admit, forward
pub async fn proxy<L>(State(state): State<GatewayAppState<L>>, request: Request) -> GatewayResult<Response>
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    let path = request.uri().path().to_string();
    if !is_canonical_path(&path) {
        return Err(GatewayError::InvalidPath { path });
    }
    let route = state
        .routes
        .find(&path)
        .ok_or_else(|| GatewayError::RouteNotFound { path: path.clone() })?;

    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = extract_client_ip(request.headers(), peer_ip);
    tracing::debug!(route = route.name(), %path, client_ip = ?client_ip, "Route matched");

    let identity = authenticate(&state, route, &path, &request)?;

    let decision = match (&identity, route.has_filter(RouteFilter::RateLimit)) {
        (Some(identity), true) => Some(
            state
                .admission
                .admit(identity, service_name(&path))
                .await
                .into_result()?,
        ),
        _ => None,
    };

    let mut response = state
        .upstream
        .forward(route, request, identity.as_ref(), peer_ip)
        .await?;

    if let Some(decision) = decision {
        attach_rate_limit_headers(&mut response, &decision);
    }
    Ok(response)
}

/// Verified identity, or `None` when the route or path needs none
fn authenticate<L>(
    state: &GatewayAppState<L>,
    route: &Route,
    path: &str,
    request: &Request<Body>,
) -> GatewayResult<Option<Identity>>
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    if !route.requires_auth() || route.is_public(path) {
        return Ok(None);
    }

    let token = extract_bearer_token(request.headers()).ok_or_else(|| GatewayError::MissingToken {
        path: path.to_string(),
    })?;

    let identity = state
        .verifier
        .verify(token)
        .map_err(|source| GatewayError::InvalidToken {
            path: path.to_string(),
            source,
        })?;

    tracing::debug!(subject = identity.subject(), user_id = ?identity.user_id(), "Authenticated");
    Ok(Some(identity))
}

fn attach_rate_limit_headers(response: &mut Response, decision: &AdmissionDecision) {
    let headers = response.headers_mut();
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
}
