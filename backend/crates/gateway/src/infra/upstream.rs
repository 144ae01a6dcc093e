//! Upstream forwarding
//!
//! Relays a request to the route's upstream with the method, path, query and
//! end-to-end headers intact. Bodies are streamed in both directions.

use std::net::IpAddr;
use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, Uri, header};

use crate::domain::identity::Identity;
use crate::domain::route::Route;
use crate::error::UpstreamError;

pub const X_USERNAME: HeaderName = HeaderName::from_static("x-username");
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_ROLES: HeaderName = HeaderName::from_static("x-user-roles");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-scoped headers never relayed in either direction
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Identity headers only the gateway may set
const IDENTITY_HEADERS: [HeaderName; 3] = [X_USERNAME, X_USER_ID, X_USER_ROLES];

/// Shared HTTP client for all upstreams
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    /// `timeout` bounds the wait for the upstream's response headers; streaming
    /// the body afterwards is not limited.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn forward(
        &self,
        route: &Route,
        request: Request<Body>,
        identity: Option<&Identity>,
        client_ip: Option<IpAddr>,
    ) -> Result<Response<Body>, UpstreamError> {
        let (parts, body) = request.into_parts();
        let url = target_url(route, &parts.uri);
        let headers = forwarded_headers(&parts.headers, identity, client_ip);

        let mut outbound = self
            .client
            .request(parts.method.clone(), url.as_str())
            .headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        tracing::debug!(route = route.name(), method = %parts.method, %url, "Forwarding");

        let upstream = match tokio::time::timeout(self.timeout, outbound.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(UpstreamError::from_reqwest(route.name(), e)),
            Err(_) => {
                return Err(UpstreamError::Timeout {
                    upstream: route.name().to_string(),
                });
            }
        };

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Upstream base joined with the inbound path and query
pub fn target_url(route: &Route, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{}", route.upstream(), path_and_query)
}

/// Headers sent upstream.
///
/// Client copies of the identity headers are always dropped; the verified
/// identity, when there is one, replaces them.
pub fn forwarded_headers(
    inbound: &HeaderMap,
    identity: Option<&Identity>,
    client_ip: Option<IpAddr>,
) -> HeaderMap {
    let mut headers = strip_hop_by_hop(inbound);
    headers.remove(header::HOST);
    for name in &IDENTITY_HEADERS {
        headers.remove(name);
    }

    if let Some(identity) = identity {
        if let Ok(value) = HeaderValue::from_str(identity.username()) {
            headers.insert(X_USERNAME, value);
        }
        if let Some(user_id) = identity.user_id() {
            headers.insert(X_USER_ID, HeaderValue::from(user_id.value()));
        }
        if !identity.roles().is_empty() {
            if let Ok(value) = HeaderValue::from_str(&identity.roles().join(",")) {
                headers.insert(X_USER_ROLES, value);
            }
        }
    }

    if let Some(ip) = client_ip {
        let forwarded_for = match inbound
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    headers
}

/// Copy of `headers` without hop-by-hop headers, including any named in `Connection`
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || listed.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
