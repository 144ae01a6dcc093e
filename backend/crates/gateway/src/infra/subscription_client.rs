//! HTTP client for the identity store's subscription endpoint

use std::time::Duration;

use serde::Deserialize;

use crate::domain::identity::UserId;
use crate::domain::repository::SubscriptionLookup;
use crate::error::FetchError;

/// Body of `GET <lookup base>/{userId}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    #[serde(default)]
    pub max_request: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SubscriptionResponse {
    /// Positive request limit, clamped into `u32`
    pub fn limit(&self) -> Result<u32, FetchError> {
        match self.max_request {
            None => Err(FetchError::MissingLimit),
            Some(n) if n <= 0 => Err(FetchError::NonPositiveLimit(n)),
            Some(n) => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }
}

/// [`SubscriptionLookup`] over HTTP
#[derive(Clone)]
pub struct HttpSubscriptionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSubscriptionClient {
    /// `timeout` bounds the whole exchange; the resolver applies its own,
    /// usually tighter, bound on top.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, user_id: UserId) -> String {
        format!("{}/{}", self.base_url, user_id)
    }
}

impl SubscriptionLookup for HttpSubscriptionClient {
    async fn max_requests(&self, user_id: UserId) -> Result<u32, FetchError> {
        let response = self.client.get(self.url_for(user_id)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let subscription: SubscriptionResponse = response.json().await?;
        let limit = subscription.limit()?;
        tracing::debug!(
            %user_id,
            limit,
            plan = subscription.name.as_deref().unwrap_or("-"),
            status = subscription.status.as_deref().unwrap_or("-"),
            "Subscription fetched"
        );
        Ok(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Path, http::StatusCode, routing::get};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    async fn subscription(Path(id): Path<u64>) -> Result<Json<Value>, StatusCode> {
        match id {
            42 => Ok(Json(json!({"maxRequest": 5, "name": "BASIC", "status": "ACTIVE"}))),
            43 => Ok(Json(json!({"maxRequest": null}))),
            44 => Ok(Json(json!({"maxRequest": 0}))),
            45 => Ok(Json(json!({"unexpected": true, "maxRequest": 10_000_000_000_i64}))),
            46 => Ok(Json(json!("not an object"))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn spawn_identity_store() -> String {
        let app = Router::new().route("/api/auth/subscription/{id}", get(subscription));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/auth/subscription/", addr)
    }

    #[test]
    fn test_limit_validation() {
        let parse = |v: Value| serde_json::from_value::<SubscriptionResponse>(v).unwrap();
        assert_eq!(parse(json!({"maxRequest": 20})).limit().unwrap(), 20);
        assert!(matches!(parse(json!({})).limit(), Err(FetchError::MissingLimit)));
        assert!(matches!(
            parse(json!({"maxRequest": -3})).limit(),
            Err(FetchError::NonPositiveLimit(-3))
        ));
    }

    #[tokio::test]
    async fn test_lookup_against_http_server() {
        let base = spawn_identity_store().await;
        let client = HttpSubscriptionClient::new(base, Duration::from_secs(5)).unwrap();

        assert_eq!(client.max_requests(UserId::new(42)).await.unwrap(), 5);
        assert!(matches!(
            client.max_requests(UserId::new(43)).await,
            Err(FetchError::MissingLimit)
        ));
        assert!(matches!(
            client.max_requests(UserId::new(44)).await,
            Err(FetchError::NonPositiveLimit(0))
        ));
        assert_eq!(client.max_requests(UserId::new(45)).await.unwrap(), u32::MAX);
        assert!(matches!(
            client.max_requests(UserId::new(46)).await,
            Err(FetchError::Transport(_))
        ));
        assert!(matches!(
            client.max_requests(UserId::new(99)).await,
            Err(FetchError::Status(404))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HttpSubscriptionClient::new(format!("http://{}", addr), Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.max_requests(UserId::new(1)).await,
            Err(FetchError::Transport(_))
        ));
    }

    #[test]
    fn test_url_for_strips_trailing_slash() {
        let client = HttpSubscriptionClient::with_client(
            reqwest::Client::new(),
            "http://auth:8084/api/auth/subscription/",
        );
        assert_eq!(
            client.url_for(UserId::new(7)),
            "http://auth:8084/api/auth/subscription/7"
        );
    }
}
