//! Gateway Error Types
//!
//! This module provides gateway-specific error variants that integrate
//! with the unified `kernel::error::AppError` system.

use axum::http::{HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Gateway-specific result type alias
pub type GatewayResult<T> = Result<T, GatewayError>;

pub const AUTHENTICATION_FAILED: &str = "Authentication failed";
pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";

pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
pub const X_RATE_LIMIT_RETRY_AFTER: HeaderName =
    HeaderName::from_static("x-rate-limit-retry-after-seconds");
pub const X_RATE_LIMIT_MESSAGE: HeaderName = HeaderName::from_static("x-rate-limit-message");

/// Why a bearer token was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token signature does not match")]
    BadSignature,

    #[error("Token has no subject")]
    MissingSubject,

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token type {0} cannot be used for API access")]
    WrongTokenType(String),
}

/// Subscription lookup failure, always absorbed into the fallback quota
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Subscription lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscription lookup failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Subscription lookup returned status {0}")]
    Status(u16),

    #[error("Subscription record has no request limit")]
    MissingLimit,

    #[error("Subscription request limit must be positive, got {0}")]
    NonPositiveLimit(i64),
}

/// Failure while proxying to an upstream service
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream {upstream} unreachable: {source}")]
    Unreachable {
        upstream: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream {upstream} did not respond in time")]
    Timeout { upstream: String },

    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),
}

impl UpstreamError {
    pub fn from_reqwest(upstream: &str, err: reqwest::Error) -> Self {
        if err.is_builder() {
            UpstreamError::InvalidTarget(err.to_string())
        } else if err.is_timeout() {
            UpstreamError::Timeout {
                upstream: upstream.to_string(),
            }
        } else {
            UpstreamError::Unreachable {
                upstream: upstream.to_string(),
                source: err,
            }
        }
    }
}

/// Gateway-specific error variants
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No usable `Authorization: Bearer` header
    #[error("Missing or invalid Authorization header")]
    MissingToken { path: String },

    /// Token present but refused
    #[error("Invalid or expired token")]
    InvalidToken {
        path: String,
        #[source]
        source: TokenError,
    },

    /// Admission rejected by the caller's bucket
    #[error("{message}")]
    RateLimited {
        limit: u32,
        retry_after_secs: u64,
        message: String,
    },

    /// Path has dot segments or encoded separators
    #[error("Request path is not canonical")]
    InvalidPath { path: String },

    /// No route matches the path
    #[error("No route for {path}")]
    RouteNotFound { path: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::MissingToken { .. } | GatewayError::InvalidToken { .. } => {
                ErrorKind::Unauthorized
            }
            GatewayError::RateLimited { .. } => ErrorKind::TooManyRequests,
            GatewayError::InvalidPath { .. } => ErrorKind::BadRequest,
            GatewayError::RouteNotFound { .. } => ErrorKind::NotFound,
            GatewayError::Upstream(UpstreamError::Timeout { .. }) => ErrorKind::GatewayTimeout,
            GatewayError::Upstream(UpstreamError::Unreachable { .. }) => ErrorKind::BadGateway,
            GatewayError::Upstream(UpstreamError::InvalidTarget(_)) | GatewayError::Internal(_) => {
                ErrorKind::InternalServerError
            }
        }
    }

    /// Convert to AppError
    pub fn to_app_error(&self) -> AppError {
        match self {
            GatewayError::MissingToken { path } => AppError::new(self.kind(), self.to_string())
                .with_error(AUTHENTICATION_FAILED)
                .with_path(path.clone())
                .with_reason(MISSING_TOKEN),
            GatewayError::InvalidToken { path, .. } => {
                AppError::new(self.kind(), self.to_string())
                    .with_error(AUTHENTICATION_FAILED)
                    .with_path(path.clone())
                    .with_reason(INVALID_TOKEN)
            }
            GatewayError::RouteNotFound { path } | GatewayError::InvalidPath { path } => {
                AppError::new(self.kind(), self.to_string()).with_path(path.clone())
            }
            GatewayError::Upstream(UpstreamError::Timeout { .. }) => {
                AppError::new(self.kind(), "Upstream service did not respond in time")
            }
            GatewayError::Upstream(UpstreamError::Unreachable { .. }) => {
                AppError::new(self.kind(), "Upstream service unavailable")
            }
            GatewayError::Upstream(UpstreamError::InvalidTarget(_)) | GatewayError::Internal(_) => {
                AppError::new(self.kind(), "Internal gateway error")
            }
            GatewayError::RateLimited { .. } => AppError::new(self.kind(), self.to_string()),
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            GatewayError::MissingToken { path } => {
                tracing::debug!(%path, "Request without bearer token");
            }
            GatewayError::InvalidToken {
                path,
                source: TokenError::BadSignature,
            } => {
                tracing::warn!(%path, "Token signature mismatch");
            }
            GatewayError::InvalidToken { path, source } => {
                tracing::debug!(%path, reason = %source, "Token rejected");
            }
            GatewayError::RateLimited { limit, .. } => {
                tracing::debug!(limit, "Rate limit exceeded");
            }
            GatewayError::RouteNotFound { path } => {
                tracing::debug!(%path, "No route");
            }
            GatewayError::InvalidPath { path } => {
                tracing::warn!(%path, "Rejected non-canonical path");
            }
            GatewayError::Upstream(e) => {
                tracing::error!(error = %e, "Upstream error");
            }
            GatewayError::Internal(msg) => {
                tracing::error!(message = %msg, "Gateway internal error");
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();
        let mut response = self.to_app_error().into_response();

        if let GatewayError::RateLimited {
            limit,
            retry_after_secs,
            message,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(*limit));
            headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(X_RATE_LIMIT_RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            if let Ok(value) = HeaderValue::from_str(message) {
                headers.insert(X_RATE_LIMIT_MESSAGE, value);
            }
        }

        response
    }
}

impl From<AppError> for GatewayError {
    fn from(err: AppError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
