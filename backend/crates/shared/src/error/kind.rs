//! Error Kind - Classification of errors
//!
//! Defines the [`ErrorKind`] enum that maps to HTTP status codes and to the
//! stable `error` code carried in every JSON error body.

use serde::Serialize;

/// Error classification
///
/// Each variant maps to exactly one HTTP status code. Clients branch on
/// [`ErrorKind::code`], which never changes once published.
///
/// ## Examples
/// ```rust
/// use kernel::error::kind::ErrorKind;
///
/// let kind = ErrorKind::TooManyRequests;
/// assert_eq!(kind.status_code(), 429);
/// assert_eq!(kind.code(), "RATE_LIMIT_EXCEEDED");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorKind {
    /// 400 - malformed request
    BadRequest,
    /// 401 - identity could not be established
    Unauthorized,
    /// 403 - identity established but not allowed
    Forbidden,
    /// 404 - no route or resource
    NotFound,
    /// 429 - admission rejected by the rate limiter
    TooManyRequests,
    /// 500 - unexpected failure inside the gateway
    InternalServerError,
    /// 502 - upstream could not be reached or answered garbage
    BadGateway,
    /// 503 - dependency temporarily unavailable
    ServiceUnavailable,
    /// 504 - upstream did not answer in time
    GatewayTimeout,
}

impl ErrorKind {
    /// HTTP status code (RFC 9110)
    #[inline]
    pub const fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::InternalServerError => 500,
            ErrorKind::BadGateway => 502,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::GatewayTimeout => 504,
        }
    }

    /// Standard reason phrase
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "Bad Request",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::TooManyRequests => "Too Many Requests",
            ErrorKind::InternalServerError => "Internal Server Error",
            ErrorKind::BadGateway => "Bad Gateway",
            ErrorKind::ServiceUnavailable => "Service Unavailable",
            ErrorKind::GatewayTimeout => "Gateway Timeout",
        }
    }

    /// Stable machine-readable code used as the default `error` field
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::TooManyRequests => "RATE_LIMIT_EXCEEDED",
            ErrorKind::InternalServerError => "INTERNAL_ERROR",
            ErrorKind::BadGateway => "UPSTREAM_UNREACHABLE",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::GatewayTimeout => "UPSTREAM_TIMEOUT",
        }
    }

    /// 5xx errors are the gateway's fault and should be logged at error level.
    #[inline]
    pub const fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    #[inline]
    pub const fn is_client_error(&self) -> bool {
        let code = self.status_code();
        code >= 400 && code < 500
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::BadRequest.status_code(), 400);
        assert_eq!(ErrorKind::Unauthorized.status_code(), 401);
        assert_eq!(ErrorKind::Forbidden.status_code(), 403);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::TooManyRequests.status_code(), 429);
        assert_eq!(ErrorKind::InternalServerError.status_code(), 500);
        assert_eq!(ErrorKind::BadGateway.status_code(), 502);
        assert_eq!(ErrorKind::ServiceUnavailable.status_code(), 503);
        assert_eq!(ErrorKind::GatewayTimeout.status_code(), 504);
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorKind::TooManyRequests.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(ErrorKind::BadGateway.code(), "UPSTREAM_UNREACHABLE");
        assert_eq!(ErrorKind::Unauthorized.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_server_and_client_classes() {
        assert!(ErrorKind::BadGateway.is_server_error());
        assert!(ErrorKind::GatewayTimeout.is_server_error());
        assert!(!ErrorKind::TooManyRequests.is_server_error());
        assert!(ErrorKind::TooManyRequests.is_client_error());
        assert!(!ErrorKind::InternalServerError.is_client_error());
    }
}
