//! Application Error - Unified error type for the application
//!
//! Defines [`AppError`], [`AppResult<T>`] and the JSON envelope
//! ([`ErrorBody`]) every rejection is rendered with.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use serde::Serialize;

use super::kind::ErrorKind;

/// Unified error type
///
/// Built with a small builder so that each stage of the request pipeline can
/// attach what the client needs to branch on (the `error` label, the request
/// path, a reason code) without inventing its own body format.
///
/// ## Examples
/// ```rust
/// use kernel::error::{app_error::AppError, kind::ErrorKind};
///
/// let err = AppError::new(ErrorKind::NotFound, "No route for /nope");
/// assert_eq!(err.status_code(), 404);
///
/// let err = AppError::unauthorized("Invalid or expired token")
///     .with_error("Authentication failed")
///     .with_path("/api/movies")
///     .with_reason("INVALID_TOKEN");
/// assert_eq!(err.error_label(), "Authentication failed");
/// ```
pub struct AppError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    /// Overrides [`ErrorKind::code`] in the `error` field
    error: Option<Cow<'static, str>>,
    path: Option<String>,
    reason: Option<Cow<'static, str>>,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

/// `Result<T, AppError>`
pub type AppResult<T> = Result<T, AppError>;

/// JSON body written for every rejected request.
///
/// `success` is always `false`; `timestamp` is milliseconds since the epoch.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
}

impl AppError {
    // ========================================================================
    // Constructors
    // ========================================================================

    #[inline]
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            error: None,
            path: None,
            reason: None,
            source: None,
        }
    }

    #[inline]
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    #[inline]
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    #[inline]
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[inline]
    pub fn too_many_requests(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::TooManyRequests, message)
    }

    #[inline]
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InternalServerError, message)
    }

    #[inline]
    pub fn bad_gateway(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::BadGateway, message)
    }

    #[inline]
    pub fn gateway_timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::GatewayTimeout, message)
    }

    // ========================================================================
    // Builder methods
    // ========================================================================

    /// Replace the `error` label (defaults to the kind's stable code)
    #[inline]
    pub fn with_error(mut self, error: impl Into<Cow<'static, str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the request path the error refers to
    #[inline]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a machine-readable reason, rendered as `errors.error`
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach the underlying error (kept for logs, never rendered)
    #[inline]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Value of the `error` field
    #[inline]
    pub fn error_label(&self) -> &str {
        self.error.as_deref().unwrap_or(self.kind.code())
    }

    #[inline]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[inline]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    #[inline]
    pub fn is_server_error(&self) -> bool {
        self.kind.is_server_error()
    }

    /// Build the JSON envelope stamped with the current time
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            status: self.status_code(),
            error: self.error_label().to_string(),
            message: self.message.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            path: self.path.clone(),
            errors: self.reason.as_ref().map(|reason| {
                let mut errors = BTreeMap::new();
                errors.insert("error".to_string(), reason.to_string());
                errors
            }),
        }
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("AppError");
        builder.field("kind", &self.kind);
        builder.field("message", &self.message);
        if let Some(error) = &self.error {
            builder.field("error", error);
        }
        if let Some(path) = &self.path {
            builder.field("path", path);
        }
        if let Some(reason) = &self.reason {
            builder.field("reason", reason);
        }
        if let Some(source) = &self.source {
            builder.field("source", source);
        }
        builder.finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(reason) = &self.reason {
            write!(f, " (reason: {})", reason)?;
        }
        Ok(())
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}
