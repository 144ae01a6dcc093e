//! Requests-per-minute entitlement

use std::fmt;

/// Where a quota came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaSource {
    /// Read from the caller's subscription record
    Resolved,
    /// Lookup failed; the low fallback tier applies
    Fallback,
    /// No user id to look up; the per-service limit applies
    ServiceDefault,
}

impl QuotaSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            QuotaSource::Resolved => "resolved",
            QuotaSource::Fallback => "fallback",
            QuotaSource::ServiceDefault => "service_default",
        }
    }
}

impl fmt::Display for QuotaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests per minute granted to one principal.
///
/// `requests_per_minute` is always at least 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    principal: String,
    requests_per_minute: u32,
    source: QuotaSource,
}

impl Quota {
    pub fn new(principal: impl Into<String>, requests_per_minute: u32, source: QuotaSource) -> Self {
        Self {
            principal: principal.into(),
            requests_per_minute: requests_per_minute.max(1),
            source,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn source(&self) -> QuotaSource {
        self.source
    }

    pub fn is_fallback(&self) -> bool {
        self.source == QuotaSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_at_least_one() {
        let quota = Quota::new("42", 0, QuotaSource::Resolved);
        assert_eq!(quota.requests_per_minute(), 1);
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(QuotaSource::Fallback.to_string(), "fallback");
        assert!(Quota::new("7", 10, QuotaSource::Fallback).is_fallback());
        assert!(!Quota::new("7", 10, QuotaSource::Resolved).is_fallback());
    }
}
