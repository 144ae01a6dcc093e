//! Admission Controller
//!
//! One token bucket per `(principal, service)`, sized from the caller's
//! current quota on every request.

use platform::cache::CacheConfigError;
use platform::rate_limit::{BucketStore, RateLimitConfig};

use crate::application::config::AdmissionConfig;
use crate::application::quota_resolver::QuotaResolver;
use crate::domain::identity::Identity;
use crate::domain::repository::SubscriptionLookup;
use crate::error::GatewayError;

pub const BASIC_TIER_MESSAGE: &str = "Rate limit exceeded. Upgrade to Premium for higher limits!";
pub const PREMIUM_TIER_MESSAGE: &str = "Rate limit exceeded. Please try again in 1 minute.";

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub retry_after_secs: u64,
    /// Set on rejection only
    pub message: Option<String>,
}

impl AdmissionDecision {
    /// `Err` with the rejection when not allowed
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.allowed {
            return Ok(self);
        }
        Err(GatewayError::RateLimited {
            limit: self.limit,
            retry_after_secs: self.retry_after_secs,
            message: self
                .message
                .unwrap_or_else(|| PREMIUM_TIER_MESSAGE.to_string()),
        })
    }
}

/// Hint shown on rejection: small tiers are nudged to upgrade
pub fn rejection_message(limit: u32, small_tier_threshold: u32) -> &'static str {
    if limit <= small_tier_threshold {
        BASIC_TIER_MESSAGE
    } else {
        PREMIUM_TIER_MESSAGE
    }
}

/// Bucket key for a caller on a service
pub fn bucket_key(identity: &Identity, service: &str) -> String {
    format!("{}:{}", identity.principal(), service)
}

pub struct AdmissionController<L> {
    resolver: QuotaResolver<L>,
    buckets: BucketStore,
    config: AdmissionConfig,
}

impl<L> AdmissionController<L>
where
    L: SubscriptionLookup + Send + Sync,
{
    pub fn new(resolver: QuotaResolver<L>, config: AdmissionConfig) -> Result<Self, CacheConfigError> {
        Ok(Self {
            resolver,
            buckets: BucketStore::new(config.bucket_idle_ttl, config.max_buckets)?,
            config,
        })
    }

    pub fn resolver(&self) -> &QuotaResolver<L> {
        &self.resolver
    }

    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Drop idle buckets and expired quotas. Returns the number of buckets removed.
    pub fn purge_idle(&self) -> usize {
        let quotas = self.resolver.purge_expired();
        let buckets = self.buckets.purge_idle();
        if quotas + buckets > 0 {
            tracing::debug!(buckets, quotas, "Purged idle admission state");
        }
        buckets
    }

    /// Admit or reject one request from `identity` to `service`.
    ///
    /// Never fails: quota problems are absorbed by the resolver.
    pub async fn admit(&self, identity: &Identity, service: &str) -> AdmissionDecision {
        let quota = self.resolver.resolve(identity, service).await;
        let key = bucket_key(identity, service);
        let result = self.buckets.try_acquire(
            &key,
            &RateLimitConfig::per_minute(quota.requests_per_minute()),
        );

        if result.allowed {
            tracing::trace!(%key, remaining = result.remaining, limit = result.limit, "Admitted");
            return AdmissionDecision {
                allowed: true,
                remaining: result.remaining,
                limit: result.limit,
                retry_after_secs: 0,
                message: None,
            };
        }

        tracing::debug!(
            %key,
            limit = result.limit,
            quota_source = %quota.source(),
            "Rejected by rate limit"
        );
        AdmissionDecision {
            allowed: false,
            remaining: 0,
            limit: result.limit,
            retry_after_secs: self.config.retry_after_secs,
            message: Some(
                rejection_message(result.limit, self.config.small_tier_threshold).to_string(),
            ),
        }
    }
}
