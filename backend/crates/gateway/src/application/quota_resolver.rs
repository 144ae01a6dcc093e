//! Quota Resolver
//!
//! Resolves the requests-per-minute entitlement of a caller. Lookups are
//! cached per principal and concurrent misses for the same principal share a
//! single downstream call. The resolver never fails: a lookup that errors or
//! times out yields the fallback tier, which is cached with a shorter TTL.

use std::sync::Arc;

use dashmap::DashMap;
use platform::cache::{CacheConfigError, Expiry, TtlCache};
use tokio::sync::OnceCell;

use crate::application::config::QuotaConfig;
use crate::domain::identity::{Identity, UserId};
use crate::domain::quota::{Quota, QuotaSource};
use crate::domain::repository::SubscriptionLookup;
use crate::error::FetchError;

pub struct QuotaResolver<L> {
    lookup: L,
    cache: TtlCache<String, Quota>,
    inflight: DashMap<String, Arc<OnceCell<Quota>>>,
    config: QuotaConfig,
}

impl<L> QuotaResolver<L>
where
    L: SubscriptionLookup + Send + Sync,
{
    pub fn new(lookup: L, config: QuotaConfig) -> Result<Self, CacheConfigError> {
        Ok(Self {
            lookup,
            cache: TtlCache::new(Expiry::AfterWrite(config.cache_ttl), config.cache_max_entries)?,
            inflight: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Quota for `identity` on `service`.
    ///
    /// Identities without a user id have no subscription record and get the
    /// service's default limit without any lookup.
    pub async fn resolve(&self, identity: &Identity, service: &str) -> Quota {
        let Some(user_id) = identity.user_id() else {
            return Quota::new(
                identity.principal(),
                self.config.service_limit(service),
                QuotaSource::ServiceDefault,
            );
        };

        let principal = user_id.to_string();
        if let Some(quota) = self.cache.get(&principal) {
            return quota;
        }

        let slot = InflightSlot {
            cell: self
                .inflight
                .entry(principal.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone(),
            inflight: &self.inflight,
            principal: &principal,
        };

        let quota = slot
            .cell
            .get_or_init(|| async {
                // A leader that finished just before this cell was created
                // has already cached the answer.
                match self.cache.get(&principal) {
                    Some(quota) => quota,
                    None => self.fetch_and_cache(user_id, &principal).await,
                }
            })
            .await
            .clone();
        quota
    }

    /// Cached quota for `principal`, if still live
    pub fn cached(&self, principal: &str) -> Option<Quota> {
        self.cache.get(&principal.to_string())
    }

    /// Drop expired quotas, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Forget the cached quota for `user_id` (e.g. after a plan change)
    pub fn invalidate(&self, user_id: UserId) {
        self.cache.remove(&user_id.to_string());
    }

    async fn fetch_and_cache(&self, user_id: UserId, principal: &str) -> Quota {
        let outcome = tokio::time::timeout(
            self.config.fetch_timeout,
            self.lookup.max_requests(user_id),
        )
        .await
        .unwrap_or(Err(FetchError::Timeout(self.config.fetch_timeout)));

        match outcome {
            Ok(rpm) => {
                let quota = Quota::new(principal, rpm, QuotaSource::Resolved);
                tracing::debug!(%user_id, rpm = quota.requests_per_minute(), "Quota resolved");
                self.cache
                    .insert_with_ttl(principal.to_string(), quota.clone(), self.config.cache_ttl);
                quota
            }
            Err(e) => {
                tracing::warn!(
                    %user_id,
                    error = %e,
                    fallback_rpm = self.config.fallback_rpm,
                    "Subscription lookup failed, using fallback tier"
                );
                let quota = Quota::new(principal, self.config.fallback_rpm, QuotaSource::Fallback);
                self.cache.insert_with_ttl(
                    principal.to_string(),
                    quota.clone(),
                    self.config.fallback_ttl,
                );
                quota
            }
        }
    }
}

/// A caller's hold on the shared lookup for one principal.
///
/// On drop, whether the lookup finished or the caller was cancelled, the
/// entry is cleared once it is answered or no other caller still waits on it.
/// An answered entry is served by the cache, so later misses start a fresh
/// flight.
struct InflightSlot<'a> {
    cell: Arc<OnceCell<Quota>>,
    inflight: &'a DashMap<String, Arc<OnceCell<Quota>>>,
    principal: &'a str,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.inflight.remove_if(self.principal, |_, current| {
            // The map and this slot hold the only references when nobody else waits
            Arc::ptr_eq(current, &self.cell)
                && (self.cell.initialized() || Arc::strong_count(&self.cell) <= 2)
        });
    }
}
