//! Rate Limiting Infrastructure
//!
//! Token buckets with continuous refill, and a keyed store that keeps one
//! bucket per key in a bounded [`TtlCache`].

use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{CacheConfigError, Expiry, TtlCache};

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window (bucket capacity)
    pub max_requests: u32,
    /// Time over which an empty bucket refills completely
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Requests per minute
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, 60)
    }

    /// Tokens added per second
    pub fn refill_per_sec(&self) -> f64 {
        let window = self.window.as_secs_f64();
        if window <= 0.0 {
            return f64::from(self.max_requests);
        }
        f64::from(self.max_requests) / window
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Whole tokens left after this check
    pub remaining: u32,
    /// Bucket capacity the check ran against
    pub limit: u32,
}

/// Continuously refilling token bucket.
///
/// Starts full. Tokens are fractional so that refill is smooth; only whole
/// tokens can be consumed.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = config.max_requests.max(1);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec(),
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    /// Follow a new limit; a smaller capacity clamps the tokens on hand
    pub fn reconfigure(&mut self, config: &RateLimitConfig) {
        let capacity = config.max_requests.max(1);
        if capacity != self.capacity {
            tracing::trace!(from = self.capacity, to = capacity, "Bucket capacity changed");
        }
        self.capacity = capacity;
        self.refill_per_sec = config.refill_per_sec();
        self.tokens = self.tokens.min(f64::from(capacity));
    }

    /// Add tokens for the time elapsed since the last refill, capped at capacity
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(f64::from(self.capacity));
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if a whole one is available
    pub fn try_consume(&mut self, now: Instant) -> RateLimitResult {
        self.refill(now);
        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }
        RateLimitResult {
            allowed,
            remaining: self.tokens.floor() as u32,
            limit: self.capacity,
        }
    }
}

/// One [`TokenBucket`] per key, bounded and evicted after idling
pub struct BucketStore {
    buckets: TtlCache<String, TokenBucket>,
}

impl BucketStore {
    pub fn new(idle_ttl: Duration, max_buckets: usize) -> Result<Self, CacheConfigError> {
        Ok(Self {
            buckets: TtlCache::new(Expiry::AfterAccess(idle_ttl), max_buckets)?,
        })
    }

    /// Atomically refill and consume one token from the bucket for `key`.
    ///
    /// The bucket is created full on first use and re-sized to `config` on
    /// every call, all under the key's entry lock.
    pub fn try_acquire(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let now = Instant::now();
        self.buckets.with_entry(
            key.to_string(),
            || TokenBucket::new(config, now),
            |bucket| {
                bucket.reconfigure(config);
                bucket.try_consume(now)
            },
        )
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop idle buckets, returning how many were removed
    pub fn purge_idle(&self) -> usize {
        self.buckets.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_config_refill_rate() {
        let config = RateLimitConfig::per_minute(120);
        assert_eq!(config.refill_per_sec(), 2.0);
        assert_eq!(RateLimitConfig::default().max_requests, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_drains_then_rejects() {
        let mut bucket = TokenBucket::new(&RateLimitConfig::per_minute(5), Instant::now());
        let now = Instant::now();

        let remaining: Vec<u32> = (0..5).map(|_| bucket.try_consume(now).remaining).collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let rejected = bucket.try_consume(now);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.limit, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_monotonic_and_capped() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&RateLimitConfig::per_minute(60), start);
        for _ in 0..60 {
            assert!(bucket.try_consume(start).allowed);
        }
        assert!(!bucket.try_consume(start).allowed);

        let mut previous = bucket.available();
        for secs in 1..=90 {
            bucket.refill(start + Duration::from_secs(secs));
            assert!(bucket.available() >= previous);
            assert!(bucket.available() <= 60.0);
            previous = bucket.available();
        }
        assert_eq!(bucket.available(), 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_whole_tokens_are_consumed() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&RateLimitConfig::per_minute(60), start);
        for _ in 0..60 {
            bucket.try_consume(start);
        }

        // 60 per minute = one token per second
        assert!(!bucket.try_consume(start + Duration::from_millis(500)).allowed);

        let admitted = bucket.try_consume(start + Duration::from_millis(1500));
        assert!(admitted.allowed);
        assert_eq!(admitted.remaining, 0);

        assert!(!bucket.try_consume(start + Duration::from_millis(1750)).allowed);
        assert!(bucket.try_consume(start + Duration::from_millis(2000)).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_capacity_clamps_tokens() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&RateLimitConfig::per_minute(100), now);

        bucket.reconfigure(&RateLimitConfig::per_minute(10));
        assert_eq!(bucket.capacity(), 10);
        assert_eq!(bucket.available(), 10.0);

        let result = bucket.try_consume(now);
        assert_eq!(result.remaining, 9);
        assert_eq!(result.limit, 10);

        // Growing keeps the tokens on hand; refill fills the rest
        bucket.reconfigure(&RateLimitConfig::per_minute(20));
        assert_eq!(bucket.available(), 9.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_keeps_one_bucket_per_key() {
        let store = BucketStore::new(Duration::from_secs(3600), 100).unwrap();
        let config = RateLimitConfig::per_minute(2);

        assert!(store.try_acquire("42:auth", &config).allowed);
        assert!(store.try_acquire("42:auth", &config).allowed);
        assert!(!store.try_acquire("42:auth", &config).allowed);

        // Other keys are independent
        assert!(store.try_acquire("42:movies", &config).allowed);
        assert!(store.try_acquire("7:auth", &config).allowed);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_evicts_idle_buckets() {
        let store = BucketStore::new(Duration::from_secs(3600), 100).unwrap();
        let config = RateLimitConfig::per_minute(1);

        assert!(store.try_acquire("k", &config).allowed);
        assert!(!store.try_acquire("k", &config).allowed);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(store.purge_idle(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_overdraws() {
        let store = Arc::new(BucketStore::new(Duration::from_secs(3600), 100).unwrap());
        let config = RateLimitConfig::per_minute(25);

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                let config = config.clone();
                tokio::spawn(async move { store.try_acquire("hot", &config).allowed })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        // Refill during the test run is far below one token
        assert_eq!(admitted, 25);
    }
}
