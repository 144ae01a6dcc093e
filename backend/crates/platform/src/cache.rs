//! Bounded, time-expiring concurrent cache
//!
//! A thin layer over [`DashMap`] adding per-entry expiry and a size bound.
//! Keys hash to shards, so unrelated keys never wait on each other; work on
//! one key (see [`TtlCache::with_entry`]) runs under that key's shard lock
//! and is therefore linearizable.
//!
//! Time is read from [`tokio::time::Instant`], which makes expiry testable
//! with `tokio::time::pause` / `advance`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// A full cache evicts at least `max_entries / EVICTION_BATCH_DIVISOR` entries per scan
const EVICTION_BATCH_DIVISOR: usize = 16;

/// When an entry becomes stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Stale a fixed time after it was written, regardless of reads
    AfterWrite(Duration),
    /// Stale after going untouched for the given time
    AfterAccess(Duration),
}

impl Expiry {
    fn ttl(&self) -> Duration {
        match self {
            Expiry::AfterWrite(ttl) | Expiry::AfterAccess(ttl) => *ttl,
        }
    }
}

/// Rejected cache configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheConfigError {
    #[error("cache capacity must be at least 1")]
    ZeroCapacity,
    #[error("cache TTL must be greater than zero")]
    ZeroTtl,
}

struct Slot<V> {
    value: V,
    ttl: Duration,
    written_at: Instant,
    touched_at: Instant,
}

impl<V> Slot<V> {
    fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            ttl,
            written_at: now,
            touched_at: now,
        }
    }

    fn is_expired(&self, expiry: Expiry, now: Instant) -> bool {
        let since = match expiry {
            Expiry::AfterWrite(_) => self.written_at,
            Expiry::AfterAccess(_) => self.touched_at,
        };
        now.saturating_duration_since(since) >= self.ttl
    }
}

/// Concurrent map with expiry and a soft entry bound.
///
/// When an insert of a new key finds the cache full, expired entries are
/// purged first. If that frees nothing, a batch of the least recently
/// touched entries is evicted in a single pass. Concurrent inserts of distinct new keys may overshoot the
/// bound by the number of racing writers.
pub struct TtlCache<K, V> {
    map: DashMap<K, Slot<V>>,
    expiry: Expiry,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(expiry: Expiry, max_entries: usize) -> Result<Self, CacheConfigError> {
        if max_entries == 0 {
            return Err(CacheConfigError::ZeroCapacity);
        }
        if expiry.ttl().is_zero() {
            return Err(CacheConfigError::ZeroTtl);
        }
        Ok(Self {
            map: DashMap::new(),
            expiry,
            max_entries,
        })
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Live value for `key`, refreshing its access time
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let now = Instant::now();
        {
            let mut slot = self.map.get_mut(key)?;
            if !slot.is_expired(self.expiry, now) {
                slot.touched_at = now;
                return Some(slot.value.clone());
            }
        }
        self.map
            .remove_if(key, |_, slot| slot.is_expired(self.expiry, now));
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.expiry.ttl());
    }

    /// Insert with a TTL that overrides the cache default for this entry only
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.make_room_for(&key);
        self.map.insert(key, Slot::new(value, ttl, Instant::now()));
    }

    /// Run `f` against the live value for `key` while holding its entry lock.
    ///
    /// A missing or stale entry is (re)created from `init` first. Nothing else
    /// can read or write `key` until `f` returns, so `f` must not touch this
    /// cache.
    pub fn with_entry<R>(&self, key: K, init: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        // Eviction walks other shards; it must finish before the entry lock is taken.
        self.make_room_for(&key);

        let now = Instant::now();
        let ttl = self.expiry.ttl();
        let mut slot = match self.map.entry(key) {
            Entry::Occupied(occupied) => {
                let mut slot = occupied.into_ref();
                if slot.is_expired(self.expiry, now) {
                    *slot = Slot::new(init(), ttl, now);
                }
                slot
            }
            Entry::Vacant(vacant) => vacant.insert(Slot::new(init(), ttl, now)),
        };
        slot.touched_at = now;
        f(&mut slot.value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, slot)| slot.value)
    }

    /// Drop every stale entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map
            .retain(|_, slot| !slot.is_expired(self.expiry, now));
        before.saturating_sub(self.map.len())
    }

    fn make_room_for(&self, key: &K) {
        if self.map.len() < self.max_entries || self.map.contains_key(key) {
            return;
        }

        let purged = self.purge_expired();
        let overflow = (self.map.len() + 1).saturating_sub(self.max_entries);
        let mut evicted = 0usize;
        if overflow > 0 {
            let batch = overflow.max(self.max_entries / EVICTION_BATCH_DIVISOR);
            for victim in self.least_recently_touched(batch) {
                if self.map.remove(&victim).is_some() {
                    evicted += 1;
                }
            }
        }

        tracing::debug!(purged, evicted, max_entries = self.max_entries, "Cache pressure");
    }

    /// The `n` keys with the oldest access times, in no particular order
    fn least_recently_touched(&self, n: usize) -> Vec<K> {
        let mut candidates: Vec<(Instant, K)> = self
            .map
            .iter()
            .map(|entry| (entry.value().touched_at, entry.key().clone()))
            .collect();
        if n < candidates.len() {
            candidates.select_nth_unstable_by_key(n, |(touched_at, _)| *touched_at);
            candidates.truncate(n);
        }
        candidates.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cache(ttl_secs: u64, max: usize) -> TtlCache<String, u32> {
        TtlCache::new(Expiry::AfterWrite(Duration::from_secs(ttl_secs)), max).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert_eq!(
            TtlCache::<String, u32>::new(Expiry::AfterWrite(Duration::from_secs(1)), 0).err(),
            Some(CacheConfigError::ZeroCapacity)
        );
        assert_eq!(
            TtlCache::<String, u32>::new(Expiry::AfterAccess(Duration::ZERO), 10).err(),
            Some(CacheConfigError::ZeroTtl)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_after_write_ignores_reads() {
        let cache = write_cache(10, 10);
        cache.insert("a".to_string(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl_override() {
        let cache = write_cache(300, 10);
        cache.insert_with_ttl("short".to_string(), 1, Duration::from_secs(60));
        cache.insert("long".to_string(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&"short".to_string()), None);
        assert_eq!(cache.get(&"long".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_after_access_is_refreshed_by_use() {
        let cache: TtlCache<String, u32> =
            TtlCache::new(Expiry::AfterAccess(Duration::from_secs(10)), 10).unwrap();

        cache.with_entry("k".to_string(), || 0, |v| *v += 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.with_entry("k".to_string(), || 0, |v| *v += 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.with_entry("k".to_string(), || 0, |v| *v), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        // Stale entry is rebuilt from the initializer
        assert_eq!(cache.with_entry("k".to_string(), || 100, |v| *v), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_least_recently_touched_when_full() {
        let cache = write_cache(300, 3);
        cache.insert("a".to_string(), 1);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.insert("b".to_string(), 2);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.insert("c".to_string(), 3);
        tokio::time::advance(Duration::from_millis(1)).await;

        // "a" becomes the most recently touched
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        tokio::time::advance(Duration::from_millis(1)).await;

        cache.insert("d".to_string(), 4);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"d".to_string()), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pressure_prefers_expired_entries() {
        let cache = write_cache(300, 2);
        cache.insert_with_ttl("stale".to_string(), 1, Duration::from_secs(1));
        cache.insert("fresh".to_string(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert("new".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"fresh".to_string()), Some(2));
        assert_eq!(cache.get(&"new".to_string()), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_a_batch() {
        let cache = write_cache(300, 32);
        for i in 0..32 {
            cache.insert(format!("k{i}"), i);
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        cache.insert("new".to_string(), 99);

        // 32 / 16 = 2 evicted, then one inserted
        assert_eq!(cache.len(), 31);
        assert_eq!(cache.get(&"k0".to_string()), None);
        assert_eq!(cache.get(&"k1".to_string()), None);
        assert_eq!(cache.get(&"k2".to_string()), Some(2));
        assert_eq!(cache.get(&"new".to_string()), Some(99));

        // Room is left, so the next new key evicts nothing
        cache.insert("newer".to_string(), 100);
        assert_eq!(cache.len(), 32);
        assert_eq!(cache.get(&"k2".to_string()), Some(2));
    }

    #[test]
    fn test_overwrite_existing_key_does_not_evict() {
        let cache = write_cache(300, 2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()), Some(10));
        assert_eq!(cache.get(&"b".to_string()), Some(2));
    }

    #[test]
    fn test_with_entry_is_linearizable_across_threads() {
        let cache = std::sync::Arc::new(write_cache(300, 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cache.with_entry("hits".to_string(), || 0, |v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get(&"hits".to_string()), Some(8000));
    }
}
