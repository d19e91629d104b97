//! In-process caches for expensive-to-compute values.
//!
//! Two primitives with a stale-while-revalidate contract:
//!
//! - [`KeyCache`]: multi-key cache that reports staleness and lets the
//!   caller decide whether to serve stale data or refresh.
//! - [`Cache`]: single-value holder that recomputes transparently on
//!   first access past expiry.
//!
//! Neither type is safe for unsynchronized concurrent mutation; callers
//! sharing one across threads of control must add their own lock, and
//! must coordinate so at most one refresh per key is in flight.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Structured cache lookup error. Callers must `set` a key before the
/// first `get`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache key `{0}` not found")]
    NotFound(String),
}

/// One [`KeyCache`] entry.
#[derive(Clone, Debug)]
pub struct CacheValue<V> {
    pub expires_at: DateTime<Utc>,
    pub value: V,
    pub is_refreshing: bool,
}

/// Keyed cache with explicit staleness detection and refresh marking.
///
/// `get` reports a value as stale once its expiry has passed, unless
/// the entry has been flagged with [`KeyCache::set_refreshing`]; the
/// flag suppresses the staleness signal so concurrent readers don't all
/// trigger the same refresh. This is advisory coordination, not a lock:
/// the caller's refresh logic still decides who actually refreshes.
///
/// Entries are never evicted; key churn is the caller's responsibility.
pub struct KeyCache<V> {
    entries: HashMap<String, CacheValue<V>>,
    refresh_interval: Duration,
}

impl<V> KeyCache<V> {
    /// `refresh_interval` is how long a value stays fresh after `set`.
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            refresh_interval,
        }
    }

    /// Returns `(value, is_stale)`.
    ///
    /// `is_stale` is true once the entry expired, unless a refresh is
    /// in progress.
    pub fn get(&self, key: &str) -> Result<(&V, bool), CacheError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        let stale = Utc::now() > entry.expires_at && !entry.is_refreshing;
        Ok((&entry.value, stale))
    }

    /// Store a value, stamping a fresh expiry and clearing the
    /// refreshing flag.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheValue {
                expires_at: Utc::now() + self.refresh_interval,
                value,
                is_refreshing: false,
            },
        );
    }

    /// Mark an entry as currently being refreshed, suppressing the
    /// staleness signal until the next `set`.
    pub fn set_refreshing(&mut self, key: &str) -> Result<(), CacheError> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        entry.is_refreshing = true;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> std::fmt::Debug for KeyCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("entries", &self.entries.len())
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

/// Singleton periodic-refresh cache.
///
/// The value is computed eagerly at construction. `get` recomputes it
/// synchronously (blocking the caller for the duration of the producer)
/// the first time it is observed past expiry; while that recompute is
/// in flight other logical callers are served the previous value.
///
/// In inert mode the producer is never invoked again after
/// construction; once the initial window passes, `get` returns `None`
/// and callers must tolerate the empty result.
pub struct Cache<V> {
    producer: Box<dyn Fn() -> V + Send>,
    value: V,
    expires_at: DateTime<Utc>,
    expiration: Duration,
    updating: bool,
    inert: bool,
}

impl<V: Clone> Cache<V> {
    /// Compute the initial value and start its expiry window.
    pub fn new<F>(expiration: Duration, producer: F) -> Self
    where
        F: Fn() -> V + Send + 'static,
    {
        let value = producer();
        Self {
            producer: Box::new(producer),
            value,
            expires_at: Utc::now() + expiration,
            expiration,
            updating: false,
            inert: false,
        }
    }

    /// Inert variant for test environments: the initial value is still
    /// computed, but never recomputed.
    pub fn new_inert<F>(expiration: Duration, producer: F) -> Self
    where
        F: Fn() -> V + Send + 'static,
    {
        let mut cache = Self::new(expiration, producer);
        cache.inert = true;
        cache
    }

    /// Current value, recomputed past expiry unless a refresh is in
    /// flight or the cache is inert.
    pub fn get(&mut self) -> Option<V> {
        if self.updating {
            return Some(self.value.clone());
        }

        if Utc::now() > self.expires_at {
            if self.inert {
                return None;
            }
            self.updating = true;
            self.value = (self.producer)();
            self.expires_at = Utc::now() + self.expiration;
            self.updating = false;
        }

        Some(self.value.clone())
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("expires_at", &self.expires_at)
            .field("updating", &self.updating)
            .field("inert", &self.inert)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn key_cache_get_on_unset_key_is_not_found() {
        let cache: KeyCache<i32> = KeyCache::new(Duration::seconds(60));
        assert!(matches!(
            cache.get("missing"),
            Err(CacheError::NotFound(key)) if key == "missing"
        ));
    }

    #[test]
    fn key_cache_fresh_after_set() {
        let mut cache = KeyCache::new(Duration::seconds(60));
        cache.set("providers", vec![1, 2, 3]);

        let (value, stale) = cache.get("providers").unwrap();
        assert_eq!(value, &vec![1, 2, 3]);
        assert!(!stale);
    }

    #[test]
    fn key_cache_reports_stale_after_interval() {
        // Zero interval: expired as soon as it is set.
        let mut cache = KeyCache::new(Duration::zero());
        cache.set("k", "v");

        let (value, stale) = cache.get("k").unwrap();
        assert_eq!(*value, "v");
        assert!(stale);
    }

    #[test]
    fn set_refreshing_suppresses_staleness_until_next_set() {
        let mut cache = KeyCache::new(Duration::zero());
        cache.set("k", 1);
        cache.set_refreshing("k").unwrap();

        let (value, stale) = cache.get("k").unwrap();
        assert_eq!(*value, 1);
        assert!(!stale);

        // A new value clears the flag and the entry goes stale again
        // once (immediately, with a zero interval) expired.
        cache.set("k", 2);
        let (value, stale) = cache.get("k").unwrap();
        assert_eq!(*value, 2);
        assert!(stale);
    }

    #[test]
    fn set_refreshing_on_unset_key_is_not_found() {
        let mut cache: KeyCache<i32> = KeyCache::new(Duration::seconds(60));
        assert!(cache.set_refreshing("missing").is_err());
    }

    fn counting_producer(counter: Arc<AtomicUsize>) -> impl Fn() -> usize + Send + 'static {
        move || counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[test]
    fn cache_computes_eagerly_and_serves_without_recompute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = Cache::new(Duration::seconds(60), counting_producer(calls.clone()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(), Some(1));
        assert_eq!(cache.get(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_recomputes_once_past_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Zero expiration: every get observes an expired window.
        let mut cache = Cache::new(Duration::zero(), counting_producer(calls.clone()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.get(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn inert_cache_returns_none_past_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = Cache::new_inert(Duration::zero(), counting_producer(calls.clone()));

        assert_eq!(cache.get(), None);
        assert_eq!(cache.get(), None);
        // Producer ran at construction only.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inert_cache_serves_value_during_initial_window() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache =
            Cache::new_inert(Duration::seconds(60), counting_producer(calls.clone()));

        assert_eq!(cache.get(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
