//! Thread-Safe Store with Expiry Support
//!
//! The store owns two mappings over the same key space:
//!
//! - `values`: key -> value
//! - `expirations`: key -> absolute deadline
//!
//! Every key in `expirations` is also in `values`, and removing a key from
//! `values` removes it from `expirations` in the same critical section. Both
//! maps sit behind a single `RwLock`, so no reader ever sees one map updated
//! without the other.
//!
//! ## Expiry
//!
//! A key whose deadline has passed is never returned, even while it is still
//! physically present. It disappears in one of two ways:
//! 1. **Lazy**: `get` notices it and evicts it.
//! 2. **Active**: the reaper (see `reaper.rs`) purges it on its next tick.
//!
//! Lazy eviction first looks under the read lock. When it sees an expired
//! entry it takes the write lock and checks the deadline again before
//! removing anything. A writer that re-set the key between the two lock
//! acquisitions therefore wins; the stale read is never acted on.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// TTL applied by [`Store::set_ex`] when it is given a zero duration.
///
/// Unlike `set`, where "no ttl" means "never expires", a zero ttl on
/// `set_ex` falls back to this value.
pub const DEFAULT_SETEX_TTL: Duration = Duration::from_secs(3600);

/// Longest TTL the store will record. Longer requests are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key exists and has no expiration.
    Persistent,
    /// The key does not exist or has already expired.
    Missing,
    /// The key expires after this long.
    Remaining(Duration),
}

impl Ttl {
    /// The integer the `TTL` command replies with: `-1`, `-2`, or whole
    /// seconds rounded up so that a live key never reports `0`.
    pub fn to_reply_secs(self) -> i64 {
        match self {
            Ttl::Persistent => -1,
            Ttl::Missing => -2,
            Ttl::Remaining(d) => d.as_millis().div_ceil(1000) as i64,
        }
    }

    /// Inverse of [`Ttl::to_reply_secs`], used on the client side.
    pub fn from_reply_secs(secs: i64) -> Self {
        match secs {
            -1 => Ttl::Persistent,
            s if s < 0 => Ttl::Missing,
            s => Ttl::Remaining(Duration::from_secs(s as u64)),
        }
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    values: HashMap<Bytes, Bytes>,
    expirations: HashMap<Bytes, Instant>,
}

impl Keyspace {
    #[inline]
    fn is_expired(&self, key: &[u8], now: Instant) -> bool {
        self.expirations
            .get(key)
            .map(|deadline| now >= *deadline)
            .unwrap_or(false)
    }

    #[inline]
    fn is_live(&self, key: &[u8], now: Instant) -> bool {
        self.values.contains_key(key) && !self.is_expired(key, now)
    }

    /// Removes a key from both maps. Returns whether a value was present.
    fn remove(&mut self, key: &[u8]) -> bool {
        self.expirations.remove(key);
        self.values.remove(key).is_some()
    }
}

/// The in-memory key-value store.
///
/// Designed to be wrapped in an `Arc` and shared by every connection task
/// and the reaper. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use gedis::storage::{Store, Ttl};
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let store = Store::new();
/// store.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
/// assert_eq!(store.ttl(b"name"), Ttl::Persistent);
///
/// store.set_ex(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(matches!(store.ttl(b"session"), Ttl::Remaining(_)));
/// ```
pub struct Store {
    keyspace: RwLock<Keyspace>,

    /// Number of keys removed because they expired
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Store")
            .field("keys", &stats.keys)
            .field("volatile", &stats.volatile)
            .field("expired", &stats.expired)
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            keyspace: RwLock::new(Keyspace::default()),
            expired_count: AtomicU64::new(0),
        }
    }

    // Every critical section leaves both maps consistent before it can
    // panic, so a poisoned lock still guards valid data.
    fn read(&self) -> RwLockReadGuard<'_, Keyspace> {
        self.keyspace.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.keyspace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a value and clears any expiration on the key.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let mut ks = self.write();
        ks.expirations.remove(&key);
        ks.values.insert(key, value);
    }

    /// Stores a value that expires after `ttl`.
    ///
    /// A zero `ttl` is replaced by [`DEFAULT_SETEX_TTL`].
    pub fn set_ex(&self, key: Bytes, value: Bytes, ttl: Duration) {
        let ttl = if ttl.is_zero() { DEFAULT_SETEX_TTL } else { ttl };
        let deadline = deadline_after(ttl);

        let mut ks = self.write();
        ks.values.insert(key.clone(), value);
        ks.expirations.insert(key, deadline);
    }

    /// Returns the value for a key, or `None` if it is absent or expired.
    ///
    /// An expired key is evicted on the way out.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        {
            let ks = self.read();
            if !ks.is_expired(key, Instant::now()) {
                return ks.values.get(key).cloned();
            }
        }

        // Looked expired under the read lock. Decide again under the write
        // lock: a concurrent SET may have replaced the entry meanwhile.
        let mut ks = self.write();
        if ks.is_expired(key, Instant::now()) {
            ks.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        ks.values.get(key).cloned()
    }

    /// Deletes keys, returning how many of them were live.
    ///
    /// Keys that were present but already expired are removed too, but are
    /// not counted.
    pub fn del<K: AsRef<[u8]>>(&self, keys: &[K]) -> usize {
        let mut ks = self.write();
        let now = Instant::now();
        let mut deleted = 0;

        for key in keys {
            let key = key.as_ref();
            let live = ks.is_live(key, now);
            if ks.remove(key) {
                if live {
                    deleted += 1;
                } else {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        deleted
    }

    /// Sets a key to expire after `ttl`.
    ///
    /// Returns `false` if the key does not exist. An entry that has already
    /// expired is evicted rather than given a new deadline.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> bool {
        let deadline = deadline_after(ttl);
        let mut ks = self.write();
        let now = Instant::now();

        if !ks.values.contains_key(key) {
            return false;
        }
        if ks.is_expired(key, now) {
            ks.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        ks.expirations.insert(Bytes::copy_from_slice(key), deadline);
        true
    }

    /// Returns the remaining lifetime of a key.
    pub fn ttl(&self, key: &[u8]) -> Ttl {
        let ks = self.read();
        let now = Instant::now();

        if !ks.values.contains_key(key) {
            return Ttl::Missing;
        }
        match ks.expirations.get(key) {
            None => Ttl::Persistent,
            Some(deadline) if now >= *deadline => Ttl::Missing,
            Some(deadline) => Ttl::Remaining(*deadline - now),
        }
    }

    /// Returns every live key, sorted.
    ///
    /// Expired keys are filtered out at call time, whether or not the
    /// reaper has reached them yet.
    pub fn keys(&self) -> Vec<Bytes> {
        let ks = self.read();
        let now = Instant::now();

        let mut keys: Vec<Bytes> = ks
            .values
            .keys()
            .filter(|key| !ks.is_expired(key, now))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Discards all values and expirations.
    pub fn flush_db(&self) {
        let mut ks = self.write();
        ks.values.clear();
        ks.expirations.clear();
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// Called by the background reaper. Returns the number of keys removed.
    pub fn purge_expired(&self) -> usize {
        let mut ks = self.write();
        let now = Instant::now();

        let expired: Vec<Bytes> = ks
            .expirations
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            ks.remove(key);
        }

        if !expired.is_empty() {
            self.expired_count
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        expired.len()
    }

    /// Number of stored keys, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let ks = self.read();
        StoreStats {
            keys: ks.values.len(),
            volatile: ks.expirations.len(),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Stored keys, including expired ones not yet evicted
    pub keys: usize,
    /// Keys carrying an expiration
    pub volatile: usize,
    /// Keys evicted because they expired
    pub expired: u64,
}

fn deadline_after(ttl: Duration) -> Instant {
    Instant::now() + ttl.min(MAX_TTL)
}
