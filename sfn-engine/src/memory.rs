//! # In-Memory Engine
//!
//! Provide the in-process backend with sharded locking, TTL-aware lookups,
//! glob key enumeration, and an optional byte budget.
//!
//! ## Usage
//!
//! - Use `MemoryEngine::new()` for a default sharded engine with unlimited
//!   capacity.
//! - Use `MemoryEngine::with_shard_count_and_capacity` to enforce a byte
//!   limit; writes past the limit fail instead of evicting.
//! - Use `start_expirer` to enable active TTL cleanup in the background.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **Arc-backed Buffers**: Values are `Arc<[u8]>` to avoid extra copies.
//! 3. **TTL Fast Path**: Expiration is checked on access for O(1) reads.
//! 4. **Strategy Pattern**: Implements `KVEngine` to keep callers decoupled.
//!
//! ## Structure Overview
//!
//! ```text
//! MemoryEngine
//!   └── shards: Vec<Shard>
//!         └── Shard
//!               └── inner: RwLock<HashMap<Arc<[u8]>, Entry>>
//!                     └── Entry { value, expires_at }
//! ```

use std::hash::{BuildHasher, Hasher};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, RecvTimeoutError, Sender},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::engine::KVEngine;
use crate::error::{EngineError, EngineResult};
use crate::glob::glob_match;

/// Default shards = CPU count * multiplier to reduce lock contention.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

#[derive(Debug)]
struct Entry {
    value: Arc<[u8]>,
    // Absolute expiration timestamp.
    expires_at: Option<Instant>,
}

impl Entry {
    /// Returns true when the entry has expired at `now`.
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

type ShardMap = HashMap<Arc<[u8]>, Entry, RandomState>;

#[derive(Debug)]
struct Shard {
    /// Per-shard lock to reduce contention on multi-core workloads.
    inner: RwLock<ShardMap>,
}

/// Sharded in-memory implementation of `KVEngine`.
#[derive(Debug)]
pub struct MemoryEngine {
    shards: Vec<Shard>,
    /// Bitmask for fast shard selection (power-of-two shard count).
    shard_mask: usize,
    /// Hash state used to pick shards deterministically.
    hash_state: RandomState,
    /// Maximum allowed bytes (key + value) across all shards.
    max_bytes: usize,
    /// Global byte usage, updated on insert/remove.
    used_bytes: AtomicUsize,
}

/// Handle for the background expiration sweeper.
///
/// Call `stop` to wake the thread and join it. Dropping the handle also
/// ends the thread, without waiting for it.
pub struct ExpirationHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    /// Stops the sweeper and waits for the thread to finish.
    ///
    /// The sweeper wakes immediately, so this waits at most for a purge that
    /// is already running.
    pub fn stop(mut self) {
        // Disconnecting the channel interrupts the sweeper's wait.
        drop(self.stop.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates a new engine with a default shard count based on CPU parallelism.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        let shard_count = threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER);
        Self::with_shard_count(shard_count)
    }

    /// Creates a new engine with a caller-provided shard count.
    ///
    /// The count is normalized to the next power of two to enable fast masking.
    pub fn with_shard_count(shards: usize) -> Self {
        Self::with_shard_count_and_capacity(shards, usize::MAX)
    }

    /// Creates a new engine with shard count and a byte capacity limit.
    pub fn with_shard_count_and_capacity(shards: usize, max_bytes: usize) -> Self {
        let shard_count = normalize_shard_count(shards);
        let hash_state = RandomState::new();
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(Shard {
                inner: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            });
        }

        MemoryEngine {
            shards: shard_vec,
            shard_mask: shard_count - 1,
            hash_state,
            max_bytes,
            used_bytes: AtomicUsize::new(0),
        }
    }

    /// Bytes currently accounted to live and not-yet-purged entries.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Removes expired entries across all shards.
    ///
    /// This is an O(n) scan and is intended for a periodic background sweep.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut inner = shard.inner.write();
            let mut freed = 0;
            inner.retain(|key, entry| {
                if entry.is_expired(now) {
                    freed += entry_size(key, &entry.value);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            self.used_bytes.fetch_sub(freed, Ordering::Relaxed);
        }
        removed
    }

    /// Starts a background thread that periodically removes expired entries.
    ///
    /// The returned handle must be stopped to avoid leaking the thread.
    pub fn start_expirer(self: &Arc<Self>, interval: Duration) -> ExpirationHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let (stop, wake) = mpsc::channel::<()>();
        let engine = Arc::clone(self);

        let join = std::thread::spawn(move || loop {
            match wake.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    engine.purge_expired(Instant::now());
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        ExpirationHandle {
            stop: Some(stop),
            join: Some(join),
        }
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        &self.shards[(hasher.finish() as usize) & self.shard_mask]
    }

    fn insert(&self, key: Vec<u8>, value: Vec<u8>, expires_at: Option<Instant>) -> EngineResult<()> {
        let shard = self.shard_for(&key);
        let mut inner = shard.inner.write();
        let new_size = key.len() + value.len();
        let old_size = inner
            .get(key.as_slice())
            .map(|entry| key.len() + entry.value.len())
            .unwrap_or(0);

        let used = self.used_bytes.load(Ordering::Relaxed);
        if new_size > old_size && used - old_size.min(used) + new_size > self.max_bytes {
            return Err(EngineError::OutOfMemory {
                requested: new_size,
                used,
                limit: self.max_bytes,
            });
        }

        let entry = Entry {
            value: Arc::from(value),
            expires_at,
        };
        match inner.get_mut(key.as_slice()) {
            Some(existing) => *existing = entry,
            None => {
                inner.insert(Arc::from(key), entry);
            }
        }

        if new_size >= old_size {
            self.used_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            self.used_bytes.fetch_sub(old_size - new_size, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl KVEngine for MemoryEngine {
    /// Looks up a key and returns its value if present.
    ///
    /// Expired entries are removed on access to keep memory usage stable.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Arc<[u8]>>> {
        let shard = self.shard_for(key);
        let now = Instant::now();
        {
            let inner = shard.inner.read();
            match inner.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(Arc::clone(&entry.value))),
                Some(_) => {}
            }
        }

        let mut inner = shard.inner.write();
        if let Some(entry) = inner.get(key) {
            if entry.is_expired(now) {
                let size = entry_size(key, &entry.value);
                inner.remove(key);
                self.used_bytes.fetch_sub(size, Ordering::Relaxed);
            }
        }
        Ok(None)
    }

    fn set(&self, key: Vec<u8>, value: Vec<u8>) -> EngineResult<()> {
        self.insert(key, value, None)
    }

    fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> EngineResult<()> {
        // A TTL past the clock's range never expires.
        self.insert(key, value, Instant::now().checked_add(ttl))
    }

    /// Deletes a key and returns whether a live entry was removed.
    ///
    /// Expired entries are treated as missing to match Redis semantics.
    fn delete(&self, key: &[u8]) -> EngineResult<bool> {
        let shard = self.shard_for(key);
        let now = Instant::now();
        let mut inner = shard.inner.write();

        match inner.remove(key) {
            Some(entry) => {
                self.used_bytes
                    .fetch_sub(entry_size(key, &entry.value), Ordering::Relaxed);
                Ok(!entry.is_expired(now))
            }
            None => Ok(false),
        }
    }

    /// Collects live keys matching `pattern`, shard by shard.
    ///
    /// The order is unspecified, like Redis `KEYS`.
    fn keys(&self, pattern: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        let now = Instant::now();
        let mut keys = Vec::new();
        for shard in &self.shards {
            let inner = shard.inner.read();
            keys.extend(
                inner
                    .iter()
                    .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
                    .map(|(key, _)| key.to_vec()),
            );
        }
        Ok(keys)
    }
}

fn entry_size(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len()
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    let count = count.max(1);
    count.next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let engine = MemoryEngine::with_shard_count(4);
        engine.set(b"alpha".to_vec(), b"value".to_vec()).unwrap();
        let value = engine.get(b"alpha").unwrap().unwrap();
        assert_eq!(&*value, b"value");
    }

    #[test]
    fn delete_removes_key() {
        let engine = MemoryEngine::with_shard_count(2);
        engine.set(b"alpha".to_vec(), b"value".to_vec()).unwrap();
        assert!(engine.delete(b"alpha").unwrap());
        assert!(!engine.delete(b"alpha").unwrap());
        assert!(engine.get(b"alpha").unwrap().is_none());
        assert_eq!(engine.used_bytes(), 0);
    }

    #[test]
    fn ttl_hides_value() {
        let engine = MemoryEngine::with_shard_count(2);
        engine
            .set_with_ttl(b"alpha".to_vec(), b"value".to_vec(), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(engine.get(b"alpha").unwrap().is_none());
        assert_eq!(engine.used_bytes(), 0);
    }

    #[test]
    fn plain_set_clears_previous_ttl() {
        let engine = MemoryEngine::with_shard_count(2);
        engine
            .set_with_ttl(b"alpha".to_vec(), b"old".to_vec(), Duration::from_millis(1))
            .unwrap();
        engine.set(b"alpha".to_vec(), b"new".to_vec()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(&*engine.get(b"alpha").unwrap().unwrap(), b"new");
    }

    #[test]
    fn purge_expired_removes_entries() {
        let engine = MemoryEngine::with_shard_count(2);
        engine
            .set_with_ttl(b"alpha".to_vec(), b"value".to_vec(), Duration::from_millis(1))
            .unwrap();
        engine.set(b"beta".to_vec(), b"value".to_vec()).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let removed = engine.purge_expired(Instant::now());
        assert_eq!(removed, 1);
        assert!(engine.get(b"alpha").unwrap().is_none());
        assert!(engine.get(b"beta").unwrap().is_some());
    }

    #[test]
    fn expirer_thread_clears_expired() {
        let engine = Arc::new(MemoryEngine::with_shard_count(2));
        engine
            .set_with_ttl(b"alpha".to_vec(), b"value".to_vec(), Duration::from_millis(1))
            .unwrap();

        let handle = engine.start_expirer(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();

        assert_eq!(engine.used_bytes(), 0);
    }

    #[test]
    fn stopping_expirer_does_not_wait_for_interval() {
        let engine = Arc::new(MemoryEngine::with_shard_count(2));
        let handle = engine.start_expirer(Duration::from_secs(60));

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn huge_ttl_never_expires() {
        let engine = MemoryEngine::with_shard_count(2);
        engine
            .set_with_ttl(b"forever".to_vec(), b"1".to_vec(), Duration::MAX)
            .unwrap();
        assert_eq!(&*engine.get(b"forever").unwrap().unwrap(), b"1");
        assert_eq!(engine.purge_expired(Instant::now()), 0);
    }

    #[test]
    fn keys_filters_by_pattern_and_expiry() {
        let engine = MemoryEngine::with_shard_count(4);
        engine.set(b"p:a".to_vec(), b"1".to_vec()).unwrap();
        engine.set(b"p:b".to_vec(), b"1".to_vec()).unwrap();
        engine.set(b"q:a".to_vec(), b"1".to_vec()).unwrap();
        engine
            .set_with_ttl(b"p:gone".to_vec(), b"1".to_vec(), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let mut keys = engine.keys(b"p:*").unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"p:a".to_vec(), b"p:b".to_vec()]);
    }

    #[test]
    fn writes_past_capacity_fail() {
        let engine = MemoryEngine::with_shard_count_and_capacity(1, 10);
        engine.set(b"a".to_vec(), b"1234".to_vec()).unwrap();
        let err = engine.set(b"b".to_vec(), b"123456".to_vec()).unwrap_err();
        assert!(matches!(err, EngineError::OutOfMemory { requested: 7, used: 5, limit: 10 }));

        // Shrinking or same-size overwrites are always allowed.
        engine.set(b"a".to_vec(), b"12".to_vec()).unwrap();
        engine.set(b"b".to_vec(), b"123456".to_vec()).unwrap();
        assert_eq!(engine.used_bytes(), 10);
    }
}
