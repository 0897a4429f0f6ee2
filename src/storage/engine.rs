//! Thread-Safe Storage Engine with Per-Key Locking and Lazy Expiry
//!
//! This module implements the core storage engine for memkv.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Maps**: The key space is split into shards, each guarded by an
//!    `RwLock`. The shard lock only protects the map structure (adding or
//!    removing a key's slot).
//! 2. **Per-Key Slots**: Each key owns a [`KeyLock`] that serializes writers and
//!    an `RwLock<Option<Entry>>` that readers snapshot.
//! 3. **Lazy Expiry**: Expired keys are removed only when a retrieve touches
//!    them. Nothing scans the map in the background.
//! 4. **No Empty Slots**: A slot left without an entry (a skipped or timed-out
//!    store on a new key, or an expired entry) is unlinked as soon as nobody
//!    holds its key lock, so only stored keys occupy the map.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  └────┬────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │       │ key -> Arc<Slot>                                    │
//! │       ▼                                                     │
//! │  ┌──────────────────────────┐                               │
//! │  │ Slot                     │                               │
//! │  │  KeyLock   (writers)     │                               │
//! │  │  RwLock<Option<Entry>>   │                               │
//! │  └──────────────────────────┘                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is shard, then key lock, then entry. A store never touches the
//! shard lock while it holds a key lock, and lazy removal only ever
//! `try_lock`s a key.

use crate::protocol::{Condition, Operation, OperationKind};
use crate::storage::lock::{KeyLock, LockConfig};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Errors returned by engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The key was never set, or it has expired
    #[error("key not found")]
    KeyNotFound,

    /// The key's lock could not be acquired in time
    #[error("lock on key '{key}' not acquired within {}ms", .waited.as_millis())]
    LockTimeout { key: String, waited: Duration },
}

/// Result type for engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// What a store did to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The key was absent and now holds the value
    Created,
    /// The key was present and its value was replaced
    Updated,
    /// The condition did not hold; nothing changed
    Skipped,
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry, expiring after `ttl` if given.
    ///
    /// A TTL too large to represent is treated as no expiry.
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// Everything the engine keeps for one key.
#[derive(Debug, Default)]
struct Slot {
    lock: KeyLock,
    entry: RwLock<Option<Entry>>,
    /// Set once the slot has been unlinked from its shard
    retired: AtomicBool,
}

impl Slot {
    fn read(&self) -> RwLockReadGuard<'_, Option<Entry>> {
        self.entry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Entry>> {
        self.entry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single shard containing a portion of the key slots.
#[derive(Debug, Default)]
struct Shard {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The main storage engine for memkv.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use memkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.store("name", Bytes::from("Ariz"), None, None).unwrap();
/// assert_eq!(engine.retrieve("name").unwrap(), Bytes::from("Ariz"));
///
/// engine
///     .store("session", Bytes::from("abc123"), Some(Duration::from_secs(60)), None)
///     .unwrap();
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    config: LockConfig,

    /// Statistics: number of keys holding an entry (approximate)
    key_count: AtomicU64,

    /// Statistics: total store operations
    store_count: AtomicU64,

    /// Statistics: total retrieve operations
    retrieve_count: AtomicU64,

    /// Statistics: stores whose condition did not hold
    skipped_count: AtomicU64,

    /// Statistics: expired keys removed on access
    expired_count: AtomicU64,

    /// Statistics: stores that gave up waiting for a key
    lock_timeout_count: AtomicU64,

    /// Statistics: stale key locks taken over
    forced_release_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("config", &self.config)
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new storage engine with default lock settings.
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Creates a new storage engine with the given lock settings.
    pub fn with_config(config: LockConfig) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            config,
            key_count: AtomicU64::new(0),
            store_count: AtomicU64::new(0),
            retrieve_count: AtomicU64::new(0),
            skipped_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            lock_timeout_count: AtomicU64::new(0),
            forced_release_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Returns the slot for `key`, creating it if the key is new.
    fn slot_or_insert(&self, key: &str) -> Arc<Slot> {
        let shard = self.get_shard(key);

        if let Some(slot) = shard.read().get(key) {
            return Arc::clone(slot);
        }

        let mut slots = shard.write();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Applies a parsed operation.
    ///
    /// Returns the value for a retrieve and `None` for a store.
    pub fn apply(&self, op: &Operation) -> StorageResult<Option<Bytes>> {
        match &op.kind {
            OperationKind::Store {
                key,
                value,
                expiry_secs,
                condition,
            } => {
                let ttl = expiry_secs.map(Duration::from_secs);
                self.store(key, value.clone(), ttl, *condition)?;
                Ok(None)
            }
            OperationKind::Retrieve { key } => self.retrieve(key).map(Some),
        }
    }

    /// Writes `value` under `key`, subject to `condition`.
    ///
    /// An entry that has expired but not been removed yet counts as absent.
    /// A condition that does not hold is not an error; the map is left as is
    /// and [`StoreOutcome::Skipped`] is returned.
    pub fn store(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: Option<Condition>,
    ) -> StorageResult<StoreOutcome> {
        self.store_count.fetch_add(1, Ordering::Relaxed);

        let candidate = Entry::new(value, ttl);
        let started = Instant::now();

        loop {
            let slot = self.slot_or_insert(key);
            let remaining = self
                .config
                .acquire_timeout
                .saturating_sub(started.elapsed());

            let guard = match slot.lock.lock(remaining, self.config.max_hold) {
                Ok(guard) => guard,
                Err(_) => {
                    self.lock_timeout_count.fetch_add(1, Ordering::Relaxed);
                    let waited = started.elapsed();
                    warn!(
                        key,
                        waited_ms = waited.as_millis() as u64,
                        "Key lock timed out"
                    );
                    self.reclaim(key, &slot);
                    return Err(StorageError::LockTimeout {
                        key: key.to_string(),
                        waited,
                    });
                }
            };

            if guard.forced() {
                self.forced_release_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key,
                    max_hold_ms = self.config.max_hold.as_millis() as u64,
                    "Force-released stale key lock"
                );
            }

            if slot.retired.load(Ordering::Acquire) {
                // Reclaimed and unlinked after we looked it up
                trace!(key, "Slot retired, retrying");
                continue;
            }

            let mut entry = slot.write();
            let present = entry.as_ref().is_some_and(|e| !e.is_expired());

            let allowed = match condition {
                None => true,
                Some(Condition::CreateOnly) => !present,
                Some(Condition::UpdateOnly) => present,
            };

            if !allowed {
                self.skipped_count.fetch_add(1, Ordering::Relaxed);
                trace!(key, condition = ?condition, "Store condition not met");

                // A skipped store on an absent key must not leave its slot behind
                drop(entry);
                drop(guard);
                if !present {
                    self.reclaim(key, &slot);
                }
                return Ok(StoreOutcome::Skipped);
            }

            if entry.is_none() {
                self.key_count.fetch_add(1, Ordering::Relaxed);
            }
            *entry = Some(candidate);

            return Ok(if present {
                StoreOutcome::Updated
            } else {
                StoreOutcome::Created
            });
        }
    }

    /// Gets a copy of the value for a key.
    ///
    /// Returns [`StorageError::KeyNotFound`] if the key doesn't exist or has
    /// expired. Expired keys are removed here.
    pub fn retrieve(&self, key: &str) -> StorageResult<Bytes> {
        self.retrieve_count.fetch_add(1, Ordering::Relaxed);

        let slot = match self.get_shard(key).read().get(key) {
            Some(slot) => Arc::clone(slot),
            None => return Err(StorageError::KeyNotFound),
        };

        if let Some(entry) = slot.read().as_ref() {
            if !entry.is_expired() {
                return Ok(entry.value.clone());
            }
        }

        self.reclaim(key, &slot);
        Err(StorageError::KeyNotFound)
    }

    /// Clears an expired entry, then unlinks the slot if it is empty and no
    /// writer holds it.
    ///
    /// A slot whose lock is busy stays linked; its holder either fills it or
    /// reclaims it on the way out.
    fn reclaim(&self, key: &str, slot: &Arc<Slot>) {
        let mut slots = self.get_shard(key).write();

        {
            // A writer may have refreshed the entry since we looked
            let mut entry = slot.write();
            if entry.as_ref().is_some_and(Entry::is_expired) {
                *entry = None;
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Expired key removed on access");
            }
        }

        if let Some(_guard) = slot.lock.try_lock() {
            let linked = slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
            if linked && slot.read().is_none() {
                slot.retired.store(true, Ordering::Release);
                slots.remove(key);
            }
        }
    }

    /// Returns the approximate number of keys in the store.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            store_ops: self.store_count.load(Ordering::Relaxed),
            retrieve_ops: self.retrieve_count.load(Ordering::Relaxed),
            skipped_stores: self.skipped_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeout_count.load(Ordering::Relaxed),
            forced_releases: self.forced_release_count.load(Ordering::Relaxed),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total store operations
    pub store_ops: u64,
    /// Total retrieve operations
    pub retrieve_ops: u64,
    /// Stores skipped because their condition did not hold
    pub skipped_stores: u64,
    /// Expired keys removed on access
    pub expired: u64,
    /// Stores that failed with a lock timeout
    pub lock_timeouts: u64,
    /// Stale key locks that were taken over
    pub forced_releases: u64,
}
