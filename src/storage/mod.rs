//! Storage Engine Module
//!
//! This module provides the core storage functionality for memkv:
//! a sharded key-value map whose keys each carry a timed exclusive lock,
//! with expiry checked lazily on access.
//!
//! ## Features
//!
//! - **Sharded Storage**: 64 independent shards reduce contention on the map
//! - **Per-Key Locks**: Writers to the same key are serialized, with a bounded
//!   wait and takeover of stale holders
//! - **Consistent Reads**: Readers snapshot value and expiry together
//! - **Lazy Expiry**: Expired keys are removed when they are next retrieved
//!
//! ## Example
//!
//! ```
//! use memkv::storage::{LockConfig, StorageEngine, StorageError};
//! use memkv::protocol::Condition;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::with_config(
//!     LockConfig::default().with_acquire_timeout(Duration::from_secs(1)),
//! );
//!
//! engine.store("name", Bytes::from("Ariz"), None, Some(Condition::CreateOnly)).unwrap();
//! assert_eq!(engine.retrieve("name").unwrap(), Bytes::from("Ariz"));
//! assert_eq!(engine.retrieve("other"), Err(StorageError::KeyNotFound));
//! ```

pub mod engine;
pub mod lock;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, StorageError, StorageResult, StorageStats, StoreOutcome};
pub use lock::{KeyGuard, KeyLock, LockConfig, LockTimedOut};
