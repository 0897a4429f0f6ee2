//! # memkv - An In-Memory Key-Value Store
//!
//! memkv is a single-node, memory-resident key-value store that speaks a small
//! line-oriented command language over TCP.
//!
//! ## Features
//!
//! - **Conditional Writes**: `NX` (create only) and `XX` (update only)
//! - **TTL Support**: `EX <seconds>` with lazy expiry on access
//! - **Per-Key Locking**: Writers to one key are serialized, with bounded
//!   waits and takeover of stale lock holders
//! - **Async I/O**: Built on Tokio for handling many concurrent connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               memkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                          ┌────────────────────┤                         │
//! │                          ▼                    ▼                         │
//! │  ┌─────────────────────────┐    ┌──────────────────────────────────┐   │
//! │  │     Command Parser      │    │          StorageEngine           │   │
//! │  │  line -> Operation      │    │  shards -> slots -> KeyLock      │   │
//! │  └─────────────────────────┘    └──────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use memkv::{CommandHandler, Reply, StorageEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
//!
//! assert_eq!(handler.execute("STORE name Ariz EX 60"), Ok(Reply::Ok));
//! assert_eq!(
//!     handler.execute("RETRIEVE name"),
//!     Ok(Reply::Value(Bytes::from("Ariz")))
//! );
//! ```
//!
//! ## Supported Commands
//!
//! - `STORE key value [EX seconds] [NX|XX]`
//! - `RETRIEVE key`
//!
//! Keywords are case-sensitive and tokens are separated by single spaces.
//!
//! ## Module Overview
//!
//! - [`protocol`]: Command parser, operation types and reply encoding
//! - [`storage`]: Thread-safe storage engine with per-key locks and TTL
//! - [`commands`]: Parser + engine composition and the error taxonomy
//! - [`connection`]: Client connection management

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_command, Operation, ParseError, Reply};
pub use storage::{LockConfig, StorageEngine, StorageError};

/// The default port memkv listens on
pub const DEFAULT_PORT: u16 = 3333;

/// The default host memkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of memkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
