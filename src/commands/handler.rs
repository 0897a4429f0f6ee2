//! Command Handler Module
//!
//! Takes one command line, parses it, applies it to the storage engine and
//! produces either a [`Reply`] or a [`CommandError`].
//!
//! ## Outcomes
//!
//! | Outcome            | Meaning                                   |
//! |--------------------|-------------------------------------------|
//! | `Reply::Ok`        | store accepted (no payload)               |
//! | `Reply::Value`     | retrieved value                           |
//! | `INVALID`          | the command shape was not recognised      |
//! | `PARSE`            | recognised shape, malformed `EX` numeral  |
//! | `NOTFOUND`         | retrieve on an absent or expired key      |
//! | `TIMEOUT`          | the key's lock was not acquired in time   |
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌───────────────┐    ┌─────────────┐    ┌─────────────┐   │
//! │  │parse_command()│───>│   apply()   │───>│    Reply    │   │
//! │  └───────────────┘    └─────────────┘    └─────────────┘   │
//! │                              │                              │
//! │                              ▼                              │
//! │                       StorageEngine                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{parse_command, ParseError, Reply};
use crate::storage::{StorageEngine, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Every way a command can fail, as seen by the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid command")]
    InvalidCommand,

    #[error("{detail}")]
    Parse { detail: String },

    #[error("key not found")]
    KeyNotFound,

    #[error("lock on key '{key}' not acquired within {}ms", .waited.as_millis())]
    LockTimeout { key: String, waited: Duration },
}

impl CommandError {
    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidCommand => "INVALID",
            CommandError::Parse { .. } => "PARSE",
            CommandError::KeyNotFound => "NOTFOUND",
            CommandError::LockTimeout { .. } => "TIMEOUT",
        }
    }
}

impl From<ParseError> for CommandError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Invalid => CommandError::InvalidCommand,
            err @ ParseError::InvalidExpiry { .. } => CommandError::Parse {
                detail: err.to_string(),
            },
        }
    }
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::KeyNotFound => CommandError::KeyNotFound,
            StorageError::LockTimeout { key, waited } => {
                CommandError::LockTimeout { key, waited }
            }
        }
    }
}

impl From<&CommandError> for Reply {
    fn from(err: &CommandError) -> Self {
        Reply::error(err.code(), err.to_string())
    }
}

/// Runs command lines against a shared storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Returns the engine this handler runs against.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Executes one command line.
    ///
    /// A store that is skipped because its condition did not hold still
    /// returns `Reply::Ok`.
    ///
    /// This may block while waiting for a key lock, up to the engine's
    /// configured acquire timeout.
    pub fn execute(&self, command: &str) -> Result<Reply, CommandError> {
        let op = parse_command(command)?;

        let result = self.storage.apply(&op)?;
        debug!(command = %op, "Command executed");

        Ok(match result {
            Some(value) => Reply::Value(value),
            None => Reply::Ok,
        })
    }

    /// Executes one command line, folding errors into an error reply.
    pub fn respond(&self, command: &str) -> Reply {
        match self.execute(command) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(command, code = err.code(), error = %err, "Command failed");
                Reply::from(&err)
            }
        }
    }
}
