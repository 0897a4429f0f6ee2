//! Command Handler Module
//!
//! This module is the single entry point that turns a command line into a
//! result: it runs the parser and hands the resulting operation to the
//! storage engine.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command Parser  │  (protocol module)
//! └────────┬────────┘
//!          │ Operation
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `STORE key value [EX seconds] [NX|XX]`
//! - `RETRIEVE key`

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandError, CommandHandler};
