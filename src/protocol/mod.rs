//! Command Language
//!
//! This module implements the textual command language spoken by memkv
//! clients and the reply format sent back to them.
//!
//! ## Modules
//!
//! - `types`: `Operation`, `Condition`, keywords and the `Reply` encoding
//! - `parser`: Pure parser from a command line to an `Operation`
//!
//! ## Example
//!
//! ```
//! use memkv::protocol::{parse_command, Condition, OperationKind};
//!
//! let op = parse_command("STORE session abc EX 60 NX").unwrap();
//! match op.kind {
//!     OperationKind::Store { expiry_secs, condition, .. } => {
//!         assert_eq!(expiry_secs, Some(60));
//!         assert_eq!(condition, Some(Condition::CreateOnly));
//!     }
//!     _ => unreachable!(),
//! }
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_command, ParseError, ParseResult};
pub use types::{Condition, Operation, OperationKind, Reply};
