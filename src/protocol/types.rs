//! Command Language Data Types
//!
//! This module defines the structured form of a parsed command and the
//! reply sent back over the wire.
//!
//! ## Command Format
//!
//! Commands are single lines of space-separated tokens:
//!
//! ```text
//! STORE <key> <value> [EX <seconds>] [NX|XX]
//! RETRIEVE <key>
//! ```
//!
//! ## Reply Format
//!
//! Each reply starts with a type prefix byte and ends with CRLF:
//! - `+OK` store accepted (no payload)
//! - `$<len>` followed by the value on its own line
//! - `-<CODE> <message>` an error

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in replies
pub const CRLF: &[u8] = b"\r\n";

/// Reply type prefixes
pub mod prefix {
    pub const OK: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const VALUE: u8 = b'$';
}

/// Keywords of the command language. All of them are case-sensitive.
pub mod keyword {
    pub const STORE: &str = "STORE";
    pub const RETRIEVE: &str = "RETRIEVE";
    pub const EX: &str = "EX";
    pub const NX: &str = "NX";
    pub const XX: &str = "XX";

    /// Reserved for queue commands that are not executed.
    pub const QPUSH: &str = "QPUSH";
    pub const QPOP: &str = "QPOP";
}

/// Write condition attached to a `STORE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// `NX` - write only if the key does not exist
    CreateOnly,
    /// `XX` - write only if the key already exists
    UpdateOnly,
}

impl Condition {
    /// Maps a condition keyword to its variant.
    pub fn from_keyword(token: &str) -> Option<Self> {
        match token {
            keyword::NX => Some(Condition::CreateOnly),
            keyword::XX => Some(Condition::UpdateOnly),
            _ => None,
        }
    }

    /// Returns the wire keyword for this condition.
    pub fn keyword(&self) -> &'static str {
        match self {
            Condition::CreateOnly => keyword::NX,
            Condition::UpdateOnly => keyword::XX,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// What a parsed command asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Write `value` under `key`
    Store {
        key: String,
        value: Bytes,
        /// Relative expiry in seconds (None = never expires)
        expiry_secs: Option<u64>,
        condition: Option<Condition>,
    },
    /// Read the value under `key`
    Retrieve { key: String },
}

/// A fully validated command.
///
/// Only the parser constructs these, so an `Operation` in hand is always
/// structurally valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    /// The command text exactly as received
    pub raw: String,
}

impl Operation {
    /// Returns the key the operation targets.
    pub fn key(&self) -> &str {
        match &self.kind {
            OperationKind::Store { key, .. } | OperationKind::Retrieve { key } => key,
        }
    }

    /// Returns the command keyword, for logging.
    pub fn name(&self) -> &'static str {
        match self.kind {
            OperationKind::Store { .. } => keyword::STORE,
            OperationKind::Retrieve { .. } => keyword::RETRIEVE,
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self.kind, OperationKind::Store { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A reply to one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Success without a payload
    Ok,
    /// Success carrying a value
    Value(Bytes),
    /// A failure with a machine-readable code and a human-readable message
    Error { code: &'static str, message: String },
}

impl Reply {
    /// Creates an error reply.
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Reply::Error {
            code,
            message: message.into(),
        }
    }

    /// Serializes the reply to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Ok => {
                buf.push(prefix::OK);
                buf.extend_from_slice(b"OK");
                buf.extend_from_slice(CRLF);
            }
            Reply::Value(data) => {
                buf.push(prefix::VALUE);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Error { code, message } => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(code.as_bytes());
                buf.push(b' ');
                // Messages must stay on one line
                for byte in message.bytes() {
                    buf.push(if byte == b'\r' || byte == b'\n' { b' ' } else { byte });
                }
                buf.extend_from_slice(CRLF);
            }
        }
    }

    /// Returns true if this reply is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Value(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Error { code, message } => write!(f, "(error) {} {}", code, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_ok() {
        assert_eq!(Reply::Ok.serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_serialize_value() {
        let reply = Reply::Value(Bytes::from("hello"));
        assert_eq!(reply.serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_serialize_empty_value() {
        let reply = Reply::Value(Bytes::new());
        assert_eq!(reply.serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_serialize_error_flattens_newlines() {
        let reply = Reply::error("PARSE", "bad\r\nthing");
        assert_eq!(reply.serialize(), b"-PARSE bad  thing\r\n");
        assert!(reply.is_error());
    }

    #[test]
    fn test_condition_keywords() {
        assert_eq!(Condition::from_keyword("NX"), Some(Condition::CreateOnly));
        assert_eq!(Condition::from_keyword("XX"), Some(Condition::UpdateOnly));
        assert_eq!(Condition::from_keyword("nx"), None);
        assert_eq!(Condition::UpdateOnly.to_string(), "XX");
    }

    #[test]
    fn test_operation_accessors() {
        let op = Operation {
            kind: OperationKind::Retrieve {
                key: "name".to_string(),
            },
            raw: "RETRIEVE name".to_string(),
        };
        assert_eq!(op.key(), "name");
        assert_eq!(op.name(), "RETRIEVE");
        assert!(!op.is_store());
        assert_eq!(op.to_string(), "RETRIEVE name");
    }
}
