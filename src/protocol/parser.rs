//! Command Parser
//!
//! Turns a raw command line into a validated [`Operation`]. The parser is
//! pure: it never looks at store state and has no side effects.
//!
//! ## Accepted Shapes
//!
//! Tokens are separated by a single space. Only these arrangements are valid:
//!
//! ```text
//! STORE k v
//! STORE k v NX|XX
//! STORE k v EX <seconds>
//! STORE k v EX <seconds> NX|XX
//! RETRIEVE k
//! ```
//!
//! ## Two Kinds of Failure
//!
//! - [`ParseError::Invalid`]: the shape is not recognised. No detail is given.
//! - [`ParseError::InvalidExpiry`]: the shape is right but the `EX` numeral is
//!   malformed. The numeral is checked before the trailing condition token.

use crate::protocol::types::{keyword, Condition, Operation, OperationKind};
use bytes::Bytes;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;
use tracing::trace;

/// Errors that can occur while parsing a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The token arrangement matches no command shape
    #[error("invalid command")]
    Invalid,

    /// The `EX` argument is not a non-negative integer
    #[error("invalid expiry '{token}': {source}")]
    InvalidExpiry {
        token: String,
        #[source]
        source: ParseIntError,
    },
}

impl ParseError {
    /// Returns true for shape rejections (as opposed to a malformed numeral).
    pub fn is_invalid(&self) -> bool {
        matches!(self, ParseError::Invalid)
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum number of tokens in any command (`STORE k v EX s NX`)
pub const MAX_TOKENS: usize = 6;

/// Parses a command line into an [`Operation`].
///
/// # Example
///
/// ```
/// use memkv::protocol::{parse_command, OperationKind};
///
/// let op = parse_command("RETRIEVE name").unwrap();
/// assert_eq!(op.kind, OperationKind::Retrieve { key: "name".to_string() });
/// ```
pub fn parse_command(input: &str) -> ParseResult<Operation> {
    if input.is_empty() {
        return Err(ParseError::Invalid);
    }

    let tokens: Vec<&str> = input.split(' ').collect();
    if tokens.len() > MAX_TOKENS {
        trace!(tokens = tokens.len(), "Too many tokens");
        return Err(ParseError::Invalid);
    }

    let kind = match tokens.as_slice() {
        [keyword::STORE, rest @ ..] => parse_store(rest)?,
        [keyword::RETRIEVE, key] => OperationKind::Retrieve {
            key: parse_key(key)?,
        },
        [keyword::QPUSH | keyword::QPOP, ..] => {
            trace!(command = tokens[0], "Reserved keyword rejected");
            return Err(ParseError::Invalid);
        }
        _ => return Err(ParseError::Invalid),
    };

    Ok(Operation {
        kind,
        raw: input.to_string(),
    })
}

/// Parses the tokens following `STORE`.
fn parse_store(args: &[&str]) -> ParseResult<OperationKind> {
    let (key, value, expiry_secs, condition) = match *args {
        [key, value] => (key, value, None, None),
        [key, value, cond] => (key, value, None, Some(parse_condition(cond)?)),
        [key, value, keyword::EX, secs] => (key, value, Some(parse_expiry(secs)?), None),
        [key, value, keyword::EX, secs, cond] => {
            let expiry = parse_expiry(secs)?;
            (key, value, Some(expiry), Some(parse_condition(cond)?))
        }
        _ => return Err(ParseError::Invalid),
    };

    Ok(OperationKind::Store {
        key: parse_key(key)?,
        value: Bytes::copy_from_slice(value.as_bytes()),
        expiry_secs,
        condition,
    })
}

fn parse_key(token: &str) -> ParseResult<String> {
    if token.is_empty() {
        return Err(ParseError::Invalid);
    }
    Ok(token.to_string())
}

fn parse_condition(token: &str) -> ParseResult<Condition> {
    Condition::from_keyword(token).ok_or(ParseError::Invalid)
}

fn parse_expiry(token: &str) -> ParseResult<u64> {
    token
        .parse::<u64>()
        .map_err(|source| ParseError::InvalidExpiry {
            token: token.to_string(),
            source,
        })
}

impl FromStr for Operation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_command(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(
        key: &str,
        value: &str,
        expiry_secs: Option<u64>,
        condition: Option<Condition>,
    ) -> OperationKind {
        OperationKind::Store {
            key: key.to_string(),
            value: Bytes::from(value.to_string()),
            expiry_secs,
            condition,
        }
    }

    #[test]
    fn test_parse_store() {
        let op = parse_command("STORE name Ariz").unwrap();
        assert_eq!(op.kind, store("name", "Ariz", None, None));
        assert_eq!(op.raw, "STORE name Ariz");
    }

    #[test]
    fn test_parse_store_with_condition() {
        let op = parse_command("STORE k v NX").unwrap();
        assert_eq!(op.kind, store("k", "v", None, Some(Condition::CreateOnly)));

        let op = parse_command("STORE k v XX").unwrap();
        assert_eq!(op.kind, store("k", "v", None, Some(Condition::UpdateOnly)));
    }

    #[test]
    fn test_parse_store_with_expiry() {
        let op = parse_command("STORE session abc EX 60").unwrap();
        assert_eq!(op.kind, store("session", "abc", Some(60), None));
    }

    #[test]
    fn test_parse_store_with_expiry_and_condition() {
        let op = parse_command("STORE k v EX 10 XX").unwrap();
        assert_eq!(
            op.kind,
            store("k", "v", Some(10), Some(Condition::UpdateOnly))
        );
    }

    #[test]
    fn test_parse_store_zero_expiry() {
        let op = parse_command("STORE k v EX 0").unwrap();
        assert_eq!(op.kind, store("k", "v", Some(0), None));
    }

    #[test]
    fn test_parse_retrieve() {
        let op = parse_command("RETRIEVE name").unwrap();
        assert_eq!(
            op.kind,
            OperationKind::Retrieve {
                key: "name".to_string()
            }
        );
        assert_eq!(op.key(), "name");
    }

    #[test]
    fn test_store_too_few_tokens_is_invalid() {
        assert_eq!(parse_command("STORE k"), Err(ParseError::Invalid));
        assert_eq!(parse_command("STORE"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_malformed_expiry_is_parse_error() {
        let err = parse_command("STORE k v EX notanumber EX").unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidExpiry { ref token, .. } if token == "notanumber"
        ));
        assert!(!err.is_invalid());

        assert!(matches!(
            parse_command("STORE k v EX abc"),
            Err(ParseError::InvalidExpiry { .. })
        ));
    }

    #[test]
    fn test_negative_expiry_is_parse_error() {
        assert!(matches!(
            parse_command("STORE k v EX -5"),
            Err(ParseError::InvalidExpiry { .. })
        ));
    }

    #[test]
    fn test_non_decimal_expiry_is_parse_error() {
        for secs in ["0x10", "0o17", "1.5", "1e3"] {
            let input = format!("STORE k v EX {}", secs);
            assert!(
                matches!(parse_command(&input), Err(ParseError::InvalidExpiry { .. })),
                "{} should be rejected",
                secs
            );
        }
    }

    #[test]
    fn test_too_many_tokens_is_invalid() {
        assert_eq!(parse_command("STORE a b c d NX XX"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_condition_in_wrong_position_is_invalid() {
        // Condition before expiry
        assert_eq!(parse_command("STORE k v NX EX 10"), Err(ParseError::Invalid));
        assert_eq!(parse_command("STORE k v NX 10"), Err(ParseError::Invalid));
        // Something other than EX in the expiry slot
        assert_eq!(parse_command("STORE k v XX 10 NX"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_unknown_trailing_token_is_invalid() {
        assert_eq!(parse_command("STORE k v YY"), Err(ParseError::Invalid));
        assert_eq!(parse_command("STORE k v EX 10 YY"), Err(ParseError::Invalid));
        // A bare EX is only a condition candidate at this length
        assert_eq!(parse_command("STORE k v EX"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(parse_command("store k v"), Err(ParseError::Invalid));
        assert_eq!(parse_command("Retrieve k"), Err(ParseError::Invalid));
        assert_eq!(parse_command("STORE k v nx"), Err(ParseError::Invalid));
        assert_eq!(parse_command("STORE k v ex 10"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_retrieve_arity() {
        assert_eq!(parse_command("RETRIEVE"), Err(ParseError::Invalid));
        assert_eq!(parse_command("RETRIEVE a b"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert_eq!(parse_command(""), Err(ParseError::Invalid));
        assert_eq!(parse_command("   "), Err(ParseError::Invalid));
        assert_eq!(parse_command(" STORE k v"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_empty_key_is_invalid() {
        assert_eq!(parse_command("STORE  v"), Err(ParseError::Invalid));
        assert_eq!(parse_command("RETRIEVE "), Err(ParseError::Invalid));
    }

    #[test]
    fn test_reserved_and_unknown_commands() {
        assert_eq!(parse_command("QPUSH q v"), Err(ParseError::Invalid));
        assert_eq!(parse_command("QPOP q"), Err(ParseError::Invalid));
        assert_eq!(parse_command("DELETE k"), Err(ParseError::Invalid));
    }

    #[test]
    fn test_from_str() {
        let op: Operation = "STORE k v".parse().unwrap();
        assert!(op.is_store());
        assert!("nope".parse::<Operation>().is_err());
    }
}
