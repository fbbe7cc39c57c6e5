//! Tolerant repair of template output.
//!
//! Templates assemble JSON by hand, and conditional sections leave artifacts behind: stray,
//! doubled or trailing commas, empty `""`, `{}` and `[]` values, and pairs with no comma
//! between them. [`repair`] accepts all of these, prunes the empty values, and serializes
//! compact valid JSON.
//!
//! Reduction rules, applied bottom-up:
//!
//! - an empty string value is absent
//! - a pair or array element whose value is absent is dropped
//! - an object or array left with no children is absent itself
//!
//! An absent top-level object or array serializes as `{}` or `[]`.
//!
//! Repair is total. Input that cannot be tokenized or parsed under the relaxed grammar is
//! returned unchanged, and the caller's JSON parse reports the problem.
//!
//! ```
//! assert_eq!(json_repair::repair(r#"{,"a":"b",,"c":"d",}"#), r#"{"a":"b","c":"d"}"#);
//! assert_eq!(json_repair::repair(r#"{"a":""}"#), "{}");
//! ```

mod lexer;
mod parser;

use serde_json::Value;

/// Reasons the relaxed grammar rejected an input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum RepairError {
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedCharacter(char, usize),

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of input")]
    UnexpectedEnd,
}

/// Repairs near-JSON `input` into compact valid JSON, or returns it unchanged.
pub fn repair(input: &str) -> String {
    match try_repair(input) {
        Ok(output) => output,
        Err(error) => {
            tracing::debug!(%error, "JSON repair left input unchanged");
            input.to_string()
        }
    }
}

/// Repairs `input` and parses the result.
///
/// # Errors
///
/// Returns the JSON parse error when the repaired text is still not valid JSON.
pub fn repair_to_value(input: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&repair(input))
}

fn try_repair(input: &str) -> Result<String, RepairError> {
    let tokens = lexer::tokenize(input)?;
    let node = parser::parse(&tokens)?;
    let value = match node.reduce() {
        Some(value) => value,
        None => node.empty_equivalent(),
    };
    Ok(value.to_string())
}
