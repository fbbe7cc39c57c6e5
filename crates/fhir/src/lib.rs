//! FHIR bundle post-processing for converted output.
//!
//! A conversion template emits one `Bundle` for the whole source document. The same resource
//! is often written out by several sections, and some resources are produced nested inside
//! others, so the raw bundle is folded into its final shape here.
//!
//! Responsibilities:
//! - Substitute `%%N%%` placeholder tokens from a request's dictionary
//! - Merge entries that describe the same resource
//! - Lift nested resources flagged `moveToTopLevel` into entries of their own
//! - Collapse encounters that share an identifier, rewriting references to the dropped ones
//!
//! Notes:
//! - Every step works on a copy of its input
//! - A step that fails logs a warning and passes its input on unchanged, so post-processing
//!   never fails a conversion

mod encounter;
mod merge;
mod mover;
mod substitute;

pub use merge::deep_merge;

use serde_json::Value;
use std::collections::HashMap;

/// Errors raised inside a post-processing step. They never leave this crate.
#[derive(Debug, thiserror::Error)]
pub(crate) enum MergeError {
    #[error("bundle field `entry` is not an array")]
    InvalidEntries,

    #[error("bundle entry {0} is not an object")]
    InvalidEntry(usize),

    #[error("rewritten bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results that can fail with a [`MergeError`].
pub(crate) type MergeResult<T> = Result<T, MergeError>;

/// Runs every post-processing step over `bundle`.
///
/// Output that is not a bundle (no `entry` list) passes through unchanged.
pub fn post_process(bundle: Value, substitutions: Option<&HashMap<String, String>>) -> Value {
    let bundle = match substitutions.filter(|s| !s.is_empty()) {
        Some(substitutions) => recover("substitution", bundle, |b| {
            substitute::apply(b, substitutions)
        }),
        None => bundle,
    };
    let bundle = recover("merge", bundle, merge::merge_entries);
    let bundle = recover("move", bundle, mover::move_to_top_level);
    recover("encounter dedup", bundle, encounter::dedup_encounters)
}

fn recover(step: &str, input: Value, f: impl FnOnce(&Value) -> MergeResult<Value>) -> Value {
    match f(&input) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(step, error = %e, "post-processing step failed, keeping its input");
            input
        }
    }
}

/// The bundle's entries, `None` when the value is not a bundle at all.
pub(crate) fn entries(bundle: &Value) -> MergeResult<Option<&Vec<Value>>> {
    match bundle.get("entry") {
        None => Ok(None),
        Some(Value::Array(entries)) => {
            if let Some(i) = entries.iter().position(|e| !e.is_object()) {
                return Err(MergeError::InvalidEntry(i));
            }
            Ok(Some(entries))
        }
        Some(_) => Err(MergeError::InvalidEntries),
    }
}

/// A copy of `bundle` with its entries replaced.
pub(crate) fn with_entries(bundle: &Value, entries: Vec<Value>) -> Value {
    let mut out = bundle.clone();
    if let Some(map) = out.as_object_mut() {
        map.insert("entry".to_string(), Value::Array(entries));
    }
    out
}
