//! Placeholder substitution.
//!
//! Templates can emit `%%N%%` tokens where the caller already knows the final value, for
//! example a resource id assigned upstream. Tokens are replaced anywhere in the serialized
//! bundle, keys included.

use crate::MergeResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^%%\d+%%$").expect("static regex"));

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"%%\d+%%").expect("static regex"));

/// Replaces every placeholder of `substitutions` found in `bundle`.
///
/// Dictionary keys that are not `%%N%%` tokens are ignored. Values are inserted JSON-escaped,
/// so they can never break out of the string they land in. Replacement is a single pass: a
/// token inside an inserted value is left as it is.
pub(crate) fn apply(bundle: &Value, substitutions: &HashMap<String, String>) -> MergeResult<Value> {
    let mut values = HashMap::with_capacity(substitutions.len());
    for (token, value) in substitutions {
        if !PLACEHOLDER.is_match(token) {
            tracing::debug!(token = %token, "ignoring substitution key that is not a placeholder");
            continue;
        }
        values.insert(token.as_str(), escaped(value)?);
    }

    let text = serde_json::to_string(bundle)?;
    let mut replaced = 0;
    let substituted = TOKEN.replace_all(&text, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        match values.get(token) {
            Some(value) => {
                replaced += 1;
                value.clone()
            }
            None => token.to_string(),
        }
    });

    if replaced == 0 {
        return Ok(bundle.clone());
    }
    tracing::debug!(replaced, "substituted placeholders");
    Ok(serde_json::from_str(&substituted)?)
}

/// `value` as it reads inside a JSON string literal.
fn escaped(value: &str) -> MergeResult<String> {
    let quoted = serde_json::to_string(value)?;
    Ok(quoted
        .get(1..quoted.len() - 1)
        .unwrap_or_default()
        .to_string())
}
