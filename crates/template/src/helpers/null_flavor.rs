//! Helpers that treat CDA `nullFlavor` placeholders as missing data.
//!
//! CDA marks absent values with objects like `{"nullFlavor": "UNK"}` instead of leaving
//! them out. Templates test for presence with [`all_values_null_flavor`] so such
//! placeholders never produce output.

use super::{arg, HelperContext, HelperError, HelperFn};
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("concatDefined", concat_defined),
    ("concatDefinedV2", concat_defined),
    ("nullFlavorAwareOr", null_flavor_aware_or),
    ("parseReferenceData", parse_reference_data),
];

static REPEATED_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("static regex"));

/// True when `value` holds nothing but null flavors and nulls.
///
/// An object whose only key is a truthy `nullFlavor` counts as null. `classCode` members are
/// ignored, since they classify rather than carry data. Any other primitive, `undefined`
/// included, is data.
pub(crate) fn all_values_null_flavor(value: &Value) -> bool {
    let mut queue = VecDeque::from([value.clone()]);
    while let Some(current) = queue.pop_front() {
        match &current {
            Value::Null => {}
            Value::Object(map) => {
                if map.len() == 1 && map.get("nullFlavor").is_some_and(Value::is_truthy) {
                    continue;
                }
                queue.extend(
                    map.iter()
                        .filter(|(key, _)| key.as_str() != "classCode")
                        .map(|(_, v)| v.clone()),
                );
            }
            Value::Array(items) => queue.extend(items.iter().cloned()),
            _ => return false,
        }
    }
    true
}

fn is_defined(value: &Value) -> bool {
    !value.is_nullish() && !all_values_null_flavor(value)
}

/// Concatenates the JSON text of every argument that carries data.
fn concat_defined(args: &[Value], _: &mut HelperContext<'_, '_>) -> Result<Value, HelperError> {
    Ok(Value::String(
        args.iter()
            .filter(|v| is_defined(v))
            .map(|v| v.to_json().to_string())
            .collect(),
    ))
}

fn null_flavor_aware_or(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> Result<Value, HelperError> {
    let any = args.iter().any(|value| match value {
        Value::Object(_) | Value::Array(_) | Value::Null => !all_values_null_flavor(value),
        other => other.is_truthy(),
    });
    Ok(Value::Bool(any))
}

/// JSON-escapes free text for embedding in a JSON string literal.
fn parse_reference_data(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> Result<Value, HelperError> {
    Ok(Value::String(reference_text(&arg(args, 0))))
}

pub(crate) fn reference_text(value: &Value) -> String {
    if value.is_nullish() {
        return String::new();
    }
    let json = value.to_json().to_string();
    // drop the surrounding quotes, or brackets for non-strings
    let inner = json
        .get(1..json.len().saturating_sub(1))
        .unwrap_or_default();
    REPEATED_SPACES.replace_all(inner, " ").trim().to_string()
}
