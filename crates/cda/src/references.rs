//! Narrative reference resolution.
//!
//! Coded entries often carry no text of their own and instead point at the section
//! narrative with `<reference value="#id"/>`. This pass replaces such properties with the
//! referenced text so templates can read `originalText._` directly.

use crate::tree::IdIndex;
use crate::{BASE64_KEY, TEXT_KEY};
use serde_json::{json, Map, Value};

const REFERENCE_PROPERTIES: [&str; 3] = ["text", "originaltext", "value"];

pub(crate) fn resolve(node: &mut Value, index: &IdIndex) {
    match node {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if REFERENCE_PROPERTIES.contains(&key.to_lowercase().as_str()) {
                    if let Some(replacement) = map.get(&key).and_then(|v| replacement(v, index)) {
                        map.insert(key.clone(), replacement);
                    }
                }
                if let Some(child) = map.get_mut(&key) {
                    resolve(child, index);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve(item, index);
            }
        }
        _ => {}
    }
}

fn replacement(value: &Value, index: &IdIndex) -> Option<Value> {
    let property = value.as_object()?;
    let existing = property.get(TEXT_KEY).and_then(Value::as_str);

    if let Some(existing) = existing.filter(|_| is_base64(property)) {
        // the inline payload already is the content; a reference would only duplicate it
        return Some(json!({ BASE64_KEY: existing }));
    }

    let reference = property
        .get("reference")
        .and_then(|r| r.get("value"))
        .and_then(Value::as_str)?;
    let id = reference.strip_prefix('#')?;

    if let Some(encoded) = index.base64(id) {
        return Some(json!({ BASE64_KEY: encoded }));
    }

    let found = index.text(id)?;
    let text = match existing {
        Some(existing) if existing != found => format!("{existing} - {found}"),
        _ => found.to_string(),
    };
    Some(json!({ TEXT_KEY: remove_line_breaks(&text) }))
}

fn is_base64(property: &Map<String, Value>) -> bool {
    property
        .get("representation")
        .and_then(Value::as_str)
        .is_some_and(|r| r.eq_ignore_ascii_case("b64"))
}

fn remove_line_breaks(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}
