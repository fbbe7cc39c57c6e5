//! Entry merging by resource identity.

use crate::{entries, with_entries, MergeResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// What makes two entries the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResourceKey {
    resource_type: String,
    version_id: Option<String>,
    id: Option<String>,
}

impl ResourceKey {
    /// `None` for entries without a typed resource; those are never merged.
    fn of(entry: &Value) -> Option<Self> {
        let resource = entry.get("resource")?;
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
        Some(Self {
            resource_type: text(resource.get("resourceType"))?,
            version_id: text(resource.get("meta").and_then(|m| m.get("versionId"))),
            id: text(resource.get("id")),
        })
    }
}

/// Folds entries sharing a [`ResourceKey`] into the first one, keeping first-seen order.
pub(crate) fn merge_entries(bundle: &Value) -> MergeResult<Value> {
    let Some(entries) = entries(bundle)? else {
        return Ok(bundle.clone());
    };

    let mut merged: Vec<Value> = Vec::with_capacity(entries.len());
    let mut positions: HashMap<ResourceKey, usize> = HashMap::new();
    for entry in entries {
        let Some(key) = ResourceKey::of(entry) else {
            merged.push(entry.clone());
            continue;
        };
        match positions.get(&key) {
            Some(&at) => deep_merge(&mut merged[at], entry),
            None => {
                positions.insert(key, merged.len());
                merged.push(entry.clone());
            }
        }
    }

    if merged.len() < entries.len() {
        tracing::debug!(before = entries.len(), after = merged.len(), "merged bundle entries");
    }
    Ok(with_entries(bundle, merged))
}

/// Merges `source` into `target`.
///
/// Objects merge key by key, arrays concatenate and drop repeated items, and anything else is
/// replaced by `source`.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            target.extend(source.iter().cloned());
            dedup_by_content(target);
        }
        (target, source) => *target = source.clone(),
    }
}

/// Drops items whose serialized content was already seen, keeping the first of each.
fn dedup_by_content(items: &mut Vec<Value>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(content_hash(item)));
}

fn content_hash(value: &Value) -> String {
    hex::encode(Sha256::digest(value.to_string().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(entries: Value) -> Value {
        json!({"resourceType": "Bundle", "type": "batch", "entry": entries})
    }

    #[test]
    fn same_identity_arrays_concatenate_without_duplicates() {
        let input = bundle(json!([
            {"resource": {"resourceType": "Patient", "id": "1", "tags": ["1", "2"]}},
            {"resource": {"resourceType": "Patient", "id": "1", "tags": ["2", "3"]}}
        ]));
        let out = merge_entries(&input).expect("Failed to merge");
        assert_eq!(
            out["entry"],
            json!([{"resource": {"resourceType": "Patient", "id": "1", "tags": ["1", "2", "3"]}}])
        );
        assert_eq!(out["type"], "batch");
    }

    #[test]
    fn different_resource_types_never_combine() {
        let input = bundle(json!([
            {"resource": {"resourceType": "Patient", "id": "1"}},
            {"resource": {"resourceType": "Practitioner", "id": "1"}}
        ]));
        let out = merge_entries(&input).expect("Failed to merge");
        assert_eq!(out["entry"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn version_ids_are_part_of_the_identity() {
        let input = bundle(json!([
            {"resource": {"resourceType": "Patient", "id": "1", "meta": {"versionId": "1"}}},
            {"resource": {"resourceType": "Patient", "id": "1", "meta": {"versionId": "2"}}},
            {"resource": {"resourceType": "Patient", "id": "1", "meta": {"versionId": "1"}, "active": true}}
        ]));
        let out = merge_entries(&input).expect("Failed to merge");
        let entries = out["entry"].as_array().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["resource"]["active"], true);
    }

    #[test]
    fn later_scalars_win_and_objects_merge_recursively() {
        let mut target = json!({"status": "draft", "code": {"text": "a", "coding": [{"code": "1"}]}});
        deep_merge(
            &mut target,
            &json!({"status": "final", "code": {"coding": [{"code": "1"}, {"code": "2"}]}}),
        );
        assert_eq!(
            target,
            json!({"status": "final", "code": {"text": "a", "coding": [{"code": "1"}, {"code": "2"}]}})
        );
    }

    #[test]
    fn untyped_entries_are_kept_as_they_are() {
        let input = bundle(json!([{"fullUrl": "x"}, {"fullUrl": "x"}]));
        let out = merge_entries(&input).expect("Failed to merge");
        assert_eq!(out["entry"].as_array().map(Vec::len), Some(2));
    }
}
