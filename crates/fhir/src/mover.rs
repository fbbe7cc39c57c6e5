//! Lifts nested resources into top-level bundle entries.
//!
//! Templates that build one resource inside another mark the inner holder with
//! `"moveToTopLevel": true` next to its `resource`. The holder is cut out of its parent and
//! appended to the bundle as an entry, without the marker.

use crate::{entries, with_entries, MergeResult};
use serde_json::{Map, Value};

const MOVE_MARKER: &str = "moveToTopLevel";

pub(crate) fn move_to_top_level(bundle: &Value) -> MergeResult<Value> {
    let Some(entries) = entries(bundle)? else {
        return Ok(bundle.clone());
    };

    let original = entries.len();
    let mut entries = entries.clone();
    let mut next = 0;
    // moved entries are swept too, so nesting at any depth ends up flat
    while next < entries.len() {
        let mut moved = Vec::new();
        if let Some(resource) = entries[next].get_mut("resource") {
            extract(resource, &mut moved);
        }
        entries.extend(moved);
        next += 1;
    }

    if entries.len() > original {
        tracing::debug!(moved = entries.len() - original, "moved nested resources to top level");
    }
    Ok(with_entries(bundle, entries))
}

fn is_flagged(value: &Value) -> bool {
    value.get(MOVE_MARKER).and_then(Value::as_bool) == Some(true)
        && value.get("resource").is_some_and(Value::is_object)
}

fn into_entry(holder: Value) -> Value {
    match holder {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| key != MOVE_MARKER)
                .collect(),
        ),
        other => other,
    }
}

fn extract(value: &mut Value, moved: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            let mut kept = Map::new();
            for (key, child) in std::mem::take(map) {
                if is_flagged(&child) {
                    moved.push(into_entry(child));
                } else {
                    kept.insert(key, child);
                }
            }
            *map = kept;
            map.values_mut().for_each(|child| extract(child, moved));
        }
        Value::Array(items) => {
            let (flagged, kept): (Vec<Value>, Vec<Value>) =
                std::mem::take(items).into_iter().partition(is_flagged);
            moved.extend(flagged.into_iter().map(into_entry));
            *items = kept;
            items.iter_mut().for_each(|child| extract(child, moved));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flagged_holders_become_entries() {
        let bundle = json!({"entry": [{
            "fullUrl": "urn:uuid:1",
            "resource": {
                "resourceType": "DiagnosticReport",
                "id": "1",
                "result": [
                    {"reference": "Observation/2"},
                    {"moveToTopLevel": true, "fullUrl": "urn:uuid:2", "resource": {"resourceType": "Observation", "id": "2"}}
                ],
                "extra": {"moveToTopLevel": true, "resource": {"resourceType": "Practitioner", "id": "3"}}
            }
        }]});

        let out = move_to_top_level(&bundle).expect("Failed to move");
        let entries = out["entry"].as_array().expect("entries");
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0]["resource"],
            json!({"resourceType": "DiagnosticReport", "id": "1", "result": [{"reference": "Observation/2"}]})
        );
        assert!(entries.contains(&json!({"fullUrl": "urn:uuid:2", "resource": {"resourceType": "Observation", "id": "2"}})));
        assert!(entries.contains(&json!({"resource": {"resourceType": "Practitioner", "id": "3"}})));
    }

    #[test]
    fn nested_holders_move_recursively() {
        let bundle = json!({"entry": [{"resource": {
            "resourceType": "A",
            "child": {"moveToTopLevel": true, "resource": {
                "resourceType": "B",
                "child": {"moveToTopLevel": true, "resource": {"resourceType": "C"}}
            }}
        }}]});
        let out = move_to_top_level(&bundle).expect("Failed to move");
        assert_eq!(
            out["entry"],
            json!([
                {"resource": {"resourceType": "A"}},
                {"resource": {"resourceType": "B"}},
                {"resource": {"resourceType": "C"}}
            ])
        );
    }

    #[test]
    fn markers_without_a_resource_stay_put() {
        let bundle = json!({"entry": [{"resource": {"resourceType": "A", "x": {"moveToTopLevel": true}}}]});
        assert_eq!(move_to_top_level(&bundle).expect("Failed to move"), bundle);
    }
}
