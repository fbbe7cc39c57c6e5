//! Encounter deduplication.
//!
//! Documents routinely describe the visit they belong to in more than one place, each copy
//! getting its own generated id. Encounters that share any identifier value are the same
//! visit and are collapsed into the earliest one.

use crate::merge::deep_merge;
use crate::{entries, with_entries, MergeResult};
use serde_json::Value;

const UNKNOWN_STATUS: &str = "unknown";

pub(crate) fn dedup_encounters(bundle: &Value) -> MergeResult<Value> {
    let Some(entries) = entries(bundle)? else {
        return Ok(bundle.clone());
    };

    let mut entries = entries.clone();
    let mut renames: Vec<(String, String)> = Vec::new();
    while let Some((keep, drop)) = find_collision(&entries) {
        let discarded = entries.remove(drop);
        if let Some(rename) = absorb(&mut entries[keep], &discarded) {
            renames.push(rename);
        }
    }

    let deduped = with_entries(bundle, entries);
    if renames.is_empty() {
        return Ok(deduped);
    }

    tracing::debug!(merged = renames.len(), "collapsed duplicate encounters");
    let mut text = serde_json::to_string(&deduped)?;
    // applied in order, so a chain of merges resolves to the final survivor
    for (old, new) in &renames {
        text = text.replace(&format!("\"Encounter/{old}\""), &format!("\"Encounter/{new}\""));
    }
    Ok(serde_json::from_str(&text)?)
}

fn encounter(entry: &Value) -> Option<&Value> {
    entry
        .get("resource")
        .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some("Encounter"))
}

fn identifier_values(resource: &Value) -> Vec<&str> {
    resource
        .get("identifier")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.get("value").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// The first pair of encounter entries, earliest first, that share an identifier value.
fn find_collision(entries: &[Value]) -> Option<(usize, usize)> {
    let encounters: Vec<(usize, Vec<&str>)> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| encounter(entry).map(|r| (i, identifier_values(r))))
        .collect();

    for (a, (keep, values)) in encounters.iter().enumerate() {
        for (drop, others) in &encounters[a + 1..] {
            if values.iter().any(|v| others.contains(v)) {
                return Some((*keep, *drop));
            }
        }
    }
    None
}

/// Merges `discarded` into `survivor`, returning the `(discarded id, survivor id)` rename.
fn absorb(survivor: &mut Value, discarded: &Value) -> Option<(String, String)> {
    let (Some(target), Some(source)) = (survivor.get_mut("resource"), discarded.get("resource"))
    else {
        return None;
    };

    let survivor_id = target.get("id").cloned();
    let status = merged_status(target.get("status"), source.get("status"));
    deep_merge(target, source);

    if let Some(resource) = target.as_object_mut() {
        match &survivor_id {
            Some(id) => {
                resource.insert("id".to_string(), id.clone());
            }
            None => {
                resource.remove("id");
            }
        }
        if let Some(status) = status {
            resource.insert("status".to_string(), status);
        }
        if let Some(Value::Array(identifiers)) = resource.get_mut("identifier") {
            dedup_identifiers(identifiers);
        }
    }

    let old = source.get("id").and_then(Value::as_str)?;
    let new = survivor_id.as_ref().and_then(Value::as_str)?;
    (old != new).then(|| (old.to_string(), new.to_string()))
}

fn merged_status(first: Option<&Value>, second: Option<&Value>) -> Option<Value> {
    let known = |s: &&Value| s.as_str() != Some(UNKNOWN_STATUS);
    match (first, second) {
        (Some(a), Some(b)) => Some((if !known(&a) && known(&b) { b } else { a }).clone()),
        (a, b) => a.or(b).cloned(),
    }
}

/// Keeps one identifier per system+value, preferring the one with strictly more fields.
fn dedup_identifiers(identifiers: &mut Vec<Value>) {
    let mut kept: Vec<Value> = Vec::with_capacity(identifiers.len());
    for identifier in identifiers.drain(..) {
        let same = kept.iter().position(|k| {
            k.get("system") == identifier.get("system") && k.get("value") == identifier.get("value")
        });
        match same {
            Some(at) if populated(&identifier) > populated(&kept[at]) => kept[at] = identifier,
            Some(_) => {}
            None => kept.push(identifier),
        }
    }
    *identifiers = kept;
}

fn populated(value: &Value) -> usize {
    value
        .as_object()
        .map(|map| map.values().filter(|v| !v.is_null()).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(entries: Value) -> Value {
        json!({"resourceType": "Bundle", "entry": entries})
    }

    #[test]
    fn shared_identifier_collapses_encounters() {
        let input = bundle(json!([
            {"resource": {"resourceType": "Encounter", "id": "e1", "status": "unknown",
                "identifier": [{"value": "visit-9"}]}},
            {"resource": {"resourceType": "Observation", "id": "o1", "encounter": {"reference": "Encounter/e2"}}},
            {"resource": {"resourceType": "Encounter", "id": "e2", "status": "finished",
                "identifier": [{"system": "urn:x", "value": "visit-9"}, {"value": "visit-9"}]}}
        ]));

        let out = dedup_encounters(&input).expect("Failed to dedup");
        let entries = out["entry"].as_array().expect("entries");
        assert_eq!(entries.len(), 2);

        let survivor = &entries[0]["resource"];
        assert_eq!(survivor["id"], "e1");
        assert_eq!(survivor["status"], "finished");
        assert_eq!(
            survivor["identifier"],
            json!([{"value": "visit-9"}, {"system": "urn:x", "value": "visit-9"}])
        );
        assert_eq!(entries[1]["resource"]["encounter"]["reference"], "Encounter/e1");
    }

    #[test]
    fn first_known_status_wins_a_tie() {
        assert_eq!(
            merged_status(Some(&json!("planned")), Some(&json!("finished"))),
            Some(json!("planned"))
        );
        assert_eq!(
            merged_status(Some(&json!("unknown")), Some(&json!("unknown"))),
            Some(json!("unknown"))
        );
        assert_eq!(merged_status(None, Some(&json!("finished"))), Some(json!("finished")));
    }

    #[test]
    fn richer_identifier_replaces_its_duplicate() {
        let mut ids = vec![
            json!({"system": "s", "value": "1"}),
            json!({"system": "s", "value": "1", "use": "official"}),
        ];
        dedup_identifiers(&mut ids);
        assert_eq!(ids, vec![json!({"system": "s", "value": "1", "use": "official"})]);
    }

    #[test]
    fn chained_collisions_resolve_to_one_survivor() {
        let input = bundle(json!([
            {"resource": {"resourceType": "Encounter", "id": "a", "identifier": [{"value": "1"}]}},
            {"resource": {"resourceType": "Encounter", "id": "b", "identifier": [{"value": "2"}]}},
            {"resource": {"resourceType": "Encounter", "id": "c", "identifier": [{"value": "1"}, {"value": "2"}]}},
            {"resource": {"resourceType": "Condition", "encounter": {"reference": "Encounter/b"}}}
        ]));
        let out = dedup_encounters(&input).expect("Failed to dedup");
        let entries = out["entry"].as_array().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["resource"]["id"], "a");
        assert_eq!(entries[1]["resource"]["encounter"]["reference"], "Encounter/a");
    }

    #[test]
    fn unrelated_encounters_are_left_alone() {
        let input = bundle(json!([
            {"resource": {"resourceType": "Encounter", "id": "a", "identifier": [{"value": "1"}]}},
            {"resource": {"resourceType": "Encounter", "id": "b", "identifier": [{"value": "2"}]}}
        ]));
        assert_eq!(dedup_encounters(&input).expect("Failed to dedup"), input);
    }
}
