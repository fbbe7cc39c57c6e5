//! Encounter metadata lifted from `componentOf/encompassingEncounter`.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncounterTimePeriod {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// The document-level encounter, when the document declares one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncounterMetadata {
    pub encompassing_encounter_id: Option<String>,
    pub time_period: Option<EncounterTimePeriod>,
}

impl EncounterMetadata {
    pub(crate) fn extract(root: &Value) -> Self {
        let encounter = &root["ClinicalDocument"]["componentOf"]["encompassingEncounter"];
        if encounter.is_null() {
            return Self::default();
        }

        let id = first(&encounter["id"]);
        let encompassing_encounter_id = non_empty(&id["extension"])
            .or_else(|| non_empty(&id["root"]))
            .map(str::to_string);

        let time = &encounter["effectiveTime"];
        let start = non_empty(&time["low"]["value"]).or_else(|| non_empty(&time["value"]));
        let end = non_empty(&time["high"]["value"]);
        let time_period = (start.is_some() || end.is_some()).then(|| EncounterTimePeriod {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        });

        Self {
            encompassing_encounter_id,
            time_period,
        }
    }
}

fn first(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_id_and_window() {
        let root = json!({
            "ClinicalDocument": {
                "componentOf": {
                    "encompassingEncounter": {
                        "id": [{"root": "1.2.3", "extension": "ENC-9"}, {"root": "4.5"}],
                        "effectiveTime": {"low": {"value": "20240101"}, "high": {"value": "20240103"}}
                    }
                }
            }
        });
        let metadata = EncounterMetadata::extract(&root);
        assert_eq!(metadata.encompassing_encounter_id.as_deref(), Some("ENC-9"));
        assert_eq!(
            metadata.time_period,
            Some(EncounterTimePeriod {
                start: Some("20240101".into()),
                end: Some("20240103".into()),
            })
        );
    }

    #[test]
    fn missing_encounter_yields_default() {
        let metadata = EncounterMetadata::extract(&json!({"ClinicalDocument": {}}));
        assert_eq!(metadata, EncounterMetadata::default());
    }
}
