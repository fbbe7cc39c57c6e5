//! Result, report and care plan helpers for CDA documents.
//!
//! Some of these build FHIR fragments directly instead of through partials. Those that return
//! arrays return them as JSON text, which templates splice in with `{{{ }}}`.

use super::cda::{location_id, practitioner_id};
use super::dates::{get_date_time, start_before_end};
use super::null_flavor::reference_text;
use super::{arg, record, HelperContext, HelperError, HelperFn};
use crate::value::{Object, Value};
use once_cell::sync::Lazy;
use regex::Regex;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    (
        "getFirstEffectiveTimeFromObservationComponent",
        get_first_effective_time_from_observation_component,
    ),
    (
        "personalRelationshipRoleTypeCodeSystem",
        personal_relationship_role_type_code_system,
    ),
    ("extractReferenceRange", extract_reference_range),
    ("buildPresentedForm", build_presented_form),
    ("getActivityFromTreatmentPlanEncounter", get_activity_from_treatment_plan_encounter),
    ("buildDefaultDiagReportDetails", build_default_diag_report_details),
    ("extractAndMapTableData", extract_and_map_table_data),
    ("extractTextFromNestedProperties", extract_text_from_nested_properties),
    ("convertMappedDataToPlainText", convert_mapped_data_to_plain_text),
];

type HelperResult = Result<Value, HelperError>;

const PERSONAL_RELATIONSHIP_ROLE_TYPE: &str = "2.16.840.1.113883.1.11.19563";

const IMO_PREFIX: &str = "2.16.840.1.113883.3.247";

const HTML: &str = "text/html";

/// Code systems templates refer to by OID.
const SYSTEM_URLS: &[(&str, &str)] = &[
    ("2.16.840.1.113883.6.1", "http://loinc.org"),
    ("2.16.840.1.113883.6.96", "http://snomed.info/sct"),
    ("2.16.840.1.113883.6.88", "http://www.nlm.nih.gov/research/umls/rxnorm"),
    ("2.16.840.1.113883.6.69", "http://hl7.org/fhir/sid/ndc"),
    ("2.16.840.1.113883.3.88.12.3221.8.9", "http://snomed.info/sct"),
    ("2.16.840.1.113883.5.83", "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation"),
    ("2.16.840.1.113883.4.1", "http://hl7.org/fhir/sid/us-ssn"),
    ("2.16.840.1.113883.4.6", "http://hl7.org/fhir/sid/us-npi"),
    ("2.16.840.1.113883.4.572", "http://hl7.org/fhir/sid/us-medicare"),
    ("2.16.840.1.113883.4.927", "http://hl7.org/fhir/sid/us-mbi"),
    ("2.16.840.1.113883.12.292", "http://hl7.org/fhir/sid/cvx"),
    ("2.16.840.1.113883.6.59", "http://terminology.hl7.org/2.1.0/CodeSystem-CVX"),
    ("2.16.840.1.113883.6.101", "http://nucc.org/provider-taxonomy"),
    ("2.16.840.1.113883.2.20.5.1", "http://fhir.infoway-inforoute.ca/CodeSystem/pCLOCD"),
    ("2.16.840.1.113883.6.8", "http://unitsofmeasure.org"),
    ("2.16.840.1.113883.6.12", "http://www.ama-assn.org/go/cpt"),
    ("2.16.840.1.113883.6.345", "http://va.gov/terminology/medrt"),
    ("2.16.840.1.113883.6.209", "http://hl7.org/fhir/ndfrt"),
    ("2.16.840.1.113883.4.9", "http://fdasis.nlm.nih.gov"),
    ("2.16.840.1.113883.6.24", "urn:iso:std:iso:11073:10101"),
    ("2.16.840.1.113883.6.103", "http://terminology.hl7.org/CodeSystem/ICD-9CM-diagnosiscodes"),
    ("2.16.840.1.113883.6.104", "http://terminology.hl7.org/CodeSystem/ICD-9CM-procedurecodes"),
    ("2.16.840.1.113883.6.90", "http://hl7.org/fhir/sid/icd-10-cm"),
    ("2.16.840.1.113883.6.4", "http://www.cms.gov/Medicare/Coding/ICD10"),
    ("2.16.840.1.113883.6.238", "http://terminology.hl7.org/CodeSystem-CDCREC.html"),
    ("2.16.840.1.113883.6.208", "http://terminology.hl7.org/CodeSystem/nddf"),
    ("2.16.840.1.113883.5.4", "http://terminology.hl7.org/CodeSystem/v3-ActCode"),
    ("2.16.840.1.113883.3.26.1.1", "http://ncicb.nci.nih.gov/xml/owl/EVS/Thesaurus.owl"),
    ("2.16.840.1.113883.5.1", "http://terminology.hl7.org/CodeSystem/v3-AdministrativeGender"),
    (PERSONAL_RELATIONSHIP_ROLE_TYPE, "http://terminology.hl7.org/ValueSet/v3-PersonalRelationshipRoleType"),
    ("2.16.840.1.113883.5.111", "http://terminology.hl7.org/CodeSystem/v3-RoleCode"),
];

/// `CarePlan.activity.detail.status` codes.
const CARE_PLAN_ACTIVITY_STATUSES: &[&str] = &[
    "not-started",
    "scheduled",
    "in-progress",
    "on-hold",
    "completed",
    "cancelled",
    "stopped",
    "unknown",
    "entered-in-error",
];

static OID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9.]+$").expect("static regex"));

fn get_first_effective_time_from_observation_component(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let Some(components) = arg(args, 0).as_array().map(<[Value]>::to_vec) else {
        return Ok(Value::Undefined);
    };
    Ok(components
        .iter()
        .map(|component| component.get("observation").get("effectiveTime").get("value"))
        .find(Value::is_truthy)
        .unwrap_or_default())
}

fn personal_relationship_role_type_code_system(
    _: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    Ok(Value::from(PERSONAL_RELATIONSHIP_ROLE_TYPE))
}

fn non_empty(pairs: Vec<(&str, Value)>) -> Option<Value> {
    let map: Object = pairs
        .into_iter()
        .filter(|(_, value)| value.is_truthy())
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    (!map.is_empty()).then(|| Value::object(map))
}

/// One end of an interval. A `nullFlavor="OTH"` bound carries its value in a translation.
fn range_limit(limit: &Value) -> Value {
    if !limit.is_truthy() {
        return Value::Undefined;
    }
    if limit.get("value").is_truthy() {
        return limit.clone();
    }
    if limit.get("nullFlavor").as_str() == Some("OTH") {
        let translation = limit.get("translation");
        return non_empty(vec![
            ("value", translation.get("value")),
            ("unit", translation.get("originalText").get("_")),
        ])
        .unwrap_or_default();
    }
    Value::Undefined
}

fn interval(low: &Value, high: &Value) -> Option<Value> {
    non_empty(vec![("low", range_limit(low)), ("high", range_limit(high))])
}

/// `"3.5-5"` as `{low, high}`, any other text as `{low}`.
fn text_range(text: &Value) -> Value {
    let Some(text) = text.as_str().filter(|t| !t.is_empty()) else {
        return Value::Undefined;
    };
    let bound = |value: &str| record([("value", Value::from(value.trim()))]);
    match text.split_once('-') {
        Some((low, rest)) => {
            let high = rest.split('-').next().unwrap_or_default();
            record([("low", bound(low)), ("high", bound(high))])
        }
        None => record([("low", bound(text))]),
    }
}

/// A lab result's `referenceRange/observationRange` as a FHIR range.
fn extract_reference_range(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let range = arg(args, 0);
    if range.is_nullish() {
        return Ok(Value::Undefined);
    }

    let value = range.get("value");
    if value.is_truthy() {
        match value.get("xsi:type").as_str() {
            Some("ST") => {
                let text = value.get("_");
                if text.is_truthy() {
                    return Ok(text_range(&text));
                }
            }
            Some("IVL_PQ" | "IVL_REAL") => {
                if let Some(found) = interval(&value.get("low"), &value.get("high")) {
                    return Ok(found);
                }
            }
            _ => {}
        }
    } else if range.get("low").is_truthy() || range.get("high").is_truthy() {
        if let Some(found) = interval(&range.get("low"), &range.get("high")) {
            return Ok(found);
        }
    }

    let text = range.get("text").get("_");
    if text.is_truthy() {
        return Ok(text_range(&text));
    }
    Ok(Value::Undefined)
}

/// `presentedForm` attachments from the section narrative and its component observations.
fn build_presented_form(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let attachment = |data: Value| record([("contentType", Value::from(HTML)), ("data", data)]);

    let mut forms = Vec::new();
    let narrative = arg(args, 0);
    if narrative.is_truthy() {
        forms.push(attachment(narrative));
    }
    for component in arg(args, 1).to_items() {
        let encoded = component.get("observation").get("value").get("_b64");
        if encoded.is_truthy() {
            forms.push(attachment(encoded));
        }
    }

    if forms.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(Value::String(Value::array(forms).to_json().to_string()))
}

fn system_url(oid: &Value) -> Value {
    let Some(oid) = oid.as_str().filter(|o| !o.is_empty()) else {
        return Value::Undefined;
    };
    if oid.starts_with(IMO_PREFIX) {
        return Value::from("http://terminology.hl7.org/CodeSystem-IMO.html");
    }
    if let Some((_, url)) = SYSTEM_URLS.iter().find(|(known, _)| *known == oid) {
        return Value::from(*url);
    }
    if OID.is_match(oid) {
        return Value::String(format!("urn:oid:{oid}"));
    }
    Value::String(format!(
        "http://terminology.hl7.org/CodeSystem/{}",
        oid.replace(' ', "")
    ))
}

fn coding(code: &Value) -> Value {
    let display = code.get("displayName");
    let value = code.get("code");
    record([
        (
            "code",
            match value.is_truthy() {
                true => Value::String(value.to_js_string().trim().to_string()),
                false => Value::Undefined,
            },
        ),
        (
            "display",
            match display.is_truthy() {
                true => Value::String(reference_text(&display)),
                false => Value::Undefined,
            },
        ),
        ("version", code.get("codeSystemVersion")),
        ("system", system_url(&code.get("codeSystem"))),
    ])
}

fn codeable_concept(code: &Value) -> Option<Value> {
    if !code.is_truthy() {
        return None;
    }
    let original = code.get("originalText").get("_");
    let text = if original.is_truthy() {
        Value::String(reference_text(&original))
    } else if code.get("text").is_truthy() {
        Value::String(reference_text(&code.get("text")))
    } else {
        Value::Undefined
    };
    Some(record([
        ("text", text),
        ("coding", Value::array(vec![coding(code)])),
    ]))
}

/// An `effectiveTime` as a FHIR period. A start after the end drops the end.
fn period(time: &Value) -> Result<Value, HelperError> {
    let mut out = Object::new();
    let mut set = |key: &str, value: &Value| -> Result<(), HelperError> {
        out.insert(key.to_string(), Value::String(get_date_time(value)?));
        Ok(())
    };

    let low = time.get("low");
    let high = time.get("high");
    let (low_value, high_value) = (low.get("value"), high.get("value"));
    if !time.is_truthy() {
        set("start", &Value::Undefined)?;
    } else if low.is_truthy() && high.is_truthy() && start_before_end(&low_value, &high_value)? {
        set("start", &low_value)?;
        set("end", &high_value)?;
    } else if low.is_truthy() {
        set("start", &low_value)?;
    } else if high.is_truthy() {
        set("end", &high_value)?;
    } else {
        set("start", &time.get("value"))?;
    }
    Ok(Value::object(out))
}

fn care_plan_activity_status(code: &Value) -> Value {
    let Some(code) = code.as_str().filter(|c| !c.is_empty()) else {
        return Value::from("unknown");
    };
    let normalized = code.trim().to_lowercase();
    if CARE_PLAN_ACTIVITY_STATUSES.contains(&normalized.as_str()) {
        return Value::from(code);
    }
    Value::from("unknown")
}

/// `CarePlan.activity` for a planned encounter, as JSON text.
fn get_activity_from_treatment_plan_encounter(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let encounter = arg(args, 0);
    if !encounter.is_truthy() {
        return Ok(Value::Undefined);
    }
    let act = encounter.get("entryRelationship").get("act");

    let status = match act.get("statusCode").get("code") {
        code if !code.is_nullish() => code,
        _ => encounter.get("statusCode").get("code"),
    };
    let mut detail = Object::new();
    detail.insert("status".to_string(), care_plan_activity_status(&status));

    let performer = encounter.get("performer").get("assignedEntity");
    if performer.is_truthy() {
        if let Value::String(id) = practitioner_id(&performer) {
            let reference = record([("reference", Value::String(format!("Practitioner/{id}")))]);
            detail.insert("performer".to_string(), Value::array(vec![reference]));
        }
    }

    let role = encounter.get("participant").get("participantRole");
    if role.is_truthy() {
        if let Value::String(id) = location_id(&role) {
            let reference = record([("reference", Value::String(format!("Location/{id}")))]);
            detail.insert("location".to_string(), reference);
        }
    }

    detail.insert("scheduledPeriod".to_string(), period(&encounter.get("effectiveTime"))?);

    if act.is_truthy() {
        if let Some(code) = codeable_concept(&act.get("code")) {
            detail.insert("code".to_string(), code);
        }
        let description = act.get("text").get("_");
        if description.is_truthy() {
            detail.insert("description".to_string(), description);
        }
    }

    let activity = Value::array(vec![record([("detail", Value::object(detail))])]);
    Ok(Value::String(activity.to_json().to_string()))
}

/// Status, code and template id for a diagnostic report built from a bare section.
fn build_default_diag_report_details(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let code = match arg(args, 0).get("code") {
        code if !code.is_nullish() => code,
        _ => record([
            ("code", Value::from("34109-9")),
            ("codeSystem", Value::from("2.16.840.1.113883.6.1")),
            ("codeSystemName", Value::from("LOINC")),
            ("displayName", Value::from("Note")),
        ]),
    };
    Ok(record([
        ("statusCode", record([("code", Value::from("completed"))])),
        ("code", code),
        (
            "templateId",
            record([
                ("root", Value::from("2.16.840.1.113883.10.20.22.4.202")),
                ("extension", Value::from("2016-11-01")),
            ]),
        ),
    ]))
}

/// Text of each content item, one per line.
fn content_text(content: &Value) -> String {
    content
        .to_items()
        .iter()
        .filter(|item| item.is_truthy())
        .map(|item| item.get("_").to_text())
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell_text(cell: &Value) -> String {
    let paragraphs = cell.get("paragraph");
    if !paragraphs.is_truthy() {
        let text = cell.get("_");
        return if text.is_truthy() { text.to_text() } else { String::new() };
    }
    paragraphs
        .to_items()
        .iter()
        .map(|paragraph| {
            let content = paragraph.get("content");
            if content.is_truthy() {
                content_text(&content)
            } else {
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn row(row: &Value, headers: &[String]) -> Value {
    let cells = row.get("td");
    if !row.is_truthy() || !cells.is_truthy() {
        return Value::Undefined;
    }
    let mut out = Object::new();
    for (header, cell) in headers.iter().zip(cells.to_items()) {
        if cell.is_truthy() {
            out.insert(header.clone(), Value::String(cell_text(&cell)));
        }
    }
    Value::object(out)
}

/// Narrative table rows as objects keyed by the header cells.
fn extract_and_map_table_data(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let table = arg(args, 0).get("table");
    let (head, body) = (table.get("thead"), table.get("tbody"));
    if !table.is_truthy() || !head.is_truthy() || !body.is_truthy() {
        return Ok(Value::Undefined);
    }

    let headers: Vec<String> = head
        .get("tr")
        .get("th")
        .to_items()
        .iter()
        .map(|th| th.get("_").to_js_string())
        .collect();
    let rows = body.get("tr").to_items();
    if headers.is_empty() || rows.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(Value::array(rows.iter().map(|r| row(r, &headers)).collect()))
}

fn collect_texts(value: &Value, texts: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(text) = map.get("_") {
                texts.push(text.to_text());
            }
            map.values().for_each(|child| collect_texts(child, texts));
        }
        Value::Array(items) => items.iter().for_each(|item| collect_texts(item, texts)),
        _ => {}
    }
}

/// Every `_` text found in a subtree, depth first, one per line.
fn extract_text_from_nested_properties(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let mut texts = Vec::new();
    collect_texts(&arg(args, 0), &mut texts);
    Ok(Value::String(texts.join("\n")))
}

/// Rows from `extractAndMapTableData` as `header: value` lines, rows separated by a blank line.
fn convert_mapped_data_to_plain_text(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let rows = arg(args, 0).to_items();
    let text = rows
        .iter()
        .map(|row| match row.as_object() {
            Some(cells) => cells
                .iter()
                .map(|(header, value)| format!("{header}: {}", value.to_js_string()))
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::testing::call;
    use crate::DataType;
    use serde_json::json;

    fn run(name: &str, args: &[serde_json::Value]) -> serde_json::Value {
        let args: Vec<Value> = args.iter().cloned().map(Value::from_json).collect();
        call(DataType::Cda, name, &args)
            .unwrap_or_else(|e| panic!("{name} failed: {e}"))
            .to_json()
    }

    fn parsed(text: serde_json::Value) -> serde_json::Value {
        serde_json::from_str(text.as_str().expect("helper returns JSON text"))
            .expect("helper output is JSON")
    }

    #[test]
    fn first_effective_time_skips_components_without_one() {
        let components = json!([
            {"observation": {"effectiveTime": {"nullFlavor": "UNK"}}},
            {"observation": {"effectiveTime": {"value": "20240101"}}},
            {"observation": {"effectiveTime": {"value": "20250101"}}}
        ]);
        assert_eq!(
            run("getFirstEffectiveTimeFromObservationComponent", &[components]),
            json!("20240101")
        );
        assert_eq!(
            run("getFirstEffectiveTimeFromObservationComponent", &[json!({"observation": {}})]),
            serde_json::Value::Null
        );
    }

    #[test]
    fn relationship_code_system_is_fixed() {
        assert_eq!(
            run("personalRelationshipRoleTypeCodeSystem", &[]),
            json!("2.16.840.1.113883.1.11.19563")
        );
    }

    #[test]
    fn reference_ranges_read_intervals_text_and_translations() {
        let interval = json!({"value": {
            "xsi:type": "IVL_PQ",
            "low": {"value": "3.5", "unit": "mmol/L"},
            "high": {"nullFlavor": "OTH", "translation": {"value": "5", "originalText": {"_": "mmol/L"}}}
        }});
        assert_eq!(
            run("extractReferenceRange", &[interval]),
            json!({
                "low": {"value": "3.5", "unit": "mmol/L"},
                "high": {"value": "5", "unit": "mmol/L"}
            })
        );

        let text = json!({"value": {"xsi:type": "ST", "_": " 10 - 20 "}});
        assert_eq!(
            run("extractReferenceRange", &[text]),
            json!({"low": {"value": "10"}, "high": {"value": "20"}})
        );

        let bare = json!({"low": {"value": "1"}});
        assert_eq!(run("extractReferenceRange", &[bare]), json!({"low": {"value": "1"}}));

        let narrative = json!({"value": {"xsi:type": "IVL_PQ"}, "text": {"_": "negative"}});
        assert_eq!(
            run("extractReferenceRange", &[narrative]),
            json!({"low": {"value": "negative"}})
        );
        assert_eq!(run("extractReferenceRange", &[json!({})]), serde_json::Value::Null);
    }

    #[test]
    fn presented_form_collects_narrative_and_observation_attachments() {
        let components = json!([
            {"observation": {"value": {"_b64": "PGI+"}}},
            {"observation": {"value": {"_": "plain"}}}
        ]);
        assert_eq!(
            parsed(run("buildPresentedForm", &[json!("PHA+"), components])),
            json!([
                {"contentType": "text/html", "data": "PHA+"},
                {"contentType": "text/html", "data": "PGI+"}
            ])
        );
        assert_eq!(
            run("buildPresentedForm", &[serde_json::Value::Null, json!({})]),
            serde_json::Value::Null
        );
    }

    #[test]
    fn treatment_plan_activity_carries_status_period_and_code() {
        let encounter = json!({
            "statusCode": {"code": "bogus"},
            "effectiveTime": {"low": {"value": "20240101"}, "high": {"value": "20231231"}},
            "entryRelationship": {"act": {
                "statusCode": {"code": "Scheduled"},
                "code": {"code": " 123 ", "codeSystem": "2.16.840.1.113883.6.96", "displayName": "Follow   up"},
                "text": {"_": "See the cardiologist"}
            }}
        });
        let activity = parsed(run("getActivityFromTreatmentPlanEncounter", &[encounter]));
        let detail = &activity[0]["detail"];
        assert_eq!(detail["status"], "Scheduled");
        assert_eq!(detail["scheduledPeriod"], json!({"start": "2024-01-01T00:00:00.000Z"}));
        assert_eq!(
            detail["code"]["coding"][0],
            json!({"code": "123", "display": "Follow up", "system": "http://snomed.info/sct"})
        );
        assert_eq!(detail["description"], "See the cardiologist");
        assert!(detail.get("performer").is_none());

        let bare = parsed(run("getActivityFromTreatmentPlanEncounter", &[json!({"statusCode": {"code": "x"}})]));
        assert_eq!(bare[0]["detail"]["status"], "unknown");
        assert_eq!(bare[0]["detail"]["scheduledPeriod"], json!({"start": ""}));
    }

    #[test]
    fn default_report_details_keep_a_section_code() {
        let details = run("buildDefaultDiagReportDetails", &[json!({"code": {"code": "11506-3"}})]);
        assert_eq!(details["code"], json!({"code": "11506-3"}));
        assert_eq!(details["statusCode"]["code"], "completed");

        let fallback = run("buildDefaultDiagReportDetails", &[json!({})]);
        assert_eq!(fallback["code"]["code"], "34109-9");
        assert_eq!(fallback["templateId"]["root"], "2.16.840.1.113883.10.20.22.4.202");
    }

    fn narrative_table() -> serde_json::Value {
        json!({"table": {
            "thead": {"tr": {"th": [{"_": "Test"}, {"_": "Result"}]}},
            "tbody": {"tr": [
                {"td": [{"_": "Glucose"}, {"_": "5.1"}]},
                {"td": [
                    {"_": "Notes"},
                    {"paragraph": [
                        {"content": [{"_": "line one"}, {"_": "line two"}]},
                        {"content": {"_": "line three"}}
                    ]}
                ]}
            ]}
        }})
    }

    #[test]
    fn table_rows_map_to_header_keys() {
        let rows = run("extractAndMapTableData", &[narrative_table()]);
        assert_eq!(
            rows,
            json!([
                {"Test": "Glucose", "Result": "5.1"},
                {"Test": "Notes", "Result": "line one\nline two\nline three"}
            ])
        );
        assert_eq!(
            run("extractAndMapTableData", &[json!({"table": {"thead": {}}})]),
            serde_json::Value::Null
        );
    }

    #[test]
    fn mapped_rows_render_as_plain_text() {
        let rows = run("extractAndMapTableData", &[narrative_table()]);
        let text = run("convertMappedDataToPlainText", &[rows]);
        assert_eq!(
            text,
            json!("Test: Glucose\nResult: 5.1\n\nTest: Notes\nResult: line one\nline two\nline three")
        );
        assert_eq!(run("convertMappedDataToPlainText", &[json!([])]), json!(""));
    }

    #[test]
    fn nested_text_is_collected_depth_first() {
        let data = json!({"_": "top", "list": [{"item": {"_": "a"}}, {"_": "b"}], "code": "x"});
        assert_eq!(run("extractTextFromNestedProperties", &[data]), json!("top\na\nb"));
    }
}
