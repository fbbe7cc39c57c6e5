//! Section lookup and identifier helpers for CDA documents.
//!
//! Sections live under `ClinicalDocument.component.structuredBody.component[*].section`.
//! Results are keyed by the requested name or template ID with non-alphanumeric characters
//! replaced by `_`, so templates can address them as plain paths.

use super::null_flavor::all_values_null_flavor;
use super::{arg, normalize_name, HelperContext, HelperError, HelperFn};
use crate::value::{Object, Value};
use uuid::Uuid;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("getFirstCdaSections", get_first_cda_sections),
    ("getCdaSectionLists", get_cda_section_lists),
    ("getFirstCdaSectionsByTemplateId", get_first_cda_sections_by_template_id),
    ("getAllCdaSectionsByTemplateId", get_all_cda_sections_by_template_id),
    ("getAllCdaSectionsWithoutTemplateId", get_all_cda_sections_without_template_id),
    ("getSpecifiedEntryRelationship", get_specified_entry_relationship),
    ("generatePractitionerId", generate_practitioner_id),
    ("generateLocationId", generate_location_id),
];

type HelperResult = Result<Value, HelperError>;

fn clinical_document(args: &[Value]) -> Result<Value, HelperError> {
    let document = arg(args, 0).get("ClinicalDocument");
    if document.is_nullish() {
        return Err(HelperError::Failed(
            "Cannot read properties of undefined (reading 'component')".to_string(),
        ));
    }
    Ok(document)
}

/// The body's sections in document order.
fn sections(document: &Value) -> Vec<Value> {
    document
        .get("component")
        .get("structuredBody")
        .get("component")
        .to_items()
        .iter()
        .map(|component| component.get("section"))
        .filter(|section| !section.is_nullish())
        .collect()
}

fn names(args: &[Value]) -> Vec<String> {
    args.iter().skip(1).map(Value::to_js_string).collect()
}

fn title_contains(section: &Value, name: &str) -> bool {
    match section.get("title").get("_").as_str() {
        Some(title) => title.to_lowercase().contains(&name.to_lowercase()),
        None => false,
    }
}

fn has_template_root(section: &Value, root: &str) -> bool {
    section
        .get("templateId")
        .to_items()
        .iter()
        .any(|id| id.get("root").as_str() == Some(root))
}

/// Substring match against the JSON text of the section's template IDs.
fn template_ids_mention(section: &Value, id: &str) -> bool {
    let template_id = section.get("templateId");
    template_id.is_truthy() && template_id.to_json().to_string().contains(id)
}

/// The first section whose title contains each name, case-insensitively.
fn get_first_cda_sections(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let sections = sections(&clinical_document(args)?);
    let mut out = Object::new();
    for name in names(args) {
        if let Some(section) = sections.iter().find(|s| title_contains(s, &name)) {
            out.insert(normalize_name(&name), section.clone());
        }
    }
    Ok(Value::object(out))
}

/// Every section whose title contains each name, case-insensitively.
fn get_cda_section_lists(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let sections = sections(&clinical_document(args)?);
    let mut out = Object::new();
    for name in names(args) {
        let matching = sections
            .iter()
            .filter(|s| title_contains(s, &name))
            .cloned()
            .collect();
        out.insert(normalize_name(&name), Value::array(matching));
    }
    Ok(Value::object(out))
}

/// The first section carrying each template ID as an exact `root`.
fn get_first_cda_sections_by_template_id(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let sections = sections(&clinical_document(args)?);
    let mut out = Object::new();
    for id in names(args) {
        if let Some(section) = sections.iter().find(|s| has_template_root(s, &id)) {
            out.insert(normalize_name(&id), section.clone());
        }
    }
    Ok(Value::object(out))
}

fn matching_sections(args: &[Value]) -> Vec<(String, Value)> {
    let document = arg(args, 0).get("ClinicalDocument");
    let sections = sections(&document);
    let mut found = Vec::new();
    for id in names(args) {
        for section in sections.iter().filter(|s| template_ids_mention(s, &id)) {
            found.push((normalize_name(&id), section.clone()));
        }
    }
    found
}

/// `[{<id>: section}, ...]` for every section mentioning each template ID.
fn get_all_cda_sections_by_template_id(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let items = matching_sections(args)
        .into_iter()
        .map(|(key, section)| Value::object(Object::from([(key, section)])))
        .collect();
    Ok(Value::array(items))
}

fn get_all_cda_sections_without_template_id(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let items = matching_sections(args)
        .into_iter()
        .map(|(_, section)| section)
        .collect();
    Ok(Value::array(items))
}

/// The first entry relationship with the given `typeCode`.
fn get_specified_entry_relationship(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> HelperResult {
    let type_code = arg(args, 1);
    let found = arg(args, 0).to_items().into_iter().find(|relationship| {
        let code = relationship.get("typeCode");
        code.is_truthy() && code.to_js_string() == type_code.to_js_string()
    });
    Ok(found.unwrap_or_default())
}

fn uuid_from(name: &str) -> Value {
    Value::String(Uuid::new_v3(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Undefined => String::new(),
        other => other.to_json().to_string(),
    }
}

/// Joins the JSON text of the arguments that carry data.
fn concat_defined(values: &[Value]) -> String {
    values
        .iter()
        .filter(|v| !v.is_nullish() && !all_values_null_flavor(v))
        .map(|v| v.to_json().to_string())
        .collect()
}

/// Stable practitioner ID from an `assignedEntity`.
///
/// The first `id` with both `root` and `extension` names the practitioner; without one, the
/// person's name, address and telecom do. Entities without any `id` get no ID.
fn generate_practitioner_id(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(practitioner_id(&arg(args, 0)))
}

pub(super) fn practitioner_id(practitioner: &Value) -> Value {
    if !practitioner.is_truthy() {
        return Value::Undefined;
    }
    let first_id = match practitioner.get("id") {
        Value::Array(ids) => ids.first().cloned().unwrap_or_default(),
        id => id,
    };
    if !first_id.is_truthy() {
        return Value::Undefined;
    }

    let root = first_id.get("root");
    let extension = first_id.get("extension");
    if root.is_truthy() && extension.is_truthy() {
        return uuid_from(&format!("{}|{}", root.to_js_string(), extension.to_js_string()));
    }
    let name = practitioner.get("assignedPerson").get("name");
    if name.is_truthy() {
        let combined = [name, practitioner.get("addr"), practitioner.get("telecom")]
            .iter()
            .map(json_text)
            .collect::<String>();
        return uuid_from(&combined);
    }
    Value::Undefined
}

/// Stable location ID from a `participantRole`, an empty object when nothing identifies it.
fn generate_location_id(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(location_id(&arg(args, 0)))
}

pub(super) fn location_id(location: &Value) -> Value {
    let empty = || Value::object(Object::new());
    if !location.is_truthy() {
        return empty();
    }

    let nested = location.get("location");
    let playing_name = location.get("playingEntity").get("name");
    if nested.get("addr").is_truthy() {
        return uuid_from(&concat_defined(&[
            nested.get("addr"),
            nested.get("name"),
            location.get("code"),
        ]));
    }
    if location.get("addr").is_truthy() {
        return uuid_from(&concat_defined(&[
            location.get("addr"),
            playing_name,
            location.get("code"),
        ]));
    }
    if playing_name.is_truthy() {
        return uuid_from(&playing_name.to_js_string());
    }
    empty()
}
