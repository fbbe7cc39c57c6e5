//! Segment extraction helpers for HL7 v2 messages.
//!
//! Every helper takes the parsed message (`msg.v2` in templates) first and segment type
//! names after it.

use super::{arg, HelperContext, HelperError, HelperFn};
use crate::value::{Hl7Node, Object, Value};
use hl7v2::{Message, Segment};
use std::rc::Rc;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("getFieldRepeats", get_field_repeats),
    ("getFirstSegments", get_first_segments),
    ("getSegmentLists", get_segment_lists),
    ("getRelatedSegmentList", get_related_segment_list),
    ("getParentSegment", get_parent_segment),
    ("hasSegments", has_segments),
];

type HelperResult = Result<Value, HelperError>;

fn message(args: &[Value]) -> Result<Rc<Message>, HelperError> {
    let value = arg(args, 0);
    value.as_message().cloned().ok_or_else(|| {
        HelperError::Failed(format!(
            "Cannot read properties of {} (reading 'meta')",
            value.type_name()
        ))
    })
}

fn segment_value(segment: &Rc<Segment>) -> Value {
    Value::Hl7(Hl7Node::Segment(Rc::clone(segment)))
}

fn segment_names(args: &[Value]) -> Vec<String> {
    args.iter().skip(1).map(Value::to_js_string).collect()
}

fn segment_lists(message: &Message, names: &[String]) -> Object {
    names
        .iter()
        .map(|name| {
            let list = message.segments_of_type(name).map(segment_value).collect();
            (name.clone(), Value::array(list))
        })
        .collect()
}

/// Repetitions of a field. Missing fields pass through unchanged.
fn get_field_repeats(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let field = arg(args, 0);
    if !field.is_truthy() {
        return Ok(field);
    }
    match &field {
        Value::Hl7(node) => Ok(node.repeats().map(Value::array).unwrap_or_default()),
        _ => Ok(field.get("repeats")),
    }
}

/// The first segment of each requested type, keyed by type. Absent types are left out.
fn get_first_segments(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let message = message(args)?;
    let names = segment_names(args);
    let mut found = Object::new();
    for segment in message.segments() {
        let kind = segment.segment_type();
        if names.iter().any(|n| n == kind) && !found.contains_key(kind) {
            found.insert(kind.to_string(), segment_value(segment));
        }
    }
    Ok(Value::object(found))
}

/// Every segment of each requested type, keyed by type.
fn get_segment_lists(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let message = message(args)?;
    Ok(Value::object(segment_lists(&message, &segment_names(args))))
}

/// The run of `child` segments that follows the `parent` segment whose set ID is
/// `parentIndex`.
fn get_related_segment_list(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let message = message(args)?;
    let parent = arg(args, 1).to_js_string();
    let parent_index = arg(args, 2);
    let child = arg(args, 3).to_js_string();
    let segments = message.segments();

    let mut parent_found = false;
    let mut start = None;
    for (i, segment) in segments.iter().enumerate() {
        if segment.segment_type() == parent && set_id(segment).loose_eq(&parent_index) {
            parent_found = true;
        } else if parent_found && segment.segment_type() == child {
            start = Some(i);
            break;
        }
    }

    let related = start
        .map(|start| {
            segments[start..]
                .iter()
                .take_while(|s| s.segment_type() == child)
                .map(segment_value)
                .collect()
        })
        .unwrap_or_default();

    let mut out = Object::new();
    out.insert(child, Value::array(related));
    Ok(Value::object(out))
}

fn set_id(segment: &Segment) -> Value {
    segment
        .peek_field(1)
        .map(|f| Value::String(f.text(segment.separators())))
        .unwrap_or_default()
}

/// The nearest `parent` segment before the `childIndex`-th `child` segment of the message.
fn get_parent_segment(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let message = message(args)?;
    let child = arg(args, 1).to_js_string();
    let child_index = arg(args, 2);
    let parent = arg(args, 3).to_js_string();
    let segments = message.segments();

    let position = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.segment_type() == child)
        .enumerate()
        .find(|(n, _)| Value::from(*n).loose_eq(&child_index))
        .map(|(_, (i, _))| i);

    let mut out = Object::new();
    if let Some(found) = position.and_then(|position| {
        segments[..=position]
            .iter()
            .rev()
            .find(|s| s.segment_type() == parent)
    }) {
        out.insert(parent, segment_value(found));
    }
    Ok(Value::object(out))
}

/// True when the message has at least one segment of every requested type.
fn has_segments(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let message = message(args)?;
    let names = segment_names(args);
    Ok(Value::Bool(names.iter().all(|name| {
        message.segments_of_type(name).next().is_some()
    })))
}
