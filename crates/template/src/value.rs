//! Runtime values seen by templates and helpers.
//!
//! Templates were written against a dynamically typed engine, so values follow the same
//! loose rules: `undefined` and `null` are distinct, numbers are doubles, equality is loose
//! and truthiness is the usual "empty string, zero, null and undefined are false".
//!
//! Containers are reference counted so path lookups and helper arguments clone cheaply.
//! HL7 v2 nodes are views into the parsed message rather than copies, which keeps read
//! coverage accurate: looking up `PID.[5]` goes through [`Segment::field`] and records the
//! read.

use hl7v2::{Message, Segment};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::rc::Rc;

pub type Object = IndexMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<Vec<Value>>),
    Object(Rc<Object>),
    Hl7(Hl7Node),
}

/// A position inside a parsed HL7 v2 message.
///
/// Field and component numbers are 1-based; `repeat` is a 0-based index into the field's
/// repetitions.
#[derive(Debug, Clone)]
pub enum Hl7Node {
    Message(Rc<Message>),
    Segment(Rc<Segment>),
    Field {
        segment: Rc<Segment>,
        field: usize,
    },
    Repeat {
        segment: Rc<Segment>,
        field: usize,
        repeat: usize,
    },
    Component {
        segment: Rc<Segment>,
        field: usize,
        repeat: usize,
        component: usize,
    },
}

impl Hl7Node {
    pub fn text(&self) -> String {
        match self {
            Hl7Node::Message(message) => message
                .segments()
                .iter()
                .map(|s| s.text())
                .collect::<Vec<_>>()
                .join("\r"),
            Hl7Node::Segment(segment) => segment.text(),
            Hl7Node::Field { segment, field } => segment
                .peek_field(*field)
                .map(|f| f.text(segment.separators()))
                .unwrap_or_default(),
            Hl7Node::Repeat {
                segment,
                field,
                repeat,
            } => segment
                .peek_field(*field)
                .and_then(|f| f.repeats().get(*repeat))
                .map(|r| r.text(segment.separators()))
                .unwrap_or_default(),
            Hl7Node::Component {
                segment,
                field,
                repeat,
                component,
            } => segment
                .peek_field(*field)
                .and_then(|f| f.repeats().get(*repeat))
                .and_then(|r| r.component(*component))
                .map(|c| c.text(segment.separators()))
                .unwrap_or_default(),
        }
    }

    /// Repetitions of a field node, or `None` for any other node.
    pub fn repeats(&self) -> Option<Vec<Value>> {
        let Hl7Node::Field { segment, field } = self else {
            return None;
        };
        let count = segment.peek_field(*field).map_or(0, |f| f.repeats().len());
        Some(
            (0..count)
                .map(|repeat| {
                    Value::Hl7(Hl7Node::Repeat {
                        segment: Rc::clone(segment),
                        field: *field,
                        repeat,
                    })
                })
                .collect(),
        )
    }

    fn child(&self, key: &str) -> Value {
        if key == "repeats" {
            return self
                .repeats()
                .map(Value::array)
                .unwrap_or_default();
        }
        let Ok(number) = key.parse::<usize>() else {
            return Value::Undefined;
        };

        match self {
            Hl7Node::Message(message) => message
                .segments()
                .get(number)
                .map(|s| Value::Hl7(Hl7Node::Segment(Rc::clone(s))))
                .unwrap_or_default(),
            Hl7Node::Segment(segment) => match segment.field(number) {
                Some(_) => Value::Hl7(Hl7Node::Field {
                    segment: Rc::clone(segment),
                    field: number,
                }),
                None => Value::Undefined,
            },
            Hl7Node::Field { segment, field } => {
                component_of(segment, *field, 0, number)
            }
            Hl7Node::Repeat {
                segment,
                field,
                repeat,
            } => component_of(segment, *field, *repeat, number),
            Hl7Node::Component {
                segment,
                field,
                repeat,
                component,
            } => segment
                .peek_field(*field)
                .and_then(|f| f.repeats().get(*repeat))
                .and_then(|r| r.component(*component))
                .and_then(|c| c.subcomponent(number))
                .map(|s| Value::String(s.to_string()))
                .unwrap_or_default(),
        }
    }
}

fn component_of(segment: &Rc<Segment>, field: usize, repeat: usize, component: usize) -> Value {
    let exists = segment
        .peek_field(field)
        .and_then(|f| f.repeats().get(repeat))
        .and_then(|r| r.component(component))
        .is_some();
    if !exists {
        return Value::Undefined;
    }
    Value::Hl7(Hl7Node::Component {
        segment: Rc::clone(segment),
        field,
        repeat,
        component,
    })
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object(map: Object) -> Self {
        Value::Object(Rc::new(map))
    }

    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON view of the value. Undefined object members are omitted, as `JSON.stringify`
    /// would; HL7 nodes serialize as their text.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Hl7(node) => serde_json::Value::String(node.text()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Hl7(Hl7Node::Message(_)) => "message",
            Value::Hl7(_) => "segment data",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
            Value::Hl7(Hl7Node::Message(_) | Hl7Node::Segment(_)) => true,
            Value::Hl7(node) => !node.text().is_empty(),
        }
    }

    /// Handlebars' notion of empty: falsy but not zero, or an empty array.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Number(n) if *n == 0.0 => false,
            Value::Array(items) => items.is_empty(),
            other => !other.is_truthy(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Rc<Message>> {
        match self {
            Value::Hl7(Hl7Node::Message(message)) => Some(message),
            _ => None,
        }
    }

    /// Items of an array, or the value itself as a single item.
    pub fn to_items(&self) -> Vec<Value> {
        match self {
            Value::Array(items) => items.to_vec(),
            Value::Undefined => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Property lookup used by template paths.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or_default()
            }
            Value::String(s) => {
                if key == "length" {
                    return Value::Number(s.chars().count() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default()
            }
            Value::Hl7(node) => node.child(key),
            _ => Value::Undefined,
        }
    }

    /// `String(value)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Hl7(node) => node.text(),
        }
    }

    /// Text a `{{expression}}` renders as; `null` and `undefined` render as nothing.
    pub fn to_text(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            other => other.to_js_string(),
        }
    }

    /// `Number(value)`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Object(_) => f64::NAN,
            Value::Array(_) | Value::Hl7(_) => parse_number(&self.to_js_string()),
        }
    }

    fn to_primitive(&self) -> Value {
        match self {
            Value::Array(_) | Value::Object(_) | Value::Hl7(_) => {
                Value::String(self.to_js_string())
            }
            other => other.clone(),
        }
    }

    /// Loose (`==`) equality.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Hl7(a), Value::Hl7(b)) => a.text() == b.text(),
            (Value::Bool(b), other) | (other, Value::Bool(b)) => {
                Value::Number(f64::from(u8::from(*b))).loose_eq(other)
            }
            (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
                *n == parse_number(s)
            }
            (a @ (Value::Array(_) | Value::Object(_) | Value::Hl7(_)), b)
            | (b, a @ (Value::Array(_) | Value::Object(_) | Value::Hl7(_))) => {
                a.to_primitive().loose_eq(b)
            }
            _ => false,
        }
    }

    /// Relational comparison; `None` when either side is not comparable (NaN).
    pub fn js_compare(&self, other: &Value) -> Option<Ordering> {
        match (self.to_primitive(), other.to_primitive()) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_number().partial_cmp(&b.to_number()),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map_or(Value::Undefined, Value::String)
    }
}

/// Formats a double the way `Number.prototype.toString` does for the common cases.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn parse_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    // Rust accepts "inf" and "nan" spellings that Number() does not
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_format_like_script_numbers() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn loose_equality_coerces_numbers_and_strings() {
        assert!(Value::from("1").loose_eq(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_eq(&Value::from("1")));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.loose_eq(&Value::from("")));
        assert!(!Value::from("a").loose_eq(&Value::from("b")));
    }

    #[test]
    fn comparison_is_lexical_for_strings_and_numeric_otherwise() {
        assert_eq!(
            Value::from("10").js_compare(&Value::from("9")),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Number(10.0).js_compare(&Value::from("9")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::from("x").js_compare(&Value::Number(1.0)), None);
    }

    #[test]
    fn json_round_trip_drops_undefined_members() {
        let mut map = Object::new();
        map.insert("a".into(), Value::Number(1.0));
        map.insert("b".into(), Value::Undefined);
        map.insert("c".into(), Value::array(vec![Value::from("x"), Value::Null]));
        assert_eq!(Value::object(map).to_json(), json!({"a": 1, "c": ["x", null]}));
    }

    #[test]
    fn hl7_paths_walk_fields_and_components() {
        let message = Rc::new(
            Message::parse("MSH|^~\\&|App\rPID|1||123^^^MRN~456^^^SSN||Doe^Jane")
                .expect("valid message"),
        );
        let pid = Value::Hl7(Hl7Node::Segment(Rc::clone(&message.segments()[1])));

        assert_eq!(pid.get("5").get("1").to_text(), "Doe");
        assert_eq!(pid.get("5").get("2").to_text(), "Jane");
        assert_eq!(pid.get("3").to_text(), "123^^^MRN");
        let repeats = pid.get("3").get("repeats");
        assert_eq!(repeats.get("length").to_number(), 2.0);
        assert_eq!(repeats.get("1").get("4").to_text(), "SSN");
        assert!(matches!(pid.get("30"), Value::Undefined));
        assert_eq!(message.invalid_accesses()[0].field, vec![30]);
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::object(Object::new()).is_truthy());
        assert!(!Value::Number(0.0).is_empty());
        assert!(Value::array(Vec::new()).is_empty());
    }
}
