//! Comparison, collection, string and control helpers.

use super::{arg, require_string, HelperContext, HelperError, HelperFn};
use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("eq", eq),
    ("ne", ne),
    ("lt", lt),
    ("gt", gt),
    ("lte", lte),
    ("gte", gte),
    ("not", not),
    ("and", and),
    ("or", or),
    ("elementAt", element_at),
    ("charAt", char_at),
    ("length", length),
    ("strLength", str_length),
    ("slice", slice),
    ("strSlice", str_slice),
    ("split", split),
    ("replace", replace),
    ("match", match_all),
    ("contains", contains),
    ("startsWith", starts_with),
    ("toArray", to_array),
    ("multipleToArray", multiple_to_array),
    ("concat", concat),
    ("coalesce", coalesce),
    ("assert", assert),
    ("evaluate", evaluate),
    ("optionalEvaluate", optional_evaluate),
    ("generateUUID", generate_uuid),
    ("generateUUIDV2", generate_uuid_v2),
    ("addHyphensSSN", add_hyphens_ssn),
    ("toString", to_string),
    ("toJsonString", to_json_string),
    ("toJsonStringPrettier", to_json_string_prettier),
    ("toLower", to_lower),
    ("toUpper", to_upper),
    ("trim", trim),
    ("trimAndLower", trim_and_lower),
    ("trimAndUpper", trim_and_upper),
];

type HelperResult = Result<Value, HelperError>;

fn eq(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let x = arg(args, 0);
    Ok(Value::Bool(args.iter().skip(1).any(|a| x.loose_eq(a))))
}

fn ne(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let x = arg(args, 0);
    Ok(Value::Bool(args.iter().skip(1).all(|a| !x.loose_eq(a))))
}

fn compare(args: &[Value], accept: fn(Ordering) -> bool) -> HelperResult {
    let ordering = arg(args, 0).js_compare(&arg(args, 1));
    Ok(Value::Bool(ordering.is_some_and(accept)))
}

fn lt(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    compare(args, Ordering::is_lt)
}

fn gt(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    compare(args, Ordering::is_gt)
}

fn lte(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    compare(args, Ordering::is_le)
}

fn gte(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    compare(args, Ordering::is_ge)
}

fn not(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(Value::Bool(!arg(args, 0).is_truthy()))
}

fn and(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(Value::Bool(args.iter().all(Value::is_truthy)))
}

fn or(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(Value::Bool(args.iter().any(Value::is_truthy)))
}

fn element_at(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let index = arg(args, 1);
    Ok(arg(args, 0).get(&index.to_js_string()))
}

fn char_at(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let index = arg(args, 1).to_number();
    let index = if index.is_nan() { Some(0) } else { to_index(index) };
    let c = index.and_then(|i| text.chars().nth(i));
    Ok(Value::String(c.map(String::from).unwrap_or_default()))
}

fn to_index(n: f64) -> Option<usize> {
    (n >= 0.0 && n.is_finite()).then(|| n.trunc() as usize)
}

fn length(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let value = arg(args, 0);
    if value.is_truthy() {
        Ok(value.get("length"))
    } else {
        Ok(Value::Number(0.0))
    }
}

fn str_length(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let value = arg(args, 0);
    if value.is_truthy() {
        Ok(Value::from(value.to_js_string().chars().count()))
    } else {
        Ok(Value::Number(0.0))
    }
}

/// Resolves `slice(start, end)` bounds the way arrays and strings do, negatives counting
/// from the end.
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |value: &Value, default: usize| -> usize {
        if matches!(value, Value::Undefined) {
            return default;
        }
        let n = value.to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            n.min(len as f64) as usize
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start, end.max(start))
}

fn slice(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let (start, end) = (arg(args, 1), arg(args, 2));
    match arg(args, 0) {
        Value::Array(items) => {
            let (from, to) = slice_bounds(items.len(), &start, &end);
            Ok(Value::array(items[from..to].to_vec()))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (from, to) = slice_bounds(chars.len(), &start, &end);
            Ok(Value::String(chars[from..to].iter().collect()))
        }
        other => Err(HelperError::Failed(format!(
            "{} has no slice method",
            other.type_name()
        ))),
    }
}

fn str_slice(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let chars: Vec<char> = require_string(&arg(args, 0))?.chars().collect();
    let (from, to) = slice_bounds(chars.len(), &arg(args, 1), &arg(args, 2));
    Ok(Value::String(chars[from..to].iter().collect()))
}

fn regex(pattern: &Value) -> Result<Regex, HelperError> {
    Regex::new(&pattern.to_js_string())
        .map_err(|e| HelperError::Failed(format!("Invalid regular expression: {e}")))
}

fn split(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let pattern = regex(&arg(args, 1))?;
    Ok(Value::array(
        pattern.split(&text).map(Value::from).collect(),
    ))
}

fn replace(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let pattern = regex(&arg(args, 1))?;
    let replacement = arg(args, 2).to_js_string();
    Ok(Value::String(
        pattern
            .replace_all(&text, replacement.as_str())
            .into_owned(),
    ))
}

fn match_all(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let pattern = regex(&arg(args, 1))?;
    let matches: Vec<Value> = pattern
        .find_iter(&text)
        .map(|m| Value::from(m.as_str()))
        .collect();
    if matches.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::array(matches))
    }
}

fn contains(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let parent = arg(args, 0);
    if !parent.is_truthy() {
        return Ok(Value::Bool(false));
    }
    let parent = parent.to_js_string();
    Ok(Value::Bool(
        args.iter()
            .skip(1)
            .any(|child| parent.contains(&child.to_js_string())),
    ))
}

fn starts_with(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    match arg(args, 0) {
        Value::String(text) => Ok(Value::Bool(text.starts_with(&arg(args, 1).to_js_string()))),
        other => Err(HelperError::Failed(format!(
            "{} has no startsWith method",
            other.type_name()
        ))),
    }
}

fn to_array(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    match arg(args, 0) {
        value @ Value::Array(_) => Ok(value),
        value if value.is_truthy() => Ok(Value::array(vec![value])),
        _ => Ok(Value::array(Vec::new())),
    }
}

/// Flattens its arguments one level and drops repeats. Objects compare by JSON content.
fn multiple_to_array(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let mut seen_objects = HashSet::new();
    let mut seen_primitives: Vec<Value> = Vec::new();
    let mut combined = Vec::new();

    for value in args.iter().flat_map(|a| match a {
        Value::Array(items) => items.to_vec(),
        other => vec![other.clone()],
    }) {
        let fresh = match &value {
            Value::Array(_) | Value::Object(_) => seen_objects.insert(value.to_json().to_string()),
            primitive => {
                let fresh = !seen_primitives.iter().any(|p| same_value(p, primitive));
                if fresh {
                    seen_primitives.push(primitive.clone());
                }
                fresh
            }
        };
        if fresh {
            combined.push(value);
        }
    }
    Ok(Value::array(combined))
}

/// Identity the way a set of primitives sees it: no type coercion.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Hl7(x), Value::Hl7(y)) => x.text() == y.text(),
        _ => false,
    }
}

fn concat(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    if let Some(Value::Array(_)) = args.first() {
        let items = args.iter().flat_map(|a| match a {
            Value::Array(items) => items.to_vec(),
            other => vec![other.clone()],
        });
        return Ok(Value::array(items.collect()));
    }
    Ok(Value::String(
        args.iter().map(Value::to_js_string).collect::<String>(),
    ))
}

fn coalesce(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(args
        .iter()
        .find(|a| !matches!(a, Value::Undefined))
        .cloned()
        .unwrap_or_default())
}

fn assert(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    if arg(args, 0).is_truthy() {
        Ok(Value::from(""))
    } else {
        Err(HelperError::Failed(arg(args, 1).to_js_string()))
    }
}

fn evaluate_partial(
    args: &[Value],
    ctx: &mut HelperContext<'_, '_>,
    keep_empty: bool,
) -> HelperResult {
    let name = match arg(args, 0) {
        Value::String(name) => name,
        other => {
            return Err(HelperError::InvalidArgument(format!(
                "template path must be a string, got {}",
                other.type_name()
            )))
        }
    };
    let context = Value::object(ctx.hash().clone());
    let result = ctx.evaluate(&name, context)?;
    let empty = result.as_object().is_some_and(|map| map.is_empty());
    if empty && !keep_empty {
        return Ok(Value::Undefined);
    }
    Ok(Value::from_json(result))
}

fn evaluate(args: &[Value], ctx: &mut HelperContext<'_, '_>) -> HelperResult {
    evaluate_partial(args, ctx, false)
}

fn optional_evaluate(args: &[Value], ctx: &mut HelperContext<'_, '_>) -> HelperResult {
    evaluate_partial(args, ctx, true)
}

fn uuid_from(name: &str) -> Value {
    Value::String(Uuid::new_v3(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
}

fn generate_uuid(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(uuid_from(&arg(args, 0).to_js_string()))
}

/// Like `generateUUID`, but line breaks in the input (real or escaped) do not change the id.
fn generate_uuid_v2(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let value = arg(args, 0);
    if value.is_nullish() {
        return Err(HelperError::InvalidArgument(value.to_js_string()));
    }
    let content = value
        .to_js_string()
        .replace(['\r', '\n'], "")
        .replace("\\r", "")
        .replace("\\n", "");
    Ok(uuid_from(&content))
}

fn add_hyphens_ssn(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let value = arg(args, 0);
    if value.is_nullish() {
        return Ok(Value::from(""));
    }
    let ssn = value.to_js_string();
    if ssn.len() != 9 || !ssn.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(Value::String(ssn));
    }
    Ok(Value::String(format!(
        "{}-{}-{}",
        &ssn[0..3],
        &ssn[3..5],
        &ssn[5..9]
    )))
}

fn to_string(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(Value::String(require_string(&arg(args, 0))?))
}

fn to_json_string(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    match arg(args, 0) {
        Value::Undefined => Ok(Value::Undefined),
        value => Ok(Value::String(value.to_json().to_string())),
    }
}

fn to_json_string_prettier(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    match arg(args, 0) {
        Value::Undefined => Ok(Value::Undefined),
        value => serde_json::to_string_pretty(&value.to_json())
            .map(Value::String)
            .map_err(|e| HelperError::Failed(e.to_string())),
    }
}

/// Case and whitespace helpers render null and undefined as an empty string.
fn text_or_empty(args: &[Value], transform: fn(&str) -> String) -> HelperResult {
    let value = arg(args, 0);
    if value.is_nullish() {
        return Ok(Value::from(""));
    }
    Ok(Value::String(transform(&value.to_js_string())))
}

fn to_lower(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    text_or_empty(args, str::to_lowercase)
}

fn to_upper(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    text_or_empty(args, str::to_uppercase)
}

fn trim(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    text_or_empty(args, |s| s.trim().to_string())
}

fn trim_and_lower(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    text_or_empty(args, |s| s.trim().to_lowercase())
}

fn trim_and_upper(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    text_or_empty(args, |s| s.trim().to_uppercase())
}

/// Object literal helper for tests and sibling modules.
#[cfg(test)]
pub(crate) fn object(pairs: &[(&str, Value)]) -> Value {
    let map: crate::value::Object = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Value::object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::testing::{call, call_with, strs};
    use crate::test_support;
    use crate::value::Object;
    use crate::DataType;

    fn run(name: &str, args: &[Value]) -> Value {
        call(DataType::Cda, name, args).expect("helper succeeds")
    }

    fn json(value: Value) -> serde_json::Value {
        value.to_json()
    }

    #[test]
    fn eq_matches_any_candidate() {
        let args = [Value::from("foo"), Value::from("bar"), Value::from("foo")];
        assert!(run("eq", &args).is_truthy());
        let args = [Value::Number(1.0), Value::from("2"), Value::Number(3.0)];
        assert!(!run("eq", &args).is_truthy());
        let args = [Value::from("1"), Value::from("1"), Value::from("2")];
        assert!(run("eq", &args).is_truthy());
    }

    #[test]
    fn ne_requires_every_candidate_to_differ() {
        let args = strs(&["foo", "bar", "foo"]);
        assert!(!run("ne", &args).is_truthy());
        let args = strs(&["foo", "bar", "abc", "def"]);
        assert!(run("ne", &args).is_truthy());
    }

    #[test]
    fn logic_helpers_fold_truthiness() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert!(!run("and", &[t.clone(), t.clone(), t.clone(), f.clone()]).is_truthy());
        assert!(run("or", &[f.clone(), f.clone(), t.clone(), f.clone()]).is_truthy());
        assert!(run("not", &[f]).is_truthy());
        assert!(run("lte", &[Value::Number(2.0), Value::Number(2.0)]).is_truthy());
        assert!(!run("gt", &[Value::Number(1.0), Value::Number(1.0)]).is_truthy());
    }

    #[test]
    fn collection_helpers() {
        let abc = Value::array(strs(&["a", "b", "c"]));
        assert_eq!(run("elementAt", &[abc.clone(), Value::Number(1.0)]).to_text(), "b");
        assert!(matches!(
            run("elementAt", &[abc.clone(), Value::Number(5.0)]),
            Value::Undefined
        ));
        assert_eq!(run("length", &[abc.clone()]).to_number(), 3.0);
        assert_eq!(run("length", &[Value::Undefined]).to_number(), 0.0);

        let abcd = Value::array(strs(&["a", "b", "c", "d"]));
        assert_eq!(
            json(run("slice", &[abcd, Value::Number(1.0), Value::Number(3.0)])),
            serde_json::json!(["b", "c"])
        );
        assert_eq!(
            json(run("concat", &[Value::array(strs(&["a", "b"])), Value::from("c")])),
            serde_json::json!(["a", "b", "c"])
        );
        assert_eq!(run("concat", &strs(&["a", "b", "c"])).to_text(), "abc");
        assert_eq!(
            json(run("toArray", &[Value::from("a")])),
            serde_json::json!(["a"])
        );
    }

    #[test]
    fn multiple_to_array_flattens_and_dedupes() {
        let code = object(&[("code", Value::from("1"))]);
        let args = [
            Value::array(vec![code.clone(), Value::from("x")]),
            code,
            Value::from("x"),
            Value::from("y"),
        ];
        assert_eq!(
            json(run("multipleToArray", &args)),
            serde_json::json!([{"code": "1"}, "x", "y"])
        );
    }

    #[test]
    fn string_helpers() {
        assert_eq!(run("charAt", &[Value::from("abc"), Value::Number(1.0)]).to_text(), "b");
        assert_eq!(
            run("strSlice", &[Value::from("abcd"), Value::Number(1.0), Value::Number(10.0)]).to_text(),
            "bcd"
        );
        assert_eq!(
            json(run("split", &strs(&["a,x,b,x,c", ",x"]))),
            serde_json::json!(["a", ",b", ",c"])
        );
        assert_eq!(run("replace", &strs(&["abcdbc", "bc", "x"])).to_text(), "axdx");
        assert_eq!(
            json(run("match", &strs(&["aBcdE", "[A-Z]"]))),
            serde_json::json!(["B", "E"])
        );
        assert!(run("contains", &strs(&["abcd", "bc"])).is_truthy());
        assert!(!run("contains", &[Value::Undefined, Value::from("bc")]).is_truthy());
        assert_eq!(run("toLower", &[Value::Undefined]).to_text(), "");
        assert_eq!(run("trimAndUpper", &[Value::from("  ab ")]).to_text(), "AB");
    }

    #[test]
    fn string_helpers_fail_on_missing_input() {
        assert!(call(DataType::Cda, "charAt", &[Value::Undefined, Value::Number(2.0)]).is_err());
        assert!(call(DataType::Cda, "strSlice", &[Value::Undefined]).is_err());
        assert!(call(DataType::Cda, "slice", &[Value::Undefined]).is_err());
        assert!(call(DataType::Cda, "split", &strs(&["a,x", ",(x"])).is_err());
        assert!(call(DataType::Cda, "match", &strs(&["aBcdE", "[A-Z"])).is_err());
    }

    #[test]
    fn assert_raises_its_message() {
        assert_eq!(run("assert", &[Value::Bool(true), Value::from("abc")]).to_text(), "");
        let result = call(DataType::Cda, "assert", &[Value::Bool(false), Value::from("abc")]);
        assert!(matches!(result, Err(HelperError::Failed(m)) if m == "abc"));
    }

    #[test]
    fn uuid_v2_ignores_line_breaks() {
        let pairs = [
            ("https://loc\ralhost/blah", "https://loca\nlhost/blah"),
            ("https://localhost\r\n/blah", "https://localhost/blah"),
            ("https://localho\\rst/blah", "https://localh\\nost/blah"),
            ("https://loca\r\nlhost/blah", "https://localhost/blah"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                run("generateUUIDV2", &[Value::from(a)]).to_text(),
                run("generateUUIDV2", &[Value::from(b)]).to_text()
            );
        }
        assert_ne!(
            run("generateUUIDV2", &[Value::from("https://localhost/foo")]).to_text(),
            run("generateUUIDV2", &[Value::from("https://localhost/bar")]).to_text()
        );
        assert_eq!(
            run("generateUUID", &[Value::from("https://localhost/blah")]).to_text(),
            run("generateUUIDV2", &[Value::from("https://localhost/blah")]).to_text()
        );

        let result = call(DataType::Cda, "generateUUIDV2", &[Value::Null]);
        assert!(matches!(&result, Err(HelperError::InvalidArgument(_))));
        assert_eq!(
            result.map(|_| ()).unwrap_err().to_string(),
            "Invalid argument: null"
        );
    }

    #[test]
    fn ssn_hyphens_only_apply_to_nine_digits() {
        assert_eq!(run("addHyphensSSN", &[Value::from("123456789")]).to_text(), "123-45-6789");
        assert_eq!(run("addHyphensSSN", &[Value::from("123-45-67")]).to_text(), "123-45-67");
        assert_eq!(run("addHyphensSSN", &[Value::Undefined]).to_text(), "");
    }

    #[test]
    fn evaluate_renders_partial_with_hash() {
        let mut cache = test_support::cache(&[(
            "cda/Utils/Child.hbs",
            r#"{"a":"{{x1}}", "b":"{{x2}}", "c":""}"#,
        )]);
        let mut hash = Object::new();
        hash.insert("x1".into(), Value::from("1"));
        hash.insert("x2".into(), Value::from("2"));

        let result = call_with(
            DataType::Cda,
            "evaluate",
            &[Value::from("Utils/Child.hbs")],
            hash,
            &mut cache,
        )
        .expect("evaluate succeeds");
        assert_eq!(result.to_json(), serde_json::json!({"a": "1", "b": "2"}));
    }

    #[test]
    fn evaluate_of_empty_output_depends_on_variant() {
        let mut cache = test_support::cache(&[("cda/Utils/Empty.hbs", r#"{"a":"{{missing}}"}"#)]);
        let args = [Value::from("Utils/Empty.hbs")];

        let result = call_with(DataType::Cda, "evaluate", &args, Object::new(), &mut cache)
            .expect("evaluate succeeds");
        assert!(matches!(result, Value::Undefined));

        let result = call_with(DataType::Cda, "optionalEvaluate", &args, Object::new(), &mut cache)
            .expect("optionalEvaluate succeeds");
        assert_eq!(result.to_json(), serde_json::json!({}));
    }

    #[test]
    fn evaluate_of_missing_partial_fails() {
        let result = call(DataType::Cda, "evaluate", &[Value::from("Nope.hbs")]);
        assert!(matches!(result, Err(HelperError::Template(_))));
    }
}
