//! Parsing of free-text measurements into FHIR quantity parts.
//!
//! The `extract*` helpers answer with an `isValid` flag object so templates can branch on the
//! match before reading `value`, `unit` or `range`.

use super::{arg, record, HelperContext, HelperError, HelperFn};
use crate::value::Value;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("decodeHtmlEntities", decode_html_entities),
    ("convertFeetAndInchesToCm", convert_feet_and_inches_to_cm),
    ("extractNumberAndUnit", extract_number_and_unit),
    ("extractComparator", extract_comparator),
    ("extractRangeFromQuantity", extract_range_from_quantity),
    ("extractDecimal", extract_decimal),
];

type HelperResult = Result<Value, HelperError>;

/// A FHIR `decimal`.
const DECIMAL: &str = r"-?(?:(?:0|[1-9][0-9]*)\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?";

const CM_PER_INCH: f64 = 2.54;

static FEET_AND_INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^({DECIMAL}) ft ({DECIMAL})( in)?$")).expect("static regex")
});

static NUMBER_AND_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)(\s*)([a-zA-Z/()\[\]]+)$").expect("static regex")
});

static COMPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^([<>]=?)({DECIMAL})$")).expect("static regex"));

static RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*({DECIMAL})\s*-\s*({DECIMAL})\s*$")).expect("static regex")
});

static WHOLE_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^(?:{DECIMAL})$")).expect("static regex"));

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#(\d+)|#[xX]([0-9a-fA-F]+)|([A-Za-z][A-Za-z0-9]*));").expect("static regex")
});

/// Named references understood by `decodeHtmlEntities`.
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", "\u{a0}"),
    ("copy", "©"),
    ("reg", "®"),
    ("trade", "™"),
    ("deg", "°"),
    ("plusmn", "±"),
    ("micro", "µ"),
    ("middot", "·"),
    ("times", "×"),
    ("divide", "÷"),
    ("le", "≤"),
    ("ge", "≥"),
    ("ne", "≠"),
    ("frac12", "½"),
    ("frac14", "¼"),
    ("frac34", "¾"),
    ("sup2", "²"),
    ("sup3", "³"),
    ("ndash", "–"),
    ("mdash", "—"),
    ("lsquo", "‘"),
    ("rsquo", "’"),
    ("ldquo", "“"),
    ("rdquo", "”"),
    ("bull", "•"),
    ("hellip", "…"),
];

fn invalid() -> Value {
    record([("isValid", Value::Bool(false))])
}

/// Text of a truthy argument, `None` for falsy ones.
fn text_arg(args: &[Value]) -> Option<String> {
    let value = arg(args, 0);
    value.is_truthy().then(|| value.to_js_string())
}

fn parse_float(text: &str) -> f64 {
    text.parse().unwrap_or(f64::NAN)
}

fn decode_html_entities(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let Some(text) = text_arg(args) else {
        return Ok(Value::String(String::new()));
    };
    let decoded = ENTITY.replace_all(&text, |caps: &Captures<'_>| {
        let resolved = if let Some(decimal) = caps.get(1) {
            decimal.as_str().parse().ok().and_then(char::from_u32).map(String::from)
        } else if let Some(hex) = caps.get(2) {
            u32::from_str_radix(hex.as_str(), 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
        } else {
            caps.get(3).and_then(|name| {
                NAMED_ENTITIES
                    .iter()
                    .find(|(entity, _)| *entity == name.as_str())
                    .map(|(_, text)| (*text).to_string())
            })
        };
        resolved.unwrap_or_else(|| caps[0].to_string())
    });
    Ok(Value::String(decoded.into_owned()))
}

/// `"5 ft 10 in"` → `{isValid, value: 177.8, unit: "cm"}`, rounded to two decimals.
fn convert_feet_and_inches_to_cm(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let Some(text) = text_arg(args) else {
        return Ok(invalid());
    };
    let Some(caps) = FEET_AND_INCHES.captures(&text) else {
        return Ok(invalid());
    };
    let inches = 12.0 * parse_float(&caps[1]) + parse_float(&caps[2]);
    let cm = (inches * CM_PER_INCH * 100.0).round() / 100.0;
    Ok(record([
        ("isValid", Value::Bool(true)),
        ("value", Value::Number(cm)),
        ("unit", Value::from("cm")),
    ]))
}

fn extract_number_and_unit(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let Some(text) = text_arg(args) else {
        return Ok(invalid());
    };
    let Some(caps) = NUMBER_AND_UNIT.captures(&text) else {
        return Ok(invalid());
    };
    Ok(record([
        ("isValid", Value::Bool(true)),
        ("value", Value::Number(parse_float(&caps[1]))),
        ("unit", Value::from(&caps[3])),
    ]))
}

/// `">=5.5"` → `{isValid, comparator: ">=", number: 5.5}`.
fn extract_comparator(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let Some(text) = text_arg(args) else {
        return Ok(invalid());
    };
    let Some(caps) = COMPARATOR.captures(&text) else {
        return Ok(invalid());
    };
    Ok(record([
        ("isValid", Value::Bool(true)),
        ("comparator", Value::from(&caps[1])),
        ("number", Value::Number(parse_float(&caps[2]))),
    ]))
}

/// A quantity whose `value` reads `low - high` becomes a FHIR range with the quantity's unit
/// on both ends.
fn extract_range_from_quantity(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let quantity = arg(args, 0);
    let value = quantity.get("value");
    if value.is_nullish() {
        return Ok(invalid());
    }
    let text = value.to_js_string();
    let Some(caps) = RANGE.captures(&text) else {
        return Ok(invalid());
    };

    let unit = quantity.get("unit");
    let unit = if unit.is_truthy() { unit } else { Value::from("") };
    let bound = |value: &str| record([("value", Value::from(value)), ("unit", unit.clone())]);
    Ok(record([
        ("isValid", Value::Bool(true)),
        ("range", record([("low", bound(&caps[1])), ("high", bound(&caps[2]))])),
    ]))
}

/// The number of a string that is exactly a FHIR decimal, undefined otherwise.
fn extract_decimal(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let Some(text) = text_arg(args) else {
        return Ok(Value::Undefined);
    };
    if !WHOLE_DECIMAL.is_match(&text) {
        return Ok(Value::Undefined);
    }
    if text.starts_with('.') {
        return Ok(Value::Number(parse_float(&format!("0{text}"))));
    }
    Ok(Value::Number(parse_float(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::common::object;
    use crate::helpers::testing::call;
    use crate::DataType;
    use serde_json::json;

    fn run(name: &str, value: Value) -> serde_json::Value {
        call(DataType::Cda, name, &[value])
            .unwrap_or_else(|e| panic!("{name} failed: {e}"))
            .to_json()
    }

    #[test]
    fn html_entities_decode_named_and_numeric_references() {
        assert_eq!(
            run("decodeHtmlEntities", Value::from("a &lt; b &amp;&#x3D; c &#39;d&#39; &unknown; &")),
            json!("a < b &= c 'd' &unknown; &")
        );
        assert_eq!(run("decodeHtmlEntities", Value::Undefined), json!(""));
    }

    #[test]
    fn feet_and_inches_convert_to_centimetres() {
        assert_eq!(
            run("convertFeetAndInchesToCm", Value::from("5 ft 10 in")),
            json!({"isValid": true, "value": 177.8, "unit": "cm"})
        );
        assert_eq!(
            run("convertFeetAndInchesToCm", Value::from("6 ft 0.5")),
            json!({"isValid": true, "value": 184.15, "unit": "cm"})
        );
        assert_eq!(
            run("convertFeetAndInchesToCm", Value::from("70 in")),
            json!({"isValid": false})
        );
    }

    #[test]
    fn number_and_unit_split_on_the_first_letter() {
        assert_eq!(
            run("extractNumberAndUnit", Value::from("120 mm[Hg]")),
            json!({"isValid": true, "value": 120, "unit": "mm[Hg]"})
        );
        assert_eq!(
            run("extractNumberAndUnit", Value::from("7.5mg/dL")),
            json!({"isValid": true, "value": 7.5, "unit": "mg/dL"})
        );
        assert_eq!(run("extractNumberAndUnit", Value::from("high")), json!({"isValid": false}));
    }

    #[test]
    fn comparators_prefix_a_decimal() {
        assert_eq!(
            run("extractComparator", Value::from(">=5.5")),
            json!({"isValid": true, "comparator": ">=", "number": 5.5})
        );
        assert_eq!(
            run("extractComparator", Value::from("<-1")),
            json!({"isValid": true, "comparator": "<", "number": -1})
        );
        assert_eq!(run("extractComparator", Value::from("=5")), json!({"isValid": false}));
        assert_eq!(run("extractComparator", Value::Null), json!({"isValid": false}));
    }

    #[test]
    fn quantity_ranges_carry_the_unit_to_both_ends() {
        let quantity = object(&[("value", Value::from(" 3.5 - 5 ")), ("unit", Value::from("mmol/L"))]);
        assert_eq!(
            run("extractRangeFromQuantity", quantity),
            json!({"isValid": true, "range": {
                "low": {"value": "3.5", "unit": "mmol/L"},
                "high": {"value": "5", "unit": "mmol/L"}
            }})
        );

        let unitless = object(&[("value", Value::from("1-2"))]);
        assert_eq!(
            run("extractRangeFromQuantity", unitless)["range"]["low"]["unit"],
            json!("")
        );
        assert_eq!(
            run("extractRangeFromQuantity", object(&[("value", Value::from("12"))])),
            json!({"isValid": false})
        );
        assert_eq!(run("extractRangeFromQuantity", Value::Undefined), json!({"isValid": false}));
    }

    #[test]
    fn decimals_follow_the_fhir_grammar() {
        assert_eq!(run("extractDecimal", Value::from("12.50")), json!(12.5));
        assert_eq!(run("extractDecimal", Value::from(".5")), json!(0.5));
        assert_eq!(run("extractDecimal", Value::from("-1e3")), json!(-1000));
        assert_eq!(run("extractDecimal", Value::from("1.2.3")), serde_json::Value::Null);
        assert_eq!(run("extractDecimal", Value::from("12 mg")), serde_json::Value::Null);
    }
}
