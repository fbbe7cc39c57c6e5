//! Date and time normalisation.
//!
//! Source data carries timestamps as HL7 `YYYY[MM[DD[HH[MM[SS[.S…]]]]]][+/-ZZZZ]` digit
//! strings. [`get_date_time`] turns them into a full ISO 8601 instant in UTC; [`get_date`]
//! keeps only the date part at the precision given. Values that are already ISO 8601 pass
//! through untouched.

use super::{arg, HelperContext, HelperError, HelperFn};
use crate::value::Value;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("addHyphensDate", add_hyphens_date),
    ("formatAsDateTime", format_as_date_time),
    ("now", now),
    ("startDateLteEndDate", start_date_lte_end_date),
];

/// Dates before this year are treated as placeholders, not real values.
const MIN_YEAR: i32 = 1900;

static HL7_DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}(\d{2}(\d{2}(\d{2}(\d{2}(\d{2}(\.\d+)?)?)?)?)?)?([-+]\d{1,4})?$")
        .expect("static regex")
});

static ISO_8601: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}(?:\.\d{1,7})?(?:Z|[-+]\d{2}:?\d{2})?)?$",
    )
    .expect("static regex")
});

static SPACE_SEPARATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(\.\d{3}Z)?$").expect("static regex")
});

/// Extracts the timestamp text from a helper argument, `None` for values that carry none.
fn date_text(value: &Value) -> Option<String> {
    match value {
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) => match map.get("value") {
            Some(inner) if inner.is_truthy() => Some(inner.to_js_string().trim().to_string()),
            _ => Some(value.to_js_string()),
        },
        other => Some(other.to_js_string().trim().to_string()),
    }
}

/// The parts of an HL7 timestamp. Missing parts are zero.
#[derive(Debug, Clone, Copy)]
struct Composition {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: i64,
    second: i64,
    millisecond: u32,
}

impl Composition {
    fn parse(digits: &str) -> Result<Self, HelperError> {
        let digits: String = digits.chars().filter(|c| *c != '.').collect();
        let padded = format!("{digits:0<17}");
        let part = |range: std::ops::Range<usize>| -> Result<u32, HelperError> {
            padded
                .get(range)
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| HelperError::Failed(format!("Bad input for Date type in {digits}")))
        };
        Ok(Self {
            year: part(0..4)? as i32,
            month: part(4..6)?,
            day: part(6..8)?,
            hour: part(8..10)?,
            minute: i64::from(part(10..12)?),
            second: i64::from(part(12..14)?),
            millisecond: part(14..17)?,
        })
    }

    /// Resolves to a UTC instant, `offset_minutes` being the source's offset east of UTC.
    fn to_utc(self, raw: &str, offset_minutes: i64) -> Result<NaiveDateTime, HelperError> {
        let (month, day) = match (self.month, self.day) {
            (0, 0) => (1, 1),
            (month, 0) => (month, 1),
            other => other,
        };
        if !(1..=12).contains(&month) {
            return Err(HelperError::Failed(format!("Invalid month: {raw}")));
        }
        let date = NaiveDate::from_ymd_opt(self.year, month, day)
            .ok_or_else(|| HelperError::Failed(format!("Invalid day: {raw}")))?;
        let time = NaiveTime::from_hms_milli_opt(self.hour, 0, 0, self.millisecond)
            .ok_or_else(|| HelperError::Failed(format!("Invalid hour: {raw}")))?;

        // minutes and seconds past their range carry into the next unit
        Ok(date.and_time(time) + Duration::minutes(self.minute - offset_minutes)
            + Duration::seconds(self.second))
    }
}

/// Splits `body[+-]offset`, returning the offset in minutes east of UTC.
fn split_offset(text: &str) -> Result<(&str, i64), HelperError> {
    let Some(at) = text.find(['-', '+']) else {
        return Ok((text, 0));
    };
    let (body, zone) = text.split_at(at);
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits = &zone[1..];
    let (hours, minutes) = if digits.len() <= 2 {
        (digits, "0")
    } else {
        digits.split_at(digits.len() - 2)
    };
    let parse = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| HelperError::Failed(format!("Invalid timezone offset: {text}")))
    };
    Ok((body, sign * (parse(hours)? * 60 + parse(minutes)?)))
}

/// Normalises a timestamp to `YYYY-MM-DDTHH:MM:SS.sssZ`.
///
/// Returns an empty string for missing values and for text that is not a timestamp at all.
///
/// # Errors
///
/// Returns [`HelperError::Failed`] for out-of-range months, days or hours, and for years
/// before 1900.
pub fn get_date_time(value: &Value) -> Result<String, HelperError> {
    let Some(text) = date_text(value) else {
        return Ok(String::new());
    };

    if SPACE_SEPARATED.is_match(&text) {
        let fixed = text.replacen(' ', "T", 1);
        if fixed.ends_with('Z') {
            return Ok(fixed);
        }
        return Ok(format!("{fixed}.000Z"));
    }
    if ISO_8601.is_match(&text) {
        return Ok(text);
    }
    if !HL7_DATE_TIME.is_match(&text) {
        return Ok(String::new());
    }

    let (body, offset) = split_offset(&text)?;
    let composition = Composition::parse(body)?;
    if composition.year < MIN_YEAR {
        return Err(HelperError::Failed(format!(
            "Invalid year: {text} is before {MIN_YEAR}"
        )));
    }
    let instant = composition.to_utc(&text, offset)?;
    Ok(instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// Normalises a timestamp to `YYYY`, `YYYY-MM` or `YYYY-MM-DD`, following the input's
/// precision.
///
/// Returns an empty string for missing values, non-timestamps and years before 1900.
///
/// # Errors
///
/// Returns [`HelperError::Failed`] for invalid months and days, and for digit runs of a
/// length no date has.
pub fn get_date(value: &Value) -> Result<String, HelperError> {
    let Some(text) = date_text(value) else {
        return Ok(String::new());
    };
    if ISO_8601.is_match(&text) {
        return Ok(text);
    }
    if !HL7_DATE_TIME.is_match(&text) {
        return Ok(String::new());
    }

    let (body, _) = split_offset(&text)?;
    let digits = body.split('.').next().unwrap_or(body);
    let composition = Composition::parse(digits)?;
    if composition.year < MIN_YEAR {
        return Ok(String::new());
    }

    match digits.len() {
        4 => Ok(digits.to_string()),
        6 => {
            if !(1..=12).contains(&composition.month) {
                return Err(HelperError::Failed(format!("Invalid month: {text}")));
            }
            Ok(format!("{}-{}", &digits[0..4], &digits[4..6]))
        }
        n if n >= 8 => {
            if !(1..=12).contains(&composition.month) {
                return Err(HelperError::Failed(format!("Invalid month: {text}")));
            }
            NaiveDate::from_ymd_opt(composition.year, composition.month, composition.day)
                .ok_or_else(|| HelperError::Failed(format!("Invalid day: {text}")))?;
            Ok(format!(
                "{}-{}-{}",
                &digits[0..4],
                &digits[4..6],
                &digits[6..8]
            ))
        }
        _ => Err(HelperError::Failed(format!(
            "Bad input for Date type in {text}"
        ))),
    }
}

/// Instant of a normalised timestamp, for ordering comparisons.
fn instant(text: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed);
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn add_hyphens_date(args: &[Value], _: &mut HelperContext<'_, '_>) -> Result<Value, HelperError> {
    get_date(&arg(args, 0)).map(Value::String)
}

/// Logs and yields undefined instead of failing on an invalid timestamp.
fn format_as_date_time(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> Result<Value, HelperError> {
    match get_date_time(&arg(args, 0)) {
        Ok(text) => Ok(Value::String(text)),
        Err(e) => {
            tracing::warn!(error = %e, "formatAsDateTime received an invalid timestamp");
            Ok(Value::Undefined)
        }
    }
}

fn now(_: &[Value], _: &mut HelperContext<'_, '_>) -> Result<Value, HelperError> {
    Ok(Value::String(
        Utc::now().format("%Y%m%d%H%M%S%.3f").to_string(),
    ))
}

fn start_date_lte_end_date(
    args: &[Value],
    _: &mut HelperContext<'_, '_>,
) -> Result<Value, HelperError> {
    Ok(Value::Bool(start_before_end(&arg(args, 0), &arg(args, 1))?))
}

/// True when both timestamps parse and `start` is not after `end`.
pub(crate) fn start_before_end(start: &Value, end: &Value) -> Result<bool, HelperError> {
    let start = get_date_time(start)?;
    let end = get_date_time(end)?;
    Ok(match (instant(&start), instant(&end)) {
        (Some(start), Some(end)) => start <= end,
        _ => false,
    })
}
