//! The fixed helper library.
//!
//! Helpers are plain function pointers looked up by name at compile time. Each one receives
//! exactly its positional arguments; hash arguments and the rendering session are reachable
//! through [`HelperContext`].
//!
//! The common set is shared by both data types. HL7 v2 and CDA each add their own extraction
//! helpers, and a type-specific name wins over a common one.

mod cda;
mod codec;
mod common;
pub(crate) mod dates;
mod hl7;
mod math;
pub(crate) mod null_flavor;
mod quantity;
mod report;

use crate::render::Renderer;
use crate::value::{Object, Value};
use crate::{DataType, TemplateError};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub(crate) type HelperFn =
    fn(&[Value], &mut HelperContext<'_, '_>) -> Result<Value, HelperError>;

type HelperTable = HashMap<&'static str, HelperFn>;

/// Errors raised by helpers. The renderer wraps them with the helper's name.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Template(Box<TemplateError>),
}

impl From<TemplateError> for HelperError {
    fn from(err: TemplateError) -> Self {
        HelperError::Template(Box::new(err))
    }
}

/// What a helper can see besides its arguments.
pub struct HelperContext<'r, 'a> {
    renderer: &'r mut Renderer<'a>,
    hash: Object,
}

impl<'r, 'a> HelperContext<'r, 'a> {
    pub(crate) fn new(renderer: &'r mut Renderer<'a>, hash: Object) -> Self {
        Self { renderer, hash }
    }

    /// The call's `key=value` arguments.
    pub fn hash(&self) -> &Object {
        &self.hash
    }

    pub fn data_type(&self) -> DataType {
        self.renderer.data_type()
    }

    /// Renders the named partial with `context` and returns its repaired JSON.
    pub(crate) fn evaluate(
        &mut self,
        name: &str,
        context: Value,
    ) -> Result<serde_json::Value, HelperError> {
        Ok(self.renderer.evaluate(name, context)?)
    }
}

static COMMON: Lazy<HelperTable> = Lazy::new(|| {
    [
        common::HELPERS,
        codec::HELPERS,
        dates::HELPERS,
        math::HELPERS,
        null_flavor::HELPERS,
        quantity::HELPERS,
    ]
    .into_iter()
    .flatten()
    .copied()
    .collect()
});

static HL7V2: Lazy<HelperTable> = Lazy::new(|| hl7::HELPERS.iter().copied().collect());

static CDA: Lazy<HelperTable> = Lazy::new(|| {
    [cda::HELPERS, report::HELPERS]
        .into_iter()
        .flatten()
        .copied()
        .collect()
});

/// Resolves a helper for `data_type`, preferring the type-specific set.
pub(crate) fn lookup(data_type: DataType, name: &str) -> Option<HelperFn> {
    let specific = match data_type {
        DataType::Hl7v2 => &*HL7V2,
        DataType::Cda => &*CDA,
    };
    specific.get(name).or_else(|| COMMON.get(name)).copied()
}

/// Positional argument `index`, or undefined when it was not supplied.
pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// Optional string argument, for encodings and similar switches.
pub(crate) fn str_arg(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

/// An object value built from literal pairs.
pub(crate) fn record<const N: usize>(pairs: [(&str, Value); N]) -> Value {
    Value::object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// `value.toString()`, which fails on null and undefined.
pub(crate) fn require_string(value: &Value) -> Result<String, HelperError> {
    if value.is_nullish() {
        return Err(HelperError::Failed(format!(
            "Cannot read properties of {} (reading 'toString')",
            value.to_js_string()
        )));
    }
    Ok(value.to_js_string())
}

/// Keys of the shape templates index with, like `Allergies` → `Allergies`, `2.16.1` → `2_16_1`.
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
