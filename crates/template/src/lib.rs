//! Template engine for the converter.
//!
//! Conversion templates are written in a small Handlebars dialect and render near-JSON text.
//! This crate compiles them, evaluates them against a parsed source message, and resolves
//! partials lazily through a [`TemplateAdapter`], one per [`DataType`].
//!
//! ## Pieces
//!
//! - [`Template`] is a compiled template bound to one data type's helper set
//! - [`TemplateAdapter`] owns the memoized partial cache and any per-request overrides
//! - [`AdapterRegistry`] decides when an adapter must be rebuilt
//! - [`Value`] is what templates and helpers operate on
//!
//! HL7 v2 templates may address fields with the compact `PID-5-1` form; the HL7 v2 adapter
//! expands it to `PID.[5].[1]` before compiling.
//!
//! ## Example
//!
//! ```
//! use template_engine::{DataType, Object, Template, TemplateAdapter, Value};
//! use converter_files::{FsTemplateStore, TemplateCache};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let dir = tempfile::TempDir::new()?;
//! let mut cache = TemplateCache::new(Arc::new(FsTemplateStore::new(dir.path())?));
//! let adapter = TemplateAdapter::new(DataType::Cda, HashMap::new());
//! let template = adapter.compile("inline", r#"{"id":"{{msg.id}}"}"#)?;
//!
//! let mut msg = Object::new();
//! msg.insert("id".into(), Value::from("42"));
//! let mut context = Object::new();
//! context.insert("msg".into(), Value::object(msg));
//!
//! let json = adapter.render_json(&template, Value::object(context), Object::new(), &mut cache)?;
//! assert_eq!(json["id"], "42");
//! # Ok(())
//! # }
//! ```

mod adapter;
mod ast;
mod helpers;
mod parser;
mod preprocess;
mod render;
mod value;

pub use adapter::{AdapterRegistry, TemplateAdapter};
pub use helpers::dates::{get_date, get_date_time};
pub use helpers::HelperError;
pub use parser::Template;
pub use value::{format_number, Hl7Node, Object, Value};

use std::fmt;
use std::str::FromStr;

/// Partial and `evaluate` nesting allowed before rendering gives up.
pub const MAX_RENDER_DEPTH: usize = 64;

/// Source formats with a template set of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Hl7v2,
    Cda,
}

impl DataType {
    /// Directory holding this data type's templates in the template store.
    pub fn dir(&self) -> &'static str {
        match self {
            DataType::Hl7v2 => "hl7v2",
            DataType::Cda => "cda",
        }
    }

    /// Store key of a template belonging to this data type.
    pub fn template_key(&self, name: &str) -> String {
        format!("{}/{}", self.dir(), name.trim_start_matches('/'))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

impl FromStr for DataType {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hl7v2" => Ok(DataType::Hl7v2),
            "cda" => Ok(DataType::Cda),
            other => Err(TemplateError::UnsupportedDataType(other.to_string())),
        }
    }
}

/// Errors raised while compiling or evaluating templates.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Partial not found: {0}")]
    PartialNotFound(String),

    #[error("Error during template compilation of {template}: {message}")]
    Syntax { template: String, message: String },

    #[error("Unknown helper \"{name}\" in {template}")]
    UnknownHelper { template: String, name: String },

    #[error("helper \"{name}\" : {source}")]
    Helper {
        name: String,
        #[source]
        source: HelperError,
    },

    #[error("maximum template depth of {0} exceeded")]
    DepthExceeded(usize),

    #[error("template output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("template store error: {0}")]
    Store(#[from] converter_files::FilesError),
}

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

/// Repairs raw template output and parses it. Output with no content at all counts as `{}`.
///
/// # Errors
///
/// Returns the JSON parse error when the repaired text is still not valid JSON.
pub fn repair_output(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    json_repair::repair_to_value(raw)
}

#[cfg(test)]
pub(crate) mod test_support {
    use converter_files::{FilesError, FilesResult, TemplateCache, TemplateStore};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// In-memory store for tests that do not care about the filesystem.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryStore {
        entries: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl MemoryStore {
        pub(crate) fn with(entries: &[(&str, &str)]) -> Self {
            let store = Self::default();
            for (key, content) in entries {
                store
                    .write(key, content.as_bytes())
                    .expect("memory write cannot fail");
            }
            store
        }
    }

    impl TemplateStore for MemoryStore {
        fn list(&self) -> FilesResult<Vec<String>> {
            Ok(self.entries.lock().expect("lock").keys().cloned().collect())
        }

        fn read(&self, key: &str) -> FilesResult<Vec<u8>> {
            self.entries
                .lock()
                .expect("lock")
                .get(key)
                .cloned()
                .ok_or_else(|| FilesError::NotFound(key.to_string()))
        }

        fn write(&self, key: &str, bytes: &[u8]) -> FilesResult<()> {
            self.entries
                .lock()
                .expect("lock")
                .insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        fn delete(&self, key: &str) -> FilesResult<()> {
            self.entries
                .lock()
                .expect("lock")
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| FilesError::NotFound(key.to_string()))
        }
    }

    pub(crate) fn cache(entries: &[(&str, &str)]) -> TemplateCache {
        TemplateCache::new(Arc::new(MemoryStore::with(entries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_parses_case_insensitively() {
        assert_eq!("HL7v2".parse::<DataType>().ok(), Some(DataType::Hl7v2));
        assert_eq!("cda".parse::<DataType>().ok(), Some(DataType::Cda));
        assert!(matches!(
            "fhir".parse::<DataType>(),
            Err(TemplateError::UnsupportedDataType(_))
        ));
    }

    #[test]
    fn template_keys_are_namespaced() {
        assert_eq!(DataType::Hl7v2.template_key("ADT_A01.hbs"), "hl7v2/ADT_A01.hbs");
        assert_eq!(DataType::Cda.template_key("/ccd.hbs"), "cda/ccd.hbs");
    }

    #[test]
    fn empty_output_repairs_to_empty_object() {
        assert_eq!(
            repair_output("  \n").expect("empty output is valid"),
            serde_json::json!({})
        );
        assert!(repair_output("{\"a\":").is_err());
    }
}
