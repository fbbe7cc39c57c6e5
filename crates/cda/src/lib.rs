//! CDA document normalisation.
//!
//! A CDA document is turned into the generic attributed tree the templates navigate:
//!
//! - attributes are merged onto their element (`<id root="1.2"/>` becomes `{"root": "1.2"}`)
//! - repeated child elements become arrays, single children stay objects
//! - element text is stored under the reserved `_` key
//! - namespace prefixes are kept in names (`sdtc:raceCode`, `xsi:type`)
//!
//! Parsing runs in three steps: a textual pre-pass that repairs common well-formedness
//! violations (bare `&`), the XML-to-tree conversion, and a reference pass that splices
//! narrative text into `text`/`originalText`/`value` properties pointing at `#id`.
//!
//! The tree conversion is attempted on the pre-processed text, then on the source as given,
//! and finally with a lenient reader that recovers from unbalanced tags.

mod encounter;
mod preprocess;
mod references;
mod tree;

pub use encounter::{EncounterMetadata, EncounterTimePeriod};
pub use preprocess::escape_bare_ampersands;

use serde_json::Value;

/// Key holding element text in the tree.
pub const TEXT_KEY: &str = "_";

/// Key holding base64-encoded XML for referenced elements without inline text.
pub const BASE64_KEY: &str = "_b64";

/// Key on the root object holding the unmodified source document.
pub const ORIGINAL_DATA_KEY: &str = "_originalData";

/// Errors raised while parsing a CDA document.
#[derive(Debug, thiserror::Error)]
pub enum CdaError {
    /// The document has no structured body to convert.
    #[error("Can not convert unstructured CDA with nonXMLBody")]
    UnstructuredBody,

    /// The document is not well-formed XML, even after the pre-pass.
    #[error("Invalid CDA document: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The lenient reader could not tokenize the document either.
    #[error("Invalid CDA document: {0}")]
    Lenient(#[from] quick_xml::Error),

    #[error("Invalid CDA document: no root element")]
    NoRootElement,
}

/// Type alias for Results that can fail with a [`CdaError`].
pub type CdaResult<T> = Result<T, CdaError>;

/// A parsed CDA document.
#[derive(Debug, Clone)]
pub struct CdaDocument {
    root: Value,
    encounter: EncounterMetadata,
}

impl CdaDocument {
    /// Parses raw CDA XML into the attributed tree and resolves narrative references.
    ///
    /// # Errors
    ///
    /// Returns [`CdaError::UnstructuredBody`] for documents using `nonXMLBody`, and
    /// [`CdaError::Lenient`] or [`CdaError::NoRootElement`] when not even the lenient reader
    /// finds a document.
    pub fn parse(xml: &str) -> CdaResult<Self> {
        if xml.contains("nonXMLBody") {
            return Err(CdaError::UnstructuredBody);
        }

        let prepared = preprocess::prepare(xml);
        let (mut root, index) = tree::build(&prepared)
            .or_else(|err| {
                tracing::debug!(error = %err, "pre-processed document did not parse, retrying source");
                tree::build(xml)
            })
            .or_else(|err| {
                tracing::warn!(error = %err, "CDA document is not well-formed, reading it leniently");
                tree::build_lenient(xml)
            })?;
        references::resolve(&mut root, &index);

        if let Value::Object(map) = &mut root {
            map.insert(ORIGINAL_DATA_KEY.to_string(), Value::String(xml.to_string()));
        }

        let encounter = EncounterMetadata::extract(&root);
        tracing::debug!(
            narrative_ids = index.text_len(),
            "parsed CDA document"
        );

        Ok(Self { root, encounter })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_root(self) -> Value {
        self.root
    }

    pub fn encounter(&self) -> &EncounterMetadata {
        &self.encounter
    }
}
