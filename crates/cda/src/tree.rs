//! XML to attributed JSON tree conversion.
//!
//! [`build`] is the strict path over `roxmltree`. [`build_lenient`] reads the same shape from a
//! `quick-xml` event stream and tolerates mismatched or missing end tags: an end tag closes the
//! nearest open element of that name along with everything opened after it, stray end tags are
//! ignored, and elements still open at the end of input are closed there.

use crate::{CdaError, CdaResult, TEXT_KEY};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use roxmltree::{Document, Node, ParsingOptions};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Narrative ids found while building the tree.
#[derive(Debug, Default)]
pub(crate) struct IdIndex {
    /// id -> inline text of the element carrying it
    text: HashMap<String, String>,
    /// id -> base64 XML of elements carrying an id but no inline text
    base64: HashMap<String, String>,
}

impl IdIndex {
    pub(crate) fn text(&self, id: &str) -> Option<&str> {
        self.text.get(id).map(String::as_str)
    }

    pub(crate) fn base64(&self, id: &str) -> Option<&str> {
        self.base64.get(id).map(String::as_str)
    }

    pub(crate) fn text_len(&self) -> usize {
        self.text.len()
    }
}

/// Parses `xml` and converts it to `{rootName: element}` plus the id index.
pub(crate) fn build(xml: &str) -> CdaResult<(Value, IdIndex)> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(xml, options)?;
    let root = document.root_element();

    let mut index = IdIndex::default();
    let mut top = Map::new();
    top.insert(qualified_name(&root), convert_element(&root, xml, &mut index));
    Ok((Value::Object(top), index))
}

fn convert_element(node: &Node, xml: &str, index: &mut IdIndex) -> Value {
    let mut obj = Map::new();

    for attribute in node.attributes() {
        let name = match attribute.namespace().and_then(|ns| node.lookup_prefix(ns)) {
            Some(prefix) => format!("{prefix}:{}", attribute.name()),
            None => attribute.name().to_string(),
        };
        append(&mut obj, name, Value::String(attribute.value().to_string()));
    }

    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            let value = convert_element(&child, xml, index);
            append(&mut obj, qualified_name(&child), value);
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }

    let source = xml.get(node.range()).unwrap_or_default();
    finish(obj, &text, source, index)
}

/// Stores the element's trimmed text and indexes its ids. `source` is the element's markup.
fn finish(mut obj: Map<String, Value>, text: &str, source: &str, index: &mut IdIndex) -> Value {
    let text = text.trim();
    if !text.is_empty() {
        obj.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
    }

    index_ids(&obj, source, index);

    if obj.is_empty() {
        Value::String(String::new())
    } else {
        Value::Object(obj)
    }
}

fn index_ids(obj: &Map<String, Value>, source: &str, index: &mut IdIndex) {
    for (key, value) in obj {
        if !key.eq_ignore_ascii_case("id") {
            continue;
        }
        let Value::String(id) = value else {
            continue;
        };
        match obj.get(TEXT_KEY).and_then(Value::as_str) {
            Some(text) => {
                index.text.insert(id.clone(), text.to_string());
            }
            None => {
                index.base64.insert(id.clone(), STANDARD.encode(source));
            }
        }
    }
}

/// An element the lenient reader has opened but not yet closed.
struct OpenElement {
    name: String,
    obj: Map<String, Value>,
    text: String,
    /// Byte offset of the element's start tag.
    start: usize,
}

/// Builds the same tree as [`build`] from markup that is not well-formed.
///
/// # Errors
///
/// Returns [`CdaError::Lenient`] when the markup cannot be tokenized at all and
/// [`CdaError::NoRootElement`] when it holds no element.
pub(crate) fn build_lenient(xml: &str) -> CdaResult<(Value, IdIndex)> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut builder = LenientBuilder {
        xml,
        stack: Vec::new(),
        root: None,
        index: IdIndex::default(),
    };

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(tag) => builder.stack.push(open_element(&tag, start)),
            Event::Empty(tag) => {
                let element = open_element(&tag, start);
                builder.close(element, reader.buffer_position() as usize);
            }
            Event::End(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                builder.close_through(&name, reader.buffer_position() as usize);
            }
            Event::Text(text) => {
                if let Some(open) = builder.stack.last_mut() {
                    match text.unescape() {
                        Ok(decoded) => open.text.push_str(&decoded),
                        Err(_) => open.text.push_str(&String::from_utf8_lossy(&text)),
                    }
                }
            }
            Event::CData(data) => {
                if let Some(open) = builder.stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    while let Some(element) = builder.stack.pop() {
        builder.close(element, xml.len());
    }

    let (name, value) = builder.root.ok_or(CdaError::NoRootElement)?;
    let mut top = Map::new();
    top.insert(name, value);
    Ok((Value::Object(top), builder.index))
}

struct LenientBuilder<'x> {
    xml: &'x str,
    stack: Vec<OpenElement>,
    /// First element closed with nothing open around it.
    root: Option<(String, Value)>,
    index: IdIndex,
}

impl LenientBuilder<'_> {
    fn close(&mut self, element: OpenElement, end: usize) {
        let source = self
            .xml
            .get(element.start..end)
            .unwrap_or_default()
            .trim_start();
        let value = finish(element.obj, &element.text, source, &mut self.index);
        match self.stack.last_mut() {
            Some(parent) => append(&mut parent.obj, element.name, value),
            None => {
                self.root.get_or_insert((element.name, value));
            }
        }
    }

    /// Closes the innermost open element called `name` and every element opened after it.
    fn close_through(&mut self, name: &str, end: usize) {
        let Some(depth) = self.stack.iter().rposition(|open| open.name == name) else {
            tracing::debug!(tag = %name, "ignoring end tag with no open element");
            return;
        };
        while self.stack.len() > depth {
            let Some(element) = self.stack.pop() else {
                break;
            };
            self.close(element, end);
        }
    }
}

fn open_element(tag: &BytesStart<'_>, start: usize) -> OpenElement {
    let mut obj = Map::new();
    let mut attributes = tag.attributes();
    attributes.with_checks(false);
    for attribute in attributes.flatten() {
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = match attribute.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
        };
        append(&mut obj, key, Value::String(value));
    }
    OpenElement {
        name: String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
        obj,
        text: String::new(),
        start,
    }
}

fn qualified_name(node: &Node) -> String {
    let tag = node.tag_name();
    match tag.namespace().and_then(|ns| node.lookup_prefix(ns)) {
        Some(prefix) => format!("{prefix}:{}", tag.name()),
        None => tag.name().to_string(),
    }
}

/// Inserts `value`, turning a repeated key into an array.
fn append(obj: &mut Map<String, Value>, key: String, value: Value) {
    match obj.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            obj.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_elements_become_empty_strings() {
        let (tree, _) = build("<a><b/><c x=\"1\"/></a>").expect("valid xml");
        assert_eq!(tree["a"]["b"], "");
        assert_eq!(tree["a"]["c"]["x"], "1");
    }

    #[test]
    fn mixed_content_keeps_direct_text_only() {
        let (tree, _) = build("<text>Hello <b>World</b> again</text>").expect("valid xml");
        assert_eq!(tree["text"]["_"], "Hello  again");
        assert_eq!(tree["text"]["b"]["_"], "World");
    }

    #[test]
    fn indexes_ids_with_and_without_text() {
        let (_, index) =
            build(r#"<t><content ID="a">Note</content><table ID="b"><tr/></table></t>"#)
                .expect("valid xml");
        assert_eq!(index.text("a"), Some("Note"));
        assert_eq!(index.text("b"), None);
        let encoded = index.base64("b").expect("b should be base64 indexed");
        let decoded = STANDARD.decode(encoded).expect("valid base64");
        assert_eq!(decoded, br#"<table ID="b"><tr/></table>"#);
    }

    #[test]
    fn lenient_reader_matches_strict_tree_on_well_formed_input() {
        let xml = r#"<t xmlns="urn:hl7-org:v3" a="1"><content ID="x">Note &amp; more</content><b/><b>2</b>tail</t>"#;
        let (strict, strict_index) = build(xml).expect("valid xml");
        let (lenient, lenient_index) = build_lenient(xml).expect("lenient parse");
        assert_eq!(lenient, strict);
        assert_eq!(lenient_index.text("x"), strict_index.text("x"));
    }

    #[test]
    fn lenient_reader_recovers_unclosed_and_stray_tags() {
        let (tree, _) = build_lenient("<doc><title>Note</b></doc>").expect("lenient parse");
        assert_eq!(tree["doc"]["title"]["_"], "Note");

        let (tree, _) = build_lenient("<a><b>one<c>two</a>").expect("lenient parse");
        assert_eq!(tree["a"]["b"]["_"], "one");
        assert_eq!(tree["a"]["b"]["c"]["_"], "two");
    }

    #[test]
    fn lenient_reader_needs_an_element() {
        assert!(matches!(build_lenient("just text"), Err(CdaError::NoRootElement)));
    }

    #[test]
    fn attribute_and_child_with_same_name_form_an_array() {
        let (tree, _) = build(r#"<a code="1"><code>2</code></a>"#).expect("valid xml");
        assert_eq!(tree["a"]["code"][0], "1");
        assert_eq!(tree["a"]["code"][1]["_"], "2");
    }
}
