//! Message tree types.

use crate::coverage::{Coverage, InvalidAccess, UnusedComponent, UnusedField, UnusedSegment};
use crate::parser::{self, Separators};
use crate::Hl7Result;
use std::rc::Rc;

/// Ordered subcomponents of one component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Component {
    subcomponents: Vec<String>,
}

impl Component {
    pub(crate) fn new(subcomponents: Vec<String>) -> Self {
        Self { subcomponents }
    }

    pub fn subcomponents(&self) -> &[String] {
        &self.subcomponents
    }

    /// Returns the 1-based subcomponent `number`.
    pub fn subcomponent(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|i| self.subcomponents.get(i))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.subcomponents.iter().all(String::is_empty)
    }

    /// Subcomponents re-joined with the subcomponent separator.
    pub fn text(&self, separators: &Separators) -> String {
        join(&self.subcomponents, separators.subcomponent)
    }
}

/// Ordered components of one field repetition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Repeat {
    components: Vec<Component>,
}

impl Repeat {
    pub(crate) fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Returns the 1-based component `number`.
    pub fn component(&self, number: usize) -> Option<&Component> {
        number.checked_sub(1).and_then(|i| self.components.get(i))
    }

    pub fn is_empty(&self) -> bool {
        self.components.iter().all(Component::is_empty)
    }

    /// Components re-joined with the component separator.
    pub fn text(&self, separators: &Separators) -> String {
        let parts: Vec<String> = self.components.iter().map(|c| c.text(separators)).collect();
        join(&parts, separators.component)
    }
}

/// One field: an ordered list of repetitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Field {
    repeats: Vec<Repeat>,
}

impl Field {
    pub(crate) fn new(repeats: Vec<Repeat>) -> Self {
        Self { repeats }
    }

    /// A field holding one literal value, used for the structural `MSH-1` and `MSH-2`.
    pub(crate) fn literal(value: String) -> Self {
        Self::new(vec![Repeat::new(vec![Component::new(vec![value])])])
    }

    pub fn repeats(&self) -> &[Repeat] {
        &self.repeats
    }

    /// Returns the 1-based component `number` of the first repetition.
    pub fn component(&self, number: usize) -> Option<&Component> {
        self.repeats.first().and_then(|r| r.component(number))
    }

    pub fn is_empty(&self) -> bool {
        self.repeats.iter().all(Repeat::is_empty)
    }

    /// Text of the first repetition.
    pub fn text(&self, separators: &Separators) -> String {
        self.repeats
            .first()
            .map(|r| r.text(separators))
            .unwrap_or_default()
    }
}

/// One segment line, with its read-coverage side channel.
#[derive(Debug)]
pub struct Segment {
    segment_type: String,
    line: usize,
    fields: Vec<Field>,
    separators: Separators,
    coverage: Coverage,
}

impl Segment {
    pub(crate) fn new(
        segment_type: String,
        line: usize,
        fields: Vec<Field>,
        separators: Separators,
    ) -> Self {
        Self {
            segment_type,
            line,
            fields,
            separators,
            coverage: Coverage::default(),
        }
    }

    /// The three-character segment id, such as `PID`.
    pub fn segment_type(&self) -> &str {
        &self.segment_type
    }

    /// 0-based position of the segment within the message.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn separators(&self) -> &Separators {
        &self.separators
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    /// Returns the 1-based field `number` and records the read.
    ///
    /// A number past the populated fields is recorded as an invalid access and yields `None`.
    pub fn field(&self, number: usize) -> Option<&Field> {
        match number.checked_sub(1).and_then(|i| self.fields.get(i)) {
            Some(field) => {
                self.coverage.mark_accessed(number);
                Some(field)
            }
            None => {
                self.coverage.mark_invalid(number);
                None
            }
        }
    }

    /// Returns the 1-based field `number` without recording the read.
    pub fn peek_field(&self, number: usize) -> Option<&Field> {
        number.checked_sub(1).and_then(|i| self.fields.get(i))
    }

    /// Records every populated field as read.
    pub fn mark_all_accessed(&self) {
        for number in 1..=self.fields.len() {
            self.coverage.mark_accessed(number);
        }
    }

    /// Fields joined back into segment text (first repetition of each field only).
    pub fn text(&self) -> String {
        let sep = self.separators.field;
        let mut out = self.segment_type.clone();
        let skip = if self.segment_type == parser::HEADER_SEGMENT {
            // MSH-1 is the separator itself
            1
        } else {
            0
        };
        for field in self.fields.iter().skip(skip) {
            out.push(sep);
            out.push_str(&field.text(&self.separators));
        }
        out
    }

    fn unused(&self) -> Option<UnusedSegment> {
        let field: Vec<UnusedField> = self
            .coverage
            .untouched(self.fields.len())
            .into_iter()
            .filter_map(|number| {
                let field = &self.fields[number - 1];
                if field.is_empty() {
                    return None;
                }
                let component = field
                    .repeats()
                    .iter()
                    .flat_map(|r| r.components().iter().enumerate())
                    .filter(|(_, c)| !c.is_empty())
                    .map(|(i, c)| UnusedComponent {
                        index: i + 1,
                        value: c.text(&self.separators),
                    })
                    .collect();
                Some(UnusedField {
                    index: number,
                    component,
                })
            })
            .collect();

        (!field.is_empty()).then(|| UnusedSegment {
            segment_type: self.segment_type.clone(),
            line: self.line,
            field,
        })
    }

    fn invalid(&self) -> Option<InvalidAccess> {
        let field = self.coverage.out_of_range();
        (!field.is_empty()).then(|| InvalidAccess {
            segment_type: self.segment_type.clone(),
            line: self.line,
            field,
        })
    }
}

/// A parsed HL7 v2 message.
///
/// Segments are reference counted so template values can hold on to them while the message
/// is evaluated.
#[derive(Debug)]
pub struct Message {
    segments: Vec<Rc<Segment>>,
    separators: Separators,
}

impl Message {
    /// Parses raw HL7 v2 text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Hl7Error`] when the `MSH` header is missing or malformed.
    pub fn parse(text: &str) -> Hl7Result<Self> {
        let (separators, segments) = parser::parse(text)?;
        Ok(Self {
            segments: segments.into_iter().map(Rc::new).collect(),
            separators,
        })
    }

    pub fn separators(&self) -> &Separators {
        &self.separators
    }

    pub fn segments(&self) -> &[Rc<Segment>] {
        &self.segments
    }

    /// Segments of the given type, in message order.
    pub fn segments_of_type<'a>(
        &'a self,
        segment_type: &'a str,
    ) -> impl Iterator<Item = &'a Rc<Segment>> + 'a {
        self.segments
            .iter()
            .filter(move |s| s.segment_type() == segment_type)
    }

    /// Segments whose populated fields were not all read.
    pub fn unused_segments(&self) -> Vec<UnusedSegment> {
        self.segments.iter().filter_map(|s| s.unused()).collect()
    }

    /// Segments on which unpopulated fields were requested.
    pub fn invalid_accesses(&self) -> Vec<InvalidAccess> {
        self.segments.iter().filter_map(|s| s.invalid()).collect()
    }
}

fn join(parts: &[String], separator: char) -> String {
    parts.join(separator.encode_utf8(&mut [0; 4]))
}
