//! Header validation and segment splitting.

use crate::escape::{decode_escapes, escape_special_chars};
use crate::message::{Component, Field, Repeat, Segment};
use crate::{Hl7Error, Hl7Result};

pub(crate) const HEADER_SEGMENT: &str = "MSH";

/// `MSH` plus the five separator characters.
const MIN_HEADER_LENGTH: usize = 8;

/// The separator characters declared by a message's `MSH` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Separators {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Separators {
    /// Reads the separators at their fixed offsets after `MSH`.
    fn from_header(header: &str) -> Hl7Result<Self> {
        let segment_id: String = header.chars().take(3).collect();
        if segment_id != HEADER_SEGMENT {
            return Err(Hl7Error::InvalidFirstSegment(segment_id));
        }

        let chars: Vec<char> = header.chars().collect();
        if chars.len() < MIN_HEADER_LENGTH {
            return Err(Hl7Error::HeaderTooShort(chars.len()));
        }

        let separators = Self {
            field: chars[3],
            component: chars[4],
            repetition: chars[5],
            escape: chars[6],
            subcomponent: chars[7],
        };

        let declared = separators.as_array();
        for (i, c) in declared.iter().enumerate() {
            if declared[i + 1..].contains(c) {
                return Err(Hl7Error::DuplicateSeparator(*c));
            }
        }

        if separators.escape != '\\' {
            return Err(Hl7Error::UnsupportedEscapeCharacter(separators.escape));
        }

        Ok(separators)
    }

    fn as_array(&self) -> [char; 5] {
        [
            self.field,
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ]
    }
}

/// Parses raw message text into its separators and segments.
pub(crate) fn parse(text: &str) -> Hl7Result<(Separators, Vec<Segment>)> {
    let mut lines = text
        .split(['\r', '\n'])
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| Hl7Error::InvalidFirstSegment(String::new()))?;
    let separators = Separators::from_header(header)?;

    let mut segments = vec![parse_header_segment(header, &separators)];
    for (i, line) in lines.enumerate() {
        segments.push(parse_segment(line, i + 1, &separators));
    }

    tracing::debug!(segments = segments.len(), "parsed HL7 v2 message");
    Ok((separators, segments))
}

fn parse_header_segment(line: &str, separators: &Separators) -> Segment {
    let mut tokens = line.split(separators.field);
    let segment_type = tokens.next().unwrap_or(HEADER_SEGMENT).to_string();
    let encoding = tokens.next().unwrap_or_default();

    let mut fields = vec![
        Field::literal(separators.field.to_string()),
        Field::literal(escape_special_chars(encoding)),
    ];
    fields.extend(tokens.map(|raw| parse_field(raw, separators)));

    let segment = Segment::new(segment_type, 0, fields, *separators);
    segment.coverage().mark_accessed(1);
    segment.coverage().mark_accessed(2);
    segment
}

fn parse_segment(line: &str, line_number: usize, separators: &Separators) -> Segment {
    let mut tokens = line.split(separators.field);
    let segment_type = tokens.next().unwrap_or_default().to_string();
    let fields = tokens.map(|raw| parse_field(raw, separators)).collect();
    Segment::new(segment_type, line_number, fields, *separators)
}

fn parse_field(raw: &str, separators: &Separators) -> Field {
    let repeats = raw
        .split(separators.repetition)
        .map(|repeat| {
            let components = repeat
                .split(separators.component)
                .map(|component| {
                    let subcomponents = component
                        .split(separators.subcomponent)
                        .map(|s| escape_special_chars(&decode_escapes(s, separators)))
                        .collect();
                    Component::new(subcomponents)
                })
                .collect();
            Repeat::new(components)
        })
        .collect();
    Field::new(repeats)
}
