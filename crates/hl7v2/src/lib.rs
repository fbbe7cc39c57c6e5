//! HL7 v2 message parsing.
//!
//! This crate turns raw pipe-delimited HL7 v2 text into an ordered tree of segments, fields,
//! repeats, components and subcomponents. Every subcomponent is escape-decoded and then made
//! safe for embedding in JSON text, so template output built from it stays well formed.
//!
//! ## Coverage
//!
//! Each segment carries a [`Coverage`] side channel. Reading a field through
//! [`Segment::field`] records the read; reading past the populated fields records an invalid
//! access. After evaluation, [`Message::unused_segments`] and [`Message::invalid_accesses`]
//! report what a template did not touch and what it asked for that was not there.
//!
//! Field, component and subcomponent numbers are 1-based, following HL7 convention, in both
//! the accessors and the reports. `MSH-1` is the field separator and `MSH-2` the encoding
//! characters.
//!
//! ## Example
//!
//! ```
//! use hl7v2::Message;
//!
//! let message = Message::parse("MSH|^~\\&|AccMgr|1|||20050110045504||ADT^A01|599102|P|2.3|||")?;
//! let msh = &message.segments()[0];
//! assert_eq!(msh.field(3).map(|f| f.text(msh.separators())), Some("AccMgr".to_string()));
//! # Ok::<(), hl7v2::Hl7Error>(())
//! ```

mod coverage;
mod escape;
mod message;
mod parser;

pub use coverage::{Coverage, InvalidAccess, UnusedComponent, UnusedField, UnusedSegment};
pub use escape::{decode_escapes, escape_special_chars, unescape_special_chars};
pub use message::{Component, Field, Message, Repeat, Segment};
pub use parser::Separators;

/// Errors raised while parsing an HL7 v2 message.
///
/// Only header malformation is fatal; everything after a valid `MSH` header parses.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Hl7Error {
    /// The message does not start with an `MSH` segment.
    #[error("Invalid HL7 v2 message, first segment id = {0}")]
    InvalidFirstSegment(String),

    /// The `MSH` header is too short to declare all separators.
    #[error("Invalid HL7 v2 message, MSH header is {0} characters long (at least 8 required)")]
    HeaderTooShort(usize),

    /// Two of the declared separator characters are the same.
    #[error("Invalid HL7 v2 message, separator {0:?} is declared more than once")]
    DuplicateSeparator(char),

    /// The declared escape character is not a backslash.
    #[error("Unsupported HL7 v2 escape character {0:?}, only '\\' is supported")]
    UnsupportedEscapeCharacter(char),
}

/// Type alias for Results that can fail with an [`Hl7Error`].
pub type Hl7Result<T> = Result<T, Hl7Error>;
