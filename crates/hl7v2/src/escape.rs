//! HL7 escape sequence decoding and JSON-embedding escapes.

use crate::parser::Separators;

/// Decodes HL7 escape sequences inside a single subcomponent.
///
/// Supported sequences (shown with `\` as the escape character):
///
/// * `\F\` `\S\` `\T\` `\R\` `\E\` - the field, component, subcomponent, repetition and escape
///   separators declared in `MSH`
/// * `\Xhh..\` - hexadecimal bytes, decoded as UTF-8 (lossy)
/// * `\.br\` - line break
/// * `\H\` `\N\` - highlighting on/off, dropped
///
/// Unknown or unterminated sequences are kept verbatim.
pub fn decode_escapes(raw: &str, separators: &Separators) -> String {
    let escape = separators.escape;
    if !raw.contains(escape) {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find(escape) {
        out.push_str(&rest[..start]);
        let after = &rest[start + escape.len_utf8()..];

        let Some(end) = after.find(escape) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let sequence = &after[..end];
        match decode_sequence(sequence, separators) {
            Some(decoded) => out.push_str(&decoded),
            None => {
                out.push(escape);
                out.push_str(sequence);
                out.push(escape);
            }
        }
        rest = &after[end + escape.len_utf8()..];
    }

    out.push_str(rest);
    out
}

fn decode_sequence(sequence: &str, separators: &Separators) -> Option<String> {
    match sequence {
        "F" => Some(separators.field.to_string()),
        "S" => Some(separators.component.to_string()),
        "T" => Some(separators.subcomponent.to_string()),
        "R" => Some(separators.repetition.to_string()),
        "E" => Some(separators.escape.to_string()),
        ".br" => Some("\n".to_string()),
        "H" | "N" => Some(String::new()),
        _ => sequence.strip_prefix('X').and_then(decode_hex),
    }
}

fn decode_hex(hex: &str) -> Option<String> {
    if hex.is_empty() {
        return None;
    }
    let bytes = hex::decode(hex).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Escapes backslashes, double quotes and control characters so the value can be embedded in
/// a JSON string literal.
pub fn escape_special_chars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_special_chars`].
pub fn unescape_special_chars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separators() -> Separators {
        Separators::default()
    }

    #[test]
    fn decodes_separator_escapes() {
        assert_eq!(decode_escapes(r"a\F\b\S\c\T\d\R\e\E\f", &separators()), r"a|b^c&d~e\f");
    }

    #[test]
    fn decodes_hex_and_line_break() {
        assert_eq!(decode_escapes(r"\X41\B\.br\C", &separators()), "AB\nC");
    }

    #[test]
    fn keeps_unknown_and_unterminated_sequences() {
        assert_eq!(decode_escapes(r"a\Q\b", &separators()), r"a\Q\b");
        assert_eq!(decode_escapes(r"a\Fb", &separators()), r"a\Fb");
        assert_eq!(decode_escapes(r"\XZZ\", &separators()), r"\XZZ\");
        assert_eq!(decode_escapes(r"\X414\", &separators()), r"\X414\");
    }

    #[test]
    fn keeps_hex_sequences_with_non_ascii_verbatim() {
        assert_eq!(decode_escapes(r"\XAéB\", &separators()), r"\XAéB\");
        assert_eq!(decode_escapes(r"x\Xé1\y", &separators()), r"x\Xé1\y");
    }

    #[test]
    fn escape_round_trips_quotes_and_backslashes() {
        let raw = "say \"hi\" \\ now\n";
        let escaped = escape_special_chars(raw);
        assert_eq!(escaped, "say \\\"hi\\\" \\\\ now\\n");
        assert_eq!(unescape_special_chars(&escaped), raw);
    }
}
