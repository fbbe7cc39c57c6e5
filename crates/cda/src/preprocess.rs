//! Textual repairs applied before XML parsing.

use once_cell::sync::Lazy;
use regex::Regex;

/// Character references that a `&` may legitimately start.
static ENTITY_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:#\d+|#x[\da-fA-F]+|amp|lt|gt|quot|apos);").expect("static regex")
});

static LINE_BREAK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<br\s*/?>").expect("static regex"));

/// `<time value="00010101000000+0000"/>` carries no information and is dropped.
static PLACEHOLDER_TIME_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<time value="00010101000000\+0000"\s*/>"#).expect("static regex")
});

/// `value="00010101..."` placeholders are rewritten to a "no information" null flavor.
static PLACEHOLDER_TIME_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"value="000101010*"\s*/>"#).expect("static regex"));

/// Runs every pre-parse repair in order.
pub(crate) fn prepare(xml: &str) -> String {
    let text = LINE_BREAK_TAG.replace_all(xml, "\n");
    let text = PLACEHOLDER_TIME_ELEMENT.replace_all(&text, "");
    let text = PLACEHOLDER_TIME_VALUE.replace_all(&text, r#"nullFlavor="NI" />"#);
    escape_bare_ampersands(&text)
}

/// Escapes every `&` that does not start a numeric, hex or predefined named character
/// reference.
pub fn escape_bare_ampersands(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if ENTITY_REFERENCE.is_match(after) {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
        rest = after;
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_only_bare_ampersands() {
        assert_eq!(
            escape_bare_ampersands("Tom & Jerry &amp; &#38; &#x26; &lt;b&gt; &quot;&apos; &nbsp;"),
            "Tom &amp; Jerry &amp; &#38; &#x26; &lt;b&gt; &quot;&apos; &amp;nbsp;"
        );
    }

    #[test]
    fn replaces_line_break_tags() {
        assert_eq!(prepare("a<br/>b<br />c<br>d"), "a\nb\nc\nd");
    }

    #[test]
    fn neutralises_placeholder_timestamps() {
        assert_eq!(
            prepare(r#"<effectiveTime><time value="00010101000000+0000"/></effectiveTime>"#),
            "<effectiveTime></effectiveTime>"
        );
        assert_eq!(
            prepare(r#"<low value="00010101000000"/>"#),
            r#"<low nullFlavor="NI" />"#
        );
    }
}
