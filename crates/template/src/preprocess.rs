//! Source rewriting applied before compilation.
//!
//! HL7 v2 templates address fields as `PID-5-1`. The expression grammar has no such form, so
//! every occurrence inside a tag (outside string literals and comments) becomes the accessor
//! path `PID.[5].[1]`. Literal template text is never touched.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static FIELD_SHORTHAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Z0-9]{2})((?:-\d+)+)\b").expect("static regex"));

/// Expands `SEG-n-m` shorthand inside the tags of an HL7 v2 template.
pub(crate) fn expand_hl7_shorthand(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tag = &rest[start..];

        if tag.starts_with("{{!") || tag.starts_with("{{~!") {
            let close = comment_end(tag).unwrap_or(tag.len());
            out.push_str(&tag[..close]);
            rest = &tag[close..];
            continue;
        }

        let close = tag.find("}}").map_or(tag.len(), |i| i + 2);
        out.push_str(&rewrite_tag(&tag[..close]));
        rest = &tag[close..];
    }

    out.push_str(rest);
    out
}

fn comment_end(tag: &str) -> Option<usize> {
    let long = tag.starts_with("{{!--") || tag.starts_with("{{~!--");
    if long {
        tag.find("--}}")
            .map(|i| i + 4)
            .or_else(|| tag.find("--~}}").map(|i| i + 5))
    } else {
        tag.find("}}").map(|i| i + 2)
    }
}

/// Rewrites the unquoted stretches of one tag.
fn rewrite_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len() + 8);
    let mut unquoted = String::new();
    let mut quote: Option<char> = None;

    for c in tag.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                out.push_str(&expand(&unquoted));
                unquoted.clear();
                out.push(c);
                quote = Some(c);
            }
            None => unquoted.push(c),
        }
    }
    out.push_str(&expand(&unquoted));
    out
}

fn expand(text: &str) -> String {
    FIELD_SHORTHAND
        .replace_all(text, |caps: &Captures<'_>| {
            let mut path = caps[1].to_string();
            for number in caps[2].split('-').filter(|n| !n.is_empty()) {
                path.push_str(".[");
                path.push_str(number);
                path.push(']');
            }
            path
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_field_and_component_shorthand() {
        assert_eq!(
            expand_hl7_shorthand("{{PID-5-1}} {{#if PV1-44}}x{{/if}}"),
            "{{PID.[5].[1]}} {{#if PV1.[44]}}x{{/if}}"
        );
    }

    #[test]
    fn leaves_text_strings_and_comments_alone() {
        let source = r#"PID-5 {{eq PID-3 "OBX-5"}} {{! MSH-9 }}"#;
        assert_eq!(
            expand_hl7_shorthand(source),
            r#"PID-5 {{eq PID.[3] "OBX-5"}} {{! MSH-9 }}"#
        );
    }

    #[test]
    fn keeps_paths_that_already_use_accessors() {
        let source = "{{msg.PID.[5].[1]}}";
        assert_eq!(expand_hl7_shorthand(source), source);
    }
}
