//! Relaxed JSON grammar and bottom-up reduction.
//!
//! ```text
//! value  := object | array | string | number | true | false | null
//! object := '{' ( ','* pair )* ','* '}'
//! pair   := string ':' value?
//! array  := '[' ( ','* value )* ','* ']'
//! ```
//!
//! Commas are optional separators, which is what makes doubled, leading, trailing and missing
//! commas all parse.

use crate::lexer::Token;
use crate::RepairError;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Object(Vec<(String, Option<Node>)>),
    Array(Vec<Node>),
    Str(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl Node {
    /// Reduces the tree, returning `None` when the node is absent.
    pub(crate) fn reduce(&self) -> Option<Value> {
        match self {
            Node::Str(s) if s.is_empty() => None,
            Node::Str(s) => Some(Value::String(s.clone())),
            Node::Number(n) => Some(Value::Number(n.clone())),
            Node::Bool(b) => Some(Value::Bool(*b)),
            Node::Null => Some(Value::Null),
            Node::Array(items) => {
                let reduced: Vec<Value> = items.iter().filter_map(Node::reduce).collect();
                (!reduced.is_empty()).then_some(Value::Array(reduced))
            }
            Node::Object(pairs) => {
                let mut map = Map::new();
                for (key, value) in pairs {
                    if let Some(value) = value.as_ref().and_then(Node::reduce) {
                        map.insert(key.clone(), value);
                    }
                }
                (!map.is_empty()).then_some(Value::Object(map))
            }
        }
    }

    /// The value an absent top-level node serializes as.
    pub(crate) fn empty_equivalent(&self) -> Value {
        match self {
            Node::Array(_) => Value::Array(Vec::new()),
            Node::Str(_) => Value::String(String::new()),
            _ => Value::Object(Map::new()),
        }
    }
}

pub(crate) fn parse(tokens: &[Token<'_>]) -> Result<Node, RepairError> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.skip_commas();
    let node = parser.value()?;
    parser.skip_commas();
    match parser.peek() {
        None => Ok(node),
        Some(token) => Err(RepairError::UnexpectedToken(token.describe())),
    }
}

struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'t Token<'a>, RepairError> {
        let token = self.tokens.get(self.pos).ok_or(RepairError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn skip_commas(&mut self) {
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Node, RepairError> {
        match self.next()? {
            Token::LeftBrace => self.object(),
            Token::LeftBracket => self.array(),
            Token::Str(raw) => Ok(Node::Str(decode_string(raw))),
            Token::Number(n) => Ok(Node::Number(n.clone())),
            Token::Bool(b) => Ok(Node::Bool(*b)),
            Token::Null => Ok(Node::Null),
            other => Err(RepairError::UnexpectedToken(other.describe())),
        }
    }

    fn object(&mut self) -> Result<Node, RepairError> {
        let mut pairs = Vec::new();
        loop {
            self.skip_commas();
            match self.next()? {
                Token::RightBrace => return Ok(Node::Object(pairs)),
                Token::Str(raw) => {
                    let key = decode_string(raw);
                    match self.next()? {
                        Token::Colon => {}
                        other => return Err(RepairError::UnexpectedToken(other.describe())),
                    }
                    let value = match self.peek() {
                        Some(Token::Comma) | Some(Token::RightBrace) => None,
                        _ => Some(self.value()?),
                    };
                    pairs.push((key, value));
                }
                other => return Err(RepairError::UnexpectedToken(other.describe())),
            }
        }
    }

    fn array(&mut self) -> Result<Node, RepairError> {
        let mut items = Vec::new();
        loop {
            self.skip_commas();
            if self.peek() == Some(&Token::RightBracket) {
                self.pos += 1;
                return Ok(Node::Array(items));
            }
            items.push(self.value()?);
        }
    }
}

/// Decodes JSON string escapes, keeping malformed escapes as literal text.
fn decode_string(raw: &str) -> String {
    if !raw.contains('\\') && !raw.chars().any(char::is_control) {
        return raw.to_string();
    }
    serde_json::from_str::<String>(&format!("\"{raw}\""))
        .unwrap_or_else(|_| lenient_decode(raw))
}

fn lenient_decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
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
    use crate::lexer::tokenize;

    fn parse_str(input: &str) -> Result<Node, RepairError> {
        parse(&tokenize(input).expect("input should tokenize"))
    }

    #[test]
    fn parses_pairs_without_separators() {
        let node = parse_str(r#"{"a":1 "b":[2 3]}"#).expect("relaxed input should parse");
        assert_eq!(
            node.reduce(),
            Some(serde_json::json!({"a": 1, "b": [2, 3]}))
        );
    }

    #[test]
    fn missing_colon_is_rejected() {
        assert!(matches!(
            parse_str(r#"{"a" "b"}"#),
            Err(RepairError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(
            parse_str(r#"{"a":1}}"#),
            Err(RepairError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn malformed_escape_is_kept_literally() {
        assert_eq!(decode_string(r"C:\temp \q"), "C:\temp \\q");
        assert_eq!(decode_string(r"tab\there"), "tab\there");
    }
}
