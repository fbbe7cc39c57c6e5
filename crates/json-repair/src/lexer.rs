//! Relaxed JSON tokenizer.

use crate::RepairError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Colon,
    Comma,
    /// Raw string contents between the quotes, escapes not yet decoded.
    Str(&'a str),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl Token<'_> {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::LeftBrace => "'{'".into(),
            Token::RightBrace => "'}'".into(),
            Token::LeftBracket => "'['".into(),
            Token::RightBracket => "']'".into(),
            Token::Colon => "':'".into(),
            Token::Comma => "','".into(),
            Token::Str(s) => format!("string \"{s}\""),
            Token::Number(n) => format!("number {n}"),
            Token::Bool(b) => format!("{b}"),
            Token::Null => "null".into(),
        }
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token<'_>>, RepairError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let b = bytes[pos];
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => pos += 1,
            b'{' => push(&mut tokens, &mut pos, Token::LeftBrace),
            b'}' => push(&mut tokens, &mut pos, Token::RightBrace),
            b'[' => push(&mut tokens, &mut pos, Token::LeftBracket),
            b']' => push(&mut tokens, &mut pos, Token::RightBracket),
            b':' => push(&mut tokens, &mut pos, Token::Colon),
            b',' => push(&mut tokens, &mut pos, Token::Comma),
            b'"' => {
                let end = string_end(bytes, pos)?;
                tokens.push(Token::Str(&input[pos + 1..end]));
                pos = end + 1;
            }
            b'-' | b'0'..=b'9' => {
                let start = pos;
                while pos < bytes.len()
                    && matches!(bytes[pos], b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9')
                {
                    pos += 1;
                }
                let lexeme = &input[start..pos];
                let number = lexeme
                    .parse::<serde_json::Number>()
                    .map_err(|_| RepairError::InvalidNumber(lexeme.to_string()))?;
                tokens.push(Token::Number(number));
            }
            _ => {
                let rest = &input[pos..];
                let (token, len) = if rest.starts_with("true") {
                    (Token::Bool(true), 4)
                } else if rest.starts_with("false") {
                    (Token::Bool(false), 5)
                } else if rest.starts_with("null") {
                    (Token::Null, 4)
                } else {
                    let c = rest.chars().next().unwrap_or_default();
                    return Err(RepairError::UnexpectedCharacter(c, pos));
                };
                tokens.push(token);
                pos += len;
            }
        }
    }

    Ok(tokens)
}

fn push<'a>(tokens: &mut Vec<Token<'a>>, pos: &mut usize, token: Token<'a>) {
    tokens.push(token);
    *pos += 1;
}

/// Byte offset of the quote closing the string opened at `start`.
fn string_end(bytes: &[u8], start: usize) -> Result<usize, RepairError> {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return Ok(pos),
            _ => pos += 1,
        }
    }
    Err(RepairError::UnterminatedString(start))
}
