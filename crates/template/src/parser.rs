//! Template compilation.
//!
//! Compilation happens in two passes. The tokenizer splits source text into literal text and
//! `{{ }}` tags, applying `~` whitespace control and dropping comments. The tree builder then
//! nests blocks, resolves helper names against the data type's helper set and turns every tag
//! body into an expression tree.

use crate::ast::{Block, BlockKind, Call, Expr, Node, Partial, PathExpr};
use crate::helpers;
use crate::value::Value;
use crate::{DataType, TemplateError, TemplateResult};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("static regex"));

/// A compiled template, bound to the helper set of one data type.
#[derive(Debug)]
pub struct Template {
    name: String,
    data_type: DataType,
    nodes: Vec<Node>,
}

impl Template {
    /// Compiles `source` for `data_type`.
    ///
    /// The source is compiled as given; type-specific preprocessing is the adapter's job.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] for malformed tags or unbalanced blocks, and
    /// [`TemplateError::UnknownHelper`] when a tag calls a helper that does not exist.
    pub fn compile(name: &str, source: &str, data_type: DataType) -> TemplateResult<Self> {
        let tokens = tokenize(source).map_err(|message| syntax(name, message))?;
        let mut builder = TreeBuilder {
            tokens: tokens.into_iter(),
            template: name,
            data_type,
        };
        let (nodes, end) = builder.nodes()?;
        match end {
            End::Eof => Ok(Self {
                name: name.to_string(),
                data_type,
                nodes,
            }),
            End::Close(close) => Err(syntax(name, format!("unexpected {{{{/{close}}}}}"))),
            End::Else(_) => Err(syntax(name, "{{else}} outside of a block")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

fn syntax(template: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        template: template.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Tag(String),
    /// Body of a `{{{ }}}` tag.
    Raw(String),
}

/// Splits source into text and tag bodies. Comments are dropped here.
fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut strip_next = false;
    let mut pos = 0;

    while let Some(offset) = source[pos..].find("{{") {
        let start = pos + offset;
        push_text(&mut tokens, &source[pos..start], strip_next);

        let mut i = start + 2;
        let triple = source[i..].starts_with('{');
        if triple {
            i += 1;
        }
        let strip_before = source[i..].starts_with('~');
        if strip_before {
            i += 1;
            trim_last_text(&mut tokens);
        }

        let (body, end, strip_after) = if source[i..].starts_with("!--") {
            let close = source[i + 3..]
                .match_indices("--")
                .map(|(offset, _)| i + 3 + offset)
                .find(|&at| {
                    source[at + 2..].starts_with("}}") || source[at + 2..].starts_with("~}}")
                })
                .ok_or_else(|| format!("unterminated comment at offset {start}"))?;
            let strip = source[close..].starts_with("--~");
            let end = if strip { close + 5 } else { close + 4 };
            (None, end, strip)
        } else if source[i..].starts_with('!') {
            let close = source[i..]
                .find("}}")
                .ok_or_else(|| format!("unterminated comment at offset {start}"))?;
            let close = i + close;
            let strip = source[..close].ends_with('~');
            (None, close + 2, strip)
        } else {
            let close = find_close(source, i, triple)
                .ok_or_else(|| format!("unclosed tag at offset {start}"))?;
            let raw = &source[i..close];
            let strip = raw.ends_with('~');
            let raw = raw.strip_suffix('~').unwrap_or(raw);
            let end = close + if triple { 3 } else { 2 };
            (Some(raw.trim().to_string()), end, strip)
        };

        if let Some(body) = body {
            if body.is_empty() {
                return Err(format!("empty tag at offset {start}"));
            }
            tokens.push(if triple { Token::Raw(body) } else { Token::Tag(body) });
        }
        strip_next = strip_after;
        pos = end;
    }

    push_text(&mut tokens, &source[pos..], strip_next);
    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, strip_start: bool) {
    let text = if strip_start { text.trim_start() } else { text };
    if text.is_empty() {
        return;
    }
    if let Some(Token::Text(last)) = tokens.last_mut() {
        last.push_str(text);
    } else {
        tokens.push(Token::Text(text.to_string()));
    }
}

fn trim_last_text(tokens: &mut Vec<Token>) {
    if let Some(Token::Text(last)) = tokens.last_mut() {
        let trimmed = last.trim_end().len();
        last.truncate(trimmed);
        if last.is_empty() {
            tokens.pop();
        }
    }
}

/// Offset of the closing braces, skipping over quoted string literals.
fn find_close(source: &str, from: usize, triple: bool) -> Option<usize> {
    let close = if triple { "}}}" } else { "}}" };
    let mut quote: Option<char> = None;
    let mut chars = source[from..].char_indices();

    while let Some((offset, c)) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if source[from + offset..].starts_with(close) {
                    return Some(from + offset);
                }
            }
        }
    }
    None
}

/// How a run of nodes ended.
enum End {
    Eof,
    Close(String),
    /// `{{else}}`, or the remainder of `{{else if x}}`.
    Else(Option<String>),
}

struct TreeBuilder<'t> {
    tokens: std::vec::IntoIter<Token>,
    template: &'t str,
    data_type: DataType,
}

impl<'t> TreeBuilder<'t> {
    fn nodes(&mut self) -> TemplateResult<(Vec<Node>, End)> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            let body = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Token::Raw(body) => {
                    nodes.push(Node::Raw(self.expressions(&body).mustache()?));
                    continue;
                }
                Token::Tag(body) => body,
            };

            if let Some(rest) = body.strip_prefix('#') {
                let block = self.block(rest.trim(), None)?;
                nodes.push(Node::Block(block));
            } else if let Some(rest) = body.strip_prefix('/') {
                return Ok((nodes, End::Close(rest.trim().to_string())));
            } else if let Some(rest) = body.strip_prefix('^') {
                let rest = rest.trim();
                if rest.is_empty() {
                    return Ok((nodes, End::Else(None)));
                }
                let block = self.inverted_section(rest)?;
                nodes.push(Node::Block(block));
            } else if body == "else" {
                return Ok((nodes, End::Else(None)));
            } else if let Some(rest) = body.strip_prefix("else ") {
                return Ok((nodes, End::Else(Some(rest.trim().to_string()))));
            } else if let Some(rest) = body.strip_prefix('>') {
                nodes.push(Node::Partial(self.partial(rest.trim())?));
            } else {
                nodes.push(Node::Mustache(self.expressions(&body).mustache()?));
            }
        }
        Ok((nodes, End::Eof))
    }

    fn expressions(&self, body: &str) -> ExprParser<'t> {
        ExprParser {
            tokens: lex(body),
            pos: 0,
            template: self.template,
            data_type: self.data_type,
        }
    }

    /// Parses an opened block through its closing tag.
    ///
    /// `close` is the block name the closing tag must carry; for an `else if` chain it is the
    /// name of the block that opened the chain.
    fn block(&mut self, open: &str, close: Option<&str>) -> TemplateResult<Block> {
        let mut parser = self.expressions(open);
        let name = parser.word().ok_or_else(|| syntax(self.template, "block without a name"))?;
        let kind = BlockKind::from_name(&name).ok_or_else(|| TemplateError::UnknownHelper {
            template: self.template.to_string(),
            name: name.clone(),
        })?;
        let (mut params, hash) = parser.arguments()?;
        if params.len() != 1 {
            return Err(syntax(
                self.template,
                format!("#{name} requires exactly one argument"),
            ));
        }
        let param = params.remove(0);
        let close = close.unwrap_or(kind.name()).to_string();

        let (body, end) = self.nodes()?;
        let inverse = match end {
            End::Close(found) => {
                self.check_close(&close, &found)?;
                Vec::new()
            }
            End::Else(None) => {
                let (inverse, end) = self.nodes()?;
                match end {
                    End::Close(found) => self.check_close(&close, &found)?,
                    _ => {
                        return Err(syntax(self.template, format!("unclosed {{{{#{close}}}}}")))
                    }
                }
                inverse
            }
            End::Else(Some(chained)) => vec![Node::Block(self.block(&chained, Some(&close))?)],
            End::Eof => return Err(syntax(self.template, format!("unclosed {{{{#{close}}}}}"))),
        };

        Ok(Block {
            kind,
            param,
            hash,
            body,
            inverse,
        })
    }

    /// `{{^path}} … {{/path}}` renders its body when the path is falsy.
    fn inverted_section(&mut self, open: &str) -> TemplateResult<Block> {
        let param = self.expressions(open).mustache()?;
        let (body, end) = self.nodes()?;
        match end {
            End::Close(found) => self.check_close(open, &found)?,
            _ => return Err(syntax(self.template, format!("unclosed {{{{^{open}}}}}"))),
        }
        Ok(Block {
            kind: BlockKind::Unless,
            param,
            hash: Vec::new(),
            body,
            inverse: Vec::new(),
        })
    }

    fn check_close(&self, expected: &str, found: &str) -> TemplateResult<()> {
        if expected == found {
            Ok(())
        } else {
            Err(syntax(
                self.template,
                format!("{{{{/{found}}}}} does not match {{{{#{expected}}}}}"),
            ))
        }
    }

    fn partial(&mut self, rest: &str) -> TemplateResult<Partial> {
        let mut parser = self.expressions(rest);
        let name = match parser.next() {
            Some(ExprToken::Word(word)) | Some(ExprToken::Str(word)) => word,
            _ => return Err(syntax(self.template, "partial without a name")),
        };
        let (mut params, hash) = parser.arguments()?;
        if params.len() > 1 {
            return Err(syntax(
                self.template,
                format!("partial {name} takes at most one context argument"),
            ));
        }
        Ok(Partial {
            name,
            context: params.pop(),
            hash,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Open,
    Close,
    Str(String),
    Word(String),
    HashKey(String),
}

fn lex(body: &str) -> Vec<ExprToken> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(ExprToken::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(ExprToken::Close);
            i += 1;
        } else if c == '"' || c == '\'' {
            let mut text = String::new();
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' && i + 1 < chars.len() && chars[i + 1] == c {
                    i += 1;
                }
                text.push(chars[i]);
                i += 1;
            }
            i += 1;
            tokens.push(ExprToken::Str(text));
        } else {
            let mut word = String::new();
            while i < chars.len() {
                let c = chars[i];
                if c.is_whitespace() || c == '(' || c == ')' || c == '=' {
                    break;
                }
                if c == '[' {
                    while i < chars.len() && chars[i] != ']' {
                        word.push(chars[i]);
                        i += 1;
                    }
                    if i < chars.len() {
                        word.push(']');
                        i += 1;
                    }
                    continue;
                }
                word.push(c);
                i += 1;
            }
            if i < chars.len() && chars[i] == '=' {
                i += 1;
                tokens.push(ExprToken::HashKey(word));
            } else {
                tokens.push(ExprToken::Word(word));
            }
        }
    }
    tokens
}

struct ExprParser<'t> {
    tokens: Vec<ExprToken>,
    pos: usize,
    template: &'t str,
    data_type: DataType,
}

impl<'t> ExprParser<'t> {
    fn next(&mut self) -> Option<ExprToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn word(&mut self) -> Option<String> {
        match self.next() {
            Some(ExprToken::Word(word)) => Some(word),
            _ => None,
        }
    }

    /// The expression making up a whole `{{ … }}` tag.
    fn mustache(&mut self) -> TemplateResult<Expr> {
        let expr = match self.peek() {
            None => return Err(syntax(self.template, "empty expression")),
            Some(ExprToken::Word(word)) => {
                let word = word.clone();
                let has_arguments = self.tokens.len() > 1;
                match helpers::lookup(self.data_type, &word) {
                    Some(helper) if has_arguments || is_identifier(&word) => {
                        self.pos += 1;
                        self.call(word, helper, false)?
                    }
                    None if has_arguments => {
                        return Err(TemplateError::UnknownHelper {
                            template: self.template.to_string(),
                            name: word,
                        })
                    }
                    _ => self.param()?,
                }
            }
            Some(_) => self.param()?,
        };
        if self.pos < self.tokens.len() {
            return Err(syntax(self.template, "unexpected tokens after expression"));
        }
        Ok(expr)
    }

    fn call(
        &mut self,
        name: String,
        helper: helpers::HelperFn,
        nested: bool,
    ) -> TemplateResult<Expr> {
        let (params, hash) = self.arguments()?;
        if nested {
            match self.next() {
                Some(ExprToken::Close) => {}
                _ => return Err(syntax(self.template, format!("unclosed ({name} …)"))),
            }
        }
        Ok(Expr::Call(Call {
            name,
            helper,
            params,
            hash,
        }))
    }

    /// Positional parameters then hash pairs, up to the end of the tag or a closing paren.
    fn arguments(&mut self) -> TemplateResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut params = Vec::new();
        let mut hash = Vec::new();
        loop {
            match self.peek() {
                None | Some(ExprToken::Close) => break,
                Some(ExprToken::HashKey(key)) => {
                    let key = key.clone();
                    self.pos += 1;
                    hash.push((key, self.param()?));
                }
                Some(_) => params.push(self.param()?),
            }
        }
        Ok((params, hash))
    }

    fn param(&mut self) -> TemplateResult<Expr> {
        match self.next() {
            Some(ExprToken::Open) => {
                let name = self
                    .word()
                    .ok_or_else(|| syntax(self.template, "sub-expression without a helper"))?;
                let helper = helpers::lookup(self.data_type, &name).ok_or_else(|| {
                    TemplateError::UnknownHelper {
                        template: self.template.to_string(),
                        name: name.clone(),
                    }
                })?;
                self.call(name, helper, true)
            }
            Some(ExprToken::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(ExprToken::Word(word)) => path_or_literal(self.template, &word),
            Some(ExprToken::HashKey(key)) => {
                Err(syntax(self.template, format!("unexpected {key}=")))
            }
            Some(ExprToken::Close) => Err(syntax(self.template, "unexpected )")),
            None => Err(syntax(self.template, "missing expression")),
        }
    }
}

fn is_identifier(word: &str) -> bool {
    !word.is_empty() && !word.contains(['.', '/', '[', '@'])
}

fn path_or_literal(template: &str, word: &str) -> TemplateResult<Expr> {
    match word {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "null" => return Ok(Expr::Literal(Value::Null)),
        "undefined" => return Ok(Expr::Literal(Value::Undefined)),
        _ => {}
    }
    if NUMBER_LITERAL.is_match(word) {
        let number = word
            .parse::<f64>()
            .map_err(|e| syntax(template, format!("bad number {word}: {e}")))?;
        return Ok(Expr::Literal(Value::Number(number)));
    }
    parse_path(word)
        .map(Expr::Path)
        .ok_or_else(|| syntax(template, format!("invalid path {word}")))
}

fn parse_path(word: &str) -> Option<PathExpr> {
    let (data, mut rest) = match word.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, word),
    };

    let mut parents = 0;
    loop {
        if let Some(r) = rest.strip_prefix("../") {
            parents += 1;
            rest = r;
        } else if rest == ".." {
            parents += 1;
            rest = "";
        } else if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else {
            break;
        }
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    current.push(c);
                }
                parts.push(std::mem::take(&mut current));
            }
            '.' | '/' => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }

    if !data && parts.first().is_some_and(|p| p == "this" || p == ".") {
        parts.remove(0);
    }
    if data && parts.is_empty() {
        return None;
    }
    Some(PathExpr {
        data,
        parents,
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> TemplateResult<Template> {
        Template::compile("test.hbs", source, DataType::Cda)
    }

    #[test]
    fn tokenizer_applies_whitespace_control_and_drops_comments() {
        let tokens = tokenize("a  {{~x~}}  b {{! note }}c{{!-- {{y}} --}}d").expect("tokenizes");
        assert_eq!(
            tokens,
            vec![
                Token::Text("a".into()),
                Token::Tag("x".into()),
                Token::Text("b cd".into()),
            ]
        );
    }

    #[test]
    fn closing_braces_inside_strings_do_not_end_the_tag() {
        let tokens = tokenize(r#"{{replace x "}}" ""}}"#).expect("tokenizes");
        assert_eq!(tokens, vec![Token::Tag(r#"replace x "}}" """#.into())]);
    }

    #[test]
    fn triple_stash_tags_are_kept_apart() {
        let tokens = tokenize("{{a}} {{{b}}}").expect("tokenizes");
        assert_eq!(
            tokens,
            vec![
                Token::Tag("a".into()),
                Token::Text(" ".into()),
                Token::Raw("b".into()),
            ]
        );
    }

    #[test]
    fn paths_parse_parents_data_and_literal_segments() {
        let path = parse_path("../../msg.PID.[5].[1]").expect("valid path");
        assert_eq!(path.parents, 2);
        assert_eq!(path.parts, vec!["msg", "PID", "5", "1"]);
        assert!(!path.data);

        let path = parse_path("@root.v2").expect("valid path");
        assert!(path.data);
        assert_eq!(path.parts, vec!["root", "v2"]);

        assert!(parse_path("this").expect("valid path").parts.is_empty());
    }

    #[test]
    fn unknown_helper_with_arguments_fails_compilation() {
        let result = compile("{{frobnicate a b}}");
        assert!(matches!(
            result,
            Err(TemplateError::UnknownHelper { name, .. }) if name == "frobnicate"
        ));
        let result = compile("{{eq (frobnicate a) b}}");
        assert!(matches!(result, Err(TemplateError::UnknownHelper { .. })));
    }

    #[test]
    fn unbalanced_blocks_are_syntax_errors() {
        assert!(matches!(compile("{{#if a}}x"), Err(TemplateError::Syntax { .. })));
        assert!(matches!(
            compile("{{#if a}}x{{/each}}"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(compile("x{{/if}}"), Err(TemplateError::Syntax { .. })));
        assert!(matches!(
            compile("{{#if a b}}x{{/if}}"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn else_if_chains_share_one_closing_tag() {
        let template =
            compile("{{#if a}}1{{else if b}}2{{else}}3{{/if}}").expect("compiles");
        let Node::Block(block) = &template.nodes()[0] else {
            panic!("expected a block");
        };
        let Node::Block(chained) = &block.inverse[0] else {
            panic!("expected a chained block");
        };
        assert_eq!(chained.kind, BlockKind::If);
        assert!(matches!(&chained.inverse[0], Node::Text(t) if t == "3"));
    }

    #[test]
    fn partials_accept_a_hash() {
        let template = compile(r#"{{>DataType/Identifier.hbs id=msg.id system="x"}}"#)
            .expect("compiles");
        let Node::Partial(partial) = &template.nodes()[0] else {
            panic!("expected a partial");
        };
        assert_eq!(partial.name, "DataType/Identifier.hbs");
        assert!(partial.context.is_none());
        assert_eq!(partial.hash.len(), 2);
    }
}
