//! Compiled template tree.

use crate::helpers::HelperFn;
use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    /// `{{expr}}`, HTML-escaped on output.
    Mustache(Expr),
    /// `{{{expr}}}`.
    Raw(Expr),
    Block(Block),
    Partial(Partial),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    If,
    Unless,
    Each,
    With,
}

impl BlockKind {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "if" => Some(BlockKind::If),
            "unless" => Some(BlockKind::Unless),
            "each" => Some(BlockKind::Each),
            "with" => Some(BlockKind::With),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
            BlockKind::Each => "each",
            BlockKind::With => "with",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub kind: BlockKind,
    pub param: Expr,
    pub hash: Vec<(String, Expr)>,
    pub body: Vec<Node>,
    pub inverse: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) struct Partial {
    pub name: String,
    pub context: Option<Expr>,
    pub hash: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Path(PathExpr),
    Call(Call),
}

/// A path such as `../msg.PID.[5]` or `@root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathExpr {
    /// `@`-prefixed paths look up data variables.
    pub data: bool,
    /// Number of leading `../` segments.
    pub parents: usize,
    pub parts: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub name: String,
    pub helper: HelperFn,
    pub params: Vec<Expr>,
    pub hash: Vec<(String, Expr)>,
}
