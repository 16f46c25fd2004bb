// AST node types for textual proc-network IR packages.
//
// The textual form is line-oriented but whitespace-insensitive:
//
//   package NAME
//   chan NAME(TYPE, key=value, ...)
//   [top] proc NAME(tok: token, s: TYPE, ..., init={v, ...}) {
//     NAME: TYPE = OP(operand, ..., key=value, ...)
//     next(tok_node, state_node, ...)
//   }
//
// Every node carries a `SimpleSpan` for error reporting in name resolution.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

#[derive(Debug, Clone, PartialEq)]
pub struct PackageAst {
    pub name: Ident,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Chan(ChanDecl),
    Proc(ProcDecl),
}

// ── chan NAME(TYPE, attr, ...) ──

#[derive(Debug, Clone, PartialEq)]
pub struct ChanDecl {
    pub name: Ident,
    pub ty: TypeExpr,
    pub attrs: Vec<Attr>,
    pub span: Span,
}

// ── Types ──

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Bits(u64, Span),
    Token(Span),
    Tuple(Vec<TypeExpr>, Span),
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Bits(_, s) | TypeExpr::Token(s) | TypeExpr::Tuple(_, s) => *s,
        }
    }
}

// ── Values and attributes ──

/// An untyped constant; widths come from the declared type it is checked against.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Number(u64, Span),
    Tuple(Vec<ValueExpr>, Span),
}

impl ValueExpr {
    pub fn span(&self) -> Span {
        match self {
            ValueExpr::Number(_, s) | ValueExpr::Tuple(_, s) => *s,
        }
    }
}

/// `key=value` pair in a channel declaration or operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: Ident,
    pub value: AttrValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Value(ValueExpr),
    Ident(Ident),
    Str(String, Span),
    /// `[a, b, c]`: a list of node references.
    List(Vec<Ident>, Span),
}

impl AttrValue {
    pub fn span(&self) -> Span {
        match self {
            AttrValue::Value(v) => v.span(),
            AttrValue::Ident(id) => id.span,
            AttrValue::Str(_, s) | AttrValue::List(_, s) => *s,
        }
    }
}

// ── proc ──

#[derive(Debug, Clone, PartialEq)]
pub struct ProcDecl {
    pub is_top: bool,
    pub name: Ident,
    pub header: Vec<HeaderItem>,
    pub body: Vec<NodeStmt>,
    pub next: NextStmt,
    pub span: Span,
}

/// One entry of a proc's parenthesized header.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderItem {
    /// `name: TYPE`
    Param { name: Ident, ty: TypeExpr },
    /// `init={v, ...}`
    Init {
        key: Ident,
        values: Vec<ValueExpr>,
        span: Span,
    },
}

/// `NAME: TYPE = OP(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStmt {
    pub name: Ident,
    pub ty: TypeExpr,
    pub op: Ident,
    pub args: Vec<Arg>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Operand(Ident),
    Keyword(Attr),
}

/// `next(token, state...)`
#[derive(Debug, Clone, PartialEq)]
pub struct NextStmt {
    pub operands: Vec<Ident>,
    pub span: Span,
}

// ── Identifiers ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
