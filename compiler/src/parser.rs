// Parser for textual proc-network IR packages.
//
// Parses a token stream (from the lexer) into an AST using chumsky
// combinators, then hands the AST to name resolution to build a `Package`.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any syntax errors (non-fatal).
// Failure modes: syntax errors produce E0001/E0002 diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::{codes, Diagnostic};
use crate::ir::Package;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub package: Option<PackageAst>,
    pub errors: Vec<Diagnostic>,
}

/// Parse an IR source string into an AST. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = package_parser(source);
    let (package, parse_errors) = parser.parse(stream).into_output_errors();

    let mut errors: Vec<Diagnostic> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Diagnostic::error(codes::E0001, Some(span), e.message)
        })
        .collect();
    errors.extend(
        parse_errors
            .into_iter()
            .map(|e| Diagnostic::error(codes::E0002, Some(*e.span()), e.to_string())),
    );

    ParseResult { package, errors }
}

/// Parse and resolve a package in one step.
pub fn parse_package(source: &str) -> Result<Package, Vec<Diagnostic>> {
    let result = parse(source);
    if !result.errors.is_empty() {
        return Err(result.errors);
    }
    match result.package {
        Some(ast) => crate::resolve::resolve_package(&ast),
        None => Err(vec![Diagnostic::error(
            codes::E0002,
            None,
            "expected a package declaration",
        )]),
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `package_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn package_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, PackageAst, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Types: bits[N] | token | (T, ...) ──

    let ty = recursive(|ty| {
        let bits = just(Token::Bits)
            .ignore_then(
                select! { Token::Number(n) => n }
                    .delimited_by(just(Token::LBracket), just(Token::RBracket)),
            )
            .map_with(|n, e| TypeExpr::Bits(n, e.span()));
        let token = just(Token::KwToken).map_with(|_, e| TypeExpr::Token(e.span()));
        let tuple = ty
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|elems, e| TypeExpr::Tuple(elems, e.span()));
        choice((bits, token, tuple))
    });

    // ── Values: N | (v, ...) ──

    let value = recursive(|value| {
        let number = select! { Token::Number(n) = e => ValueExpr::Number(n, e.span()) };
        let tuple = value
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|elems, e| ValueExpr::Tuple(elems, e.span()));
        number.or(tuple)
    });

    // ── Attributes: key=value ──

    let attr_value = {
        let list = ident
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map_with(|ids, e| AttrValue::List(ids, e.span()));
        let string = select! { Token::StringLit(s) = e => AttrValue::Str(s, e.span()) };
        choice((
            value.clone().map(AttrValue::Value),
            list,
            string,
            ident.clone().map(AttrValue::Ident),
        ))
    };

    let attr = ident
        .clone()
        .then_ignore(just(Token::Equals))
        .then(attr_value.clone())
        .map_with(|(key, value), e| Attr {
            key,
            value,
            span: e.span(),
        });

    // ── chan NAME(TYPE, attr, ...) ──

    let chan = just(Token::Chan)
        .ignore_then(ident.clone())
        .then(
            ty.clone()
                .then(
                    just(Token::Comma)
                        .ignore_then(attr)
                        .repeated()
                        .collect::<Vec<_>>(),
                )
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|(name, (ty, attrs)), e| {
            Item::Chan(ChanDecl {
                name,
                ty,
                attrs,
                span: e.span(),
            })
        });

    // ── Proc header: (name: T, ..., init={...}) ──

    let header_item = {
        let param = ident
            .clone()
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .map(|(name, ty)| HeaderItem::Param { name, ty });
        let init = ident
            .clone()
            .then_ignore(just(Token::Equals))
            .then(
                value
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|(key, values), e| HeaderItem::Init {
                key,
                values,
                span: e.span(),
            });
        param.or(init)
    };

    // ── Node statement: NAME: TYPE = OP(args) ──

    let arg = ident
        .clone()
        .then(just(Token::Equals).ignore_then(attr_value).or_not())
        .map_with(|(name, value), e| match value {
            Some(value) => Arg::Keyword(Attr {
                key: name,
                value,
                span: e.span(),
            }),
            None => Arg::Operand(name),
        });

    let node_stmt = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(ty.clone())
        .then_ignore(just(Token::Equals))
        .then(ident.clone())
        .then(
            arg.separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|(((name, ty), op), args), e| NodeStmt {
            name,
            ty,
            op,
            args,
            span: e.span(),
        });

    // ── next(token, state...) ──

    let next_stmt = just(Token::Next)
        .ignore_then(
            ident
                .clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|operands, e| NextStmt {
            operands,
            span: e.span(),
        });

    // ── [top] proc NAME(header) { body next } ──

    let proc_decl = just(Token::Top)
        .or_not()
        .then_ignore(just(Token::Proc))
        .then(ident.clone())
        .then(
            header_item
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(
            node_stmt
                .repeated()
                .collect::<Vec<_>>()
                .then(next_stmt)
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(((top, name), header), (body, next)), e| {
            Item::Proc(ProcDecl {
                is_top: top.is_some(),
                name,
                header,
                body,
                next,
                span: e.span(),
            })
        });

    // ── Package ──

    just(Token::Package)
        .ignore_then(ident)
        .then(choice((chan, proc_decl)).repeated().collect::<Vec<_>>())
        .map_with(|(name, items), e| PackageAst {
            name,
            items,
            span: e.span(),
        })
}

// ── Tests ──
