// Lexer for textual proc-network IR packages.
//
// Uses the `logos` crate for DFA-based lexing. Whitespace (including
// newlines) and `//` line comments are insignificant.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// IR token types.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+|//[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("package")]
    Package,
    #[token("chan")]
    Chan,
    #[token("proc")]
    Proc,
    #[token("top")]
    Top,
    #[token("next")]
    Next,
    #[token("token")]
    KwToken,
    #[token("bits")]
    Bits,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,

    // ── Literals ──
    /// Unsigned integer literal, decimal or `0x` hexadecimal.
    #[regex(r"[0-9]+", parse_decimal)]
    #[regex(r"0x[0-9a-fA-F]+", parse_hex)]
    Number(u64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Package => write!(f, "package"),
            Token::Chan => write!(f, "chan"),
            Token::Proc => write!(f, "proc"),
            Token::Top => write!(f, "top"),
            Token::Next => write!(f, "next"),
            Token::KwToken => write!(f, "token"),
            Token::Bits => write!(f, "bits"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Number(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_decimal(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

fn parse_hex(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    u64::from_str_radix(&lex.slice()[2..], 16).ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

/// Quote `s` so that `parse_string` yields it back.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

// ── Public API ──

/// Lex an IR source string into tokens.
///
/// Lexing is non-fatal: errors for unrecognised characters (and numeric
/// literals that overflow 64 bits) are collected and the lexer continues.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("package chan proc top next token bits");
        assert_eq!(
            tokens,
            vec![
                Token::Package,
                Token::Chan,
                Token::Proc,
                Token::Top,
                Token::Next,
                Token::KwToken,
                Token::Bits,
            ]
        );
    }

    #[test]
    fn keyword_prefix_is_ident() {
        let tokens = lex_ok("next next_pred tokens");
        assert_eq!(tokens, vec![Token::Next, Token::Ident, Token::Ident]);
    }

    #[test]
    fn symbols() {
        let tokens = lex_ok("( ) { } [ ] : , =");
        assert_eq!(
            tokens,
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::Colon,
                Token::Comma,
                Token::Equals,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(lex_ok("42 0x1F 0"), vec![
            Token::Number(42),
            Token::Number(31),
            Token::Number(0),
        ]);
    }

    #[test]
    fn number_overflow_is_error() {
        let result = lex("18446744073709551616");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            lex_ok(r#""say \"hi\" \\ ok""#),
            vec![Token::StringLit(r#"say "hi" \ ok"#.into())]
        );
        assert_eq!(lex_ok(r#""""#), vec![Token::StringLit(String::new())]);
    }

    #[test]
    fn escape_round_trips() {
        let raw = r#"a "quoted" \ path"#;
        assert_eq!(lex_ok(&escape_string(raw)), vec![Token::StringLit(raw.into())]);
    }

    #[test]
    fn comments_and_newlines_skipped() {
        let tokens = lex_ok("chan // a channel\n  x");
        assert_eq!(tokens, vec![Token::Chan, Token::Ident]);
    }

    #[test]
    fn spans_correct() {
        let result = lex("chan foo");
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 4 });
        assert_eq!(result.tokens[1].1, Span { start: 5, end: 8 });
    }

    #[test]
    fn node_statement() {
        let tokens = lex_ok("r: (token, bits[32]) = receive(tok, channel=in)");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Colon,
                Token::LParen,
                Token::KwToken,
                Token::Comma,
                Token::Bits,
                Token::LBracket,
                Token::Number(32),
                Token::RBracket,
                Token::RParen,
                Token::Equals,
                Token::Ident,
                Token::LParen,
                Token::Ident,
                Token::Comma,
                Token::Ident,
                Token::Equals,
                Token::Ident,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn error_recovery() {
        let result = lex("a ~ b");
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 2, end: 3 });
    }
}
