// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by every compile-time phase: parsing, name
// resolution, verification and the passes. Runtime failures of the
// execution engine are not diagnostics; see `interp::RuntimeError`.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `E0301`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code is never reused for a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of every code the compiler emits.
///
/// Ranges: `E00xx` lexing and parsing, `E01xx` name resolution,
/// `E02xx` verification, `E03xx` channel legalization.
pub mod codes {
    use super::DiagCode;

    pub const E0001: DiagCode = DiagCode("E0001"); // unrecognized character
    pub const E0002: DiagCode = DiagCode("E0002"); // syntax error

    pub const E0101: DiagCode = DiagCode("E0101"); // unknown name
    pub const E0102: DiagCode = DiagCode("E0102"); // duplicate definition
    pub const E0103: DiagCode = DiagCode("E0103"); // declared type disagrees with operation
    pub const E0104: DiagCode = DiagCode("E0104"); // invalid or missing attribute
    pub const E0105: DiagCode = DiagCode("E0105"); // unknown operation

    pub const E0201: DiagCode = DiagCode("E0201"); // operand not defined before use
    pub const E0202: DiagCode = DiagCode("E0202"); // inconsistent node type
    pub const E0203: DiagCode = DiagCode("E0203"); // channel used against its direction
    pub const E0204: DiagCode = DiagCode("E0204"); // duplicate node name
    pub const E0205: DiagCode = DiagCode("E0205"); // multiple ops on a channel side (codegen)
    pub const E0206: DiagCode = DiagCode("E0206"); // malformed proc signature

    pub const E0301: DiagCode = DiagCode("E0301"); // not proven mutually exclusive
    pub const E0302: DiagCode = DiagCode("E0302"); // not totally ordered
    pub const E0303: DiagCode = DiagCode("E0303"); // adapter synthesis failed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Option<Span>,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
///
/// `span` is absent for entities the compiler synthesized itself
/// (adapter procs, internal channels) and for packages built in memory.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint or related spans.
    pub fn new(level: DiagLevel, span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Shorthand for a coded error.
    pub fn error(code: DiagCode, span: Option<Span>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Option<Span>, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// Render with a `line:col` prefix resolved against `source`.
    pub fn render(&self, source: &str) -> String {
        match self.span {
            Some(span) => {
                let (line, col) = line_col(source, span.start);
                format!("{line}:{col}: {self}")
            }
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        for related in &self.related_spans {
            write!(f, "\n  note: {}", related.label)?;
        }
        Ok(())
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
    (line, col)
}
