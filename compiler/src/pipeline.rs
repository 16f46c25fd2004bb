// pipeline.rs — Ordered pass execution and input provenance
//
// Runs an explicit list of passes over a working copy of the package and
// commits the copy only when every pass (and, when procs will be inlined,
// the final codegen-readiness check) succeeded.
//
// Preconditions: the package verifies.
// Postconditions: on `Ok`, the package holds the result of every pass; on
//   `Err`, the package is exactly as it was passed in.
// Failure modes: the first failing pass, or codegen readiness when
//   `inline_procs` is set.
// Side effects: calls `on_pass_complete` after each pass; with `verbose`,
//   prints one timing line per pass to stderr.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::diag::Diagnostic;
use crate::ir::Package;
use crate::pass::{run_pass, PassError, PassId, PassOptions, PassResults};
use crate::verify::{verify_package, VerifyCert};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Identity of the compiler input, for reports and cache keys.
///
/// `source_hash`: SHA-256 of the raw IR text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }
}

impl Serialize for Provenance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Provenance", 2)?;
        s.serialize_field("source_hash", &self.source_hash_hex())?;
        s.serialize_field("compiler_version", self.compiler_version)?;
        s.end()
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error("package is not ready for code generation ({} problem(s))", .0.len())]
    CodegenReadiness(Vec<Diagnostic>),
}

impl PipelineError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            PipelineError::Pass(e) => &e.diagnostics,
            PipelineError::CodegenReadiness(d) => d,
        }
    }
}

/// What a successful pipeline run produced.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Whether any pass changed the package.
    pub changed: bool,
    pub results: PassResults,
    /// Present when `inline_procs` requested the codegen-readiness check.
    pub codegen_cert: Option<VerifyCert>,
}

/// Run `passes` in order on `package`.
pub fn run_pipeline(
    package: &mut Package,
    passes: &[PassId],
    options: &PassOptions,
) -> Result<PipelineOutcome, PipelineError> {
    run_pipeline_with(package, passes, options, false, |_, _| {})
}

/// Like `run_pipeline`, reporting each pass's `changed` flag to
/// `on_pass_complete` and optionally timing passes on stderr.
pub fn run_pipeline_with(
    package: &mut Package,
    passes: &[PassId],
    options: &PassOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, bool),
) -> Result<PipelineOutcome, PipelineError> {
    let mut work = package.clone();
    let mut outcome = PipelineOutcome::default();

    for &pass in passes {
        let t = Instant::now();
        let changed = run_pass(pass, &mut work, options, &mut outcome.results)?;
        let elapsed = t.elapsed();
        on_pass_complete(pass, changed);
        if verbose {
            eprintln!(
                "plc: {} complete, {:.1}ms",
                pass.name(),
                elapsed.as_secs_f64() * 1000.0
            );
        }
        outcome.changed |= changed;
    }

    if options.inline_procs {
        let cert = verify_package(&work, true).map_err(PipelineError::CodegenReadiness)?;
        outcome.codegen_cert = Some(cert);
    }

    *package = work;
    Ok(outcome)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::codes;
    use crate::parser::parse_package;
    use crate::pass::standard_pipeline;

    const SHARED: &str = r#"package t
chan out(bits[4], id=0, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")
top proc m(tok: token, init={}) {
  x: bits[4] = literal(value=2)
  pair: (bits[4], bits[4]) = tuple(x, x)
  y: bits[4] = tuple_index(pair, index=1)
  a: token = send(tok, y, channel=out)
  b: token = send(a, x, channel=out)
  next(b)
}
"#;

    #[test]
    fn provenance_hash_is_stable() {
        let a = compute_provenance("package p");
        let b = compute_provenance("package p");
        let c = compute_provenance("package q");
        assert_eq!(a, b);
        assert_ne!(a.source_hash, c.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["source_hash"], a.source_hash_hex());
    }

    #[test]
    fn standard_pipeline_legalizes_and_cleans_up() {
        let mut pkg = parse_package(&SHARED.replace("$S", "total_order")).unwrap();
        let mut seen = Vec::new();
        let outcome = run_pipeline_with(
            &mut pkg,
            &standard_pipeline(),
            &PassOptions { inline_procs: true },
            false,
            |pass, changed| seen.push((pass, changed)),
        )
        .unwrap();
        assert!(outcome.changed);
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[2], (PassId::ChannelLegalization, true));
        assert!(outcome.codegen_cert.is_some());
        let m = &pkg.procs[0];
        assert_eq!(m.node_by_name("pair"), None);
        assert_eq!(m.node_by_name("y"), None);
        assert_eq!(pkg.procs[1].name, "out__adapter");
    }

    #[test]
    fn failing_pipeline_leaves_package_untouched() {
        let mut pkg = parse_package(&SHARED.replace("$S", "proven_mutually_exclusive")).unwrap();
        let before = pkg.to_string();
        let err = run_pipeline(&mut pkg, &standard_pipeline(), &PassOptions::default())
            .unwrap_err();
        assert_eq!(err.diagnostics()[0].code, Some(codes::E0301));
        assert_eq!(pkg.to_string(), before);
    }

    #[test]
    fn codegen_readiness_without_legalization_fails() {
        let mut pkg = parse_package(&SHARED.replace("$S", "total_order")).unwrap();
        let err = run_pipeline(
            &mut pkg,
            &[PassId::DeadCodeElimination],
            &PassOptions { inline_procs: true },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::CodegenReadiness(_)));
        assert_eq!(err.diagnostics()[0].code, Some(codes::E0205));
    }
}
