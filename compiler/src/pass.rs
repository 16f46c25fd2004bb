// pass.rs — Pass descriptors, options and single-pass invocation
//
// Declares the IR-to-IR passes, their metadata and the standard ordering,
// and runs one pass against a package followed by structural verification.
// Ordering is always an explicit list owned by the caller.
//
// Preconditions: the package verifies before `run_pass`.
// Postconditions: on `Ok`, the package verifies; on `Err`, it is unchanged.
// Failure modes: pass diagnostics or post-pass verification failures,
//   reported as `PassError`.
// Side effects: appends to `PassResults`.

use std::str::FromStr;

use thiserror::Error;

use crate::diag::Diagnostic;
use crate::ir::Package;
use crate::legalize::LegalizationReport;
use crate::verify::{verify_package, VerifyCert};

// ── Pass identifiers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    TupleSimplification,
    DeadCodeElimination,
    ChannelLegalization,
}

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Name accepted by `--passes` and printed in verbose output.
    pub name: &'static str,
    pub summary: &'static str,
    /// Postconditions the pass guarantees on success.
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::TupleSimplification => PassDescriptor {
            name: "tuple_simp",
            summary: "forward tuple_index of tuple, collapse rebuilt tuples",
            invariants: "side effects unchanged",
        },
        PassId::DeadCodeElimination => PassDescriptor {
            name: "dce",
            summary: "remove pure nodes with no users",
            invariants: "side effects and next operands unchanged",
        },
        PassId::ChannelLegalization => PassDescriptor {
            name: "channel_legalization",
            summary: "arbitrate channel sides with multiple operations",
            invariants: "each channel side has one operation or is proven exclusive",
        },
    }
}

impl PassId {
    pub fn name(self) -> &'static str {
        descriptor(self).name
    }
}

pub const ALL_PASSES: [PassId; 3] = [
    PassId::TupleSimplification,
    PassId::DeadCodeElimination,
    PassId::ChannelLegalization,
];

impl FromStr for PassId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PASSES
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = ALL_PASSES.iter().map(|p| p.name()).collect();
                format!("unknown pass '{}' (expected one of: {})", s, valid.join(", "))
            })
    }
}

/// One block per pass: name, summary and guaranteed invariants.
pub fn describe_passes() -> String {
    let mut out = String::new();
    for id in ALL_PASSES {
        let d = descriptor(id);
        out.push_str(&format!("{}\n    {}\n    ensures: {}\n", d.name, d.summary, d.invariants));
    }
    out
}

/// Simplify, legalize, then clean up what legalization left behind.
pub fn standard_pipeline() -> Vec<PassId> {
    vec![
        PassId::TupleSimplification,
        PassId::DeadCodeElimination,
        PassId::ChannelLegalization,
        PassId::TupleSimplification,
        PassId::DeadCodeElimination,
    ]
}

/// Parse `standard` or a comma-separated list of pass names.
pub fn parse_pass_list(spec: &str) -> Result<Vec<PassId>, String> {
    if spec.trim() == "standard" {
        return Ok(standard_pipeline());
    }
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Evidence that a stage's postconditions hold, one flag per obligation.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Invocation ─────────────────────────────────────────────────────────────

/// Options shared by every pass invocation.
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// A later stage will inline procs, so the final package must also be
    /// codegen-ready. Legalization decisions do not depend on it.
    pub inline_procs: bool,
}

/// Artifacts accumulated across pass invocations.
#[derive(Debug, Default)]
pub struct PassResults {
    /// One report per channel legalization run, in run order.
    pub legalization: Vec<LegalizationReport>,
    /// Certificate of the most recent post-pass verification.
    pub last_verify: Option<VerifyCert>,
}

#[derive(Debug, Error)]
#[error("pass `{}` failed: {}", .pass.name(), first_message(.diagnostics))]
pub struct PassError {
    pub pass: PassId,
    pub diagnostics: Vec<Diagnostic>,
}

fn first_message(diagnostics: &[Diagnostic]) -> &str {
    diagnostics
        .first()
        .map(|d| d.message.as_str())
        .unwrap_or("no diagnostics")
}

/// Run one pass on `package`. Returns whether the package changed.
pub fn run_pass(
    id: PassId,
    package: &mut Package,
    options: &PassOptions,
    results: &mut PassResults,
) -> Result<bool, PassError> {
    let mut work = package.clone();
    let changed = match id {
        PassId::TupleSimplification => crate::tuple_simp::simplify_tuples(&mut work),
        PassId::DeadCodeElimination => crate::dce::eliminate_dead_code(&mut work),
        PassId::ChannelLegalization => {
            let report = crate::legalize::legalize_package(&mut work).map_err(|d| PassError {
                pass: id,
                diagnostics: vec![d],
            })?;
            let changed = report.changed;
            results.legalization.push(report);
            changed
        }
    };

    let cert = verify_package(&work, false).map_err(|diagnostics| PassError {
        pass: id,
        diagnostics,
    })?;
    log::debug!(
        "{}: changed={} inline_procs={} verified={}",
        id.name(),
        changed,
        options.inline_procs,
        cert.all_pass()
    );
    results.last_verify = Some(cert);
    if changed {
        *package = work;
    }
    Ok(changed)
}

// ── Tests ──────────────────────────────────────────────────────────────────
