// strictness.rs — Channel strictness disciplines and the decision table
//
// Maps a channel side's declared strictness plus the facts proven by the
// token-order and exclusivity analyses to an action: keep the direct
// connections, synthesize an adapter with a given runtime policy, or reject
// the package.
//
// Preconditions: `GroupFacts` describe a group of two or more operations.
// Postconditions: `resolve` is a pure function of its inputs.
// Failure modes: E0301 / E0302 diagnostics for unmet static disciplines.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::ast::Span;
use crate::diag::{codes, Diagnostic};
use crate::ir::ChannelSide;

// ── Strictness ──────────────────────────────────────────────────────────

/// Declared legalization discipline of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    #[default]
    ProvenMutuallyExclusive,
    TotalOrder,
    RuntimeOrdered,
    RuntimeMutuallyExclusive,
    ArbitraryStaticOrder,
}

impl Strictness {
    pub const ALL: [Strictness; 5] = [
        Strictness::ProvenMutuallyExclusive,
        Strictness::TotalOrder,
        Strictness::RuntimeOrdered,
        Strictness::RuntimeMutuallyExclusive,
        Strictness::ArbitraryStaticOrder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strictness::ProvenMutuallyExclusive => "proven_mutually_exclusive",
            Strictness::TotalOrder => "total_order",
            Strictness::RuntimeOrdered => "runtime_ordered",
            Strictness::RuntimeMutuallyExclusive => "runtime_mutually_exclusive",
            Strictness::ArbitraryStaticOrder => "arbitrary_static_order",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strictness::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Strictness::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown strictness '{}' (expected one of: {})", s, valid.join(", "))
            })
    }
}

// ── Resolution ──────────────────────────────────────────────────────────

/// How the synthesized adapter sequences its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterPolicy {
    /// Serve requests in a fixed reference order, one turn per operation.
    Ordered,
    /// Serve whichever single request is valid in an activation.
    Exclusive,
}

/// Runtime assertion emitted into the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeCheck {
    None,
    Ordering,
    Exclusivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Keep,
    Synthesize {
        policy: AdapterPolicy,
        check: RuntimeCheck,
    },
}

/// What the analyses established about one channel side's operations.
#[derive(Debug, Clone, Default)]
pub struct GroupFacts {
    pub exclusive: bool,
    pub totally_ordered: bool,
    pub cross_proc: bool,
    /// Names of two operations that may fire together, when not exclusive.
    pub overlapping: Option<(String, String)>,
    /// Names of two operations with no token relation, when not total.
    pub unordered: Option<(String, String)>,
}

/// Apply the strictness decision table to one channel side.
pub fn resolve(
    channel: &str,
    side: ChannelSide,
    strictness: Strictness,
    facts: &GroupFacts,
    span: Option<Span>,
) -> Result<Resolution, Diagnostic> {
    match strictness {
        Strictness::ProvenMutuallyExclusive => {
            if facts.exclusive {
                Ok(Resolution::Keep)
            } else {
                Err(not_exclusive(channel, side, facts, span))
            }
        }
        Strictness::TotalOrder => {
            if facts.totally_ordered || facts.exclusive {
                Ok(Resolution::Synthesize {
                    policy: AdapterPolicy::Ordered,
                    check: RuntimeCheck::None,
                })
            } else {
                Err(not_totally_ordered(channel, side, facts, span))
            }
        }
        Strictness::RuntimeOrdered => Ok(Resolution::Synthesize {
            policy: AdapterPolicy::Ordered,
            check: RuntimeCheck::Ordering,
        }),
        Strictness::RuntimeMutuallyExclusive => Ok(Resolution::Synthesize {
            policy: AdapterPolicy::Exclusive,
            check: RuntimeCheck::Exclusivity,
        }),
        Strictness::ArbitraryStaticOrder => Ok(Resolution::Synthesize {
            policy: AdapterPolicy::Ordered,
            check: RuntimeCheck::None,
        }),
    }
}

fn not_exclusive(
    channel: &str,
    side: ChannelSide,
    facts: &GroupFacts,
    span: Option<Span>,
) -> Diagnostic {
    let detail = match &facts.overlapping {
        Some((a, b)) => format!(": `{a}` and `{b}` may fire in the same activation"),
        None => String::new(),
    };
    let mut diag = Diagnostic::error(
        codes::E0301,
        span,
        format!("channel `{channel}` {side} side is not proven mutually exclusive{detail}"),
    )
    .with_hint("guard the operations with complementary predicates or choose a runtime strictness");
    if facts.cross_proc {
        diag = diag.with_related(None, "operations in different procs are never proven exclusive");
    }
    diag
}

fn not_totally_ordered(
    channel: &str,
    side: ChannelSide,
    facts: &GroupFacts,
    span: Option<Span>,
) -> Diagnostic {
    let detail = match &facts.unordered {
        Some((a, b)) => format!(": no token dependency orders `{a}` and `{b}`"),
        None => String::new(),
    };
    let mut diag = Diagnostic::error(
        codes::E0302,
        span,
        format!("channel `{channel}` {side} side is not totally ordered{detail}"),
    )
    .with_hint("thread a token from one operation into the other or use runtime_ordered");
    if facts.cross_proc {
        diag = diag.with_related(None, "operations in different procs have no static order");
    }
    diag
}
