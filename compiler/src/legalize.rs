// legalize.rs — Channel legalization driver
//
// Visits every channel side in declaration order (send side first) and
// groups its operations in discovery order. Phase 1 runs the token-order
// and exclusivity analyses and the strictness decision table for every
// group without touching the package. Phase 2 synthesizes adapters on a
// working copy that replaces the package only when every group succeeded.
//
// Preconditions: the package verifies.
// Postconditions: on `Ok`, every channel side has at most one operation or
//   is proven mutually exclusive; on `Err`, the package is unchanged.
// Failure modes: E0301 / E0302 from the decision table, E0303 when adapter
//   synthesis produces ill-formed IR.
// Side effects: logs one debug line per group.

use serde::Serialize;

use crate::adapter::{synthesize_adapter, AdapterSummary};
use crate::diag::{codes, Diagnostic};
use crate::exclusivity::prove_mutually_exclusive;
use crate::id::ChannelId;
use crate::ir::{ChannelSide, OpRef, Package};
use crate::strictness::{resolve, AdapterPolicy, GroupFacts, Resolution, RuntimeCheck, Strictness};
use crate::token_order::{analyze_group, ChannelOrder};

/// Per-group outcome recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GroupAction {
    Keep,
    Synthesize {
        policy: AdapterPolicy,
        check: RuntimeCheck,
        adapter: Option<AdapterSummary>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDecision {
    pub channel: String,
    pub side: ChannelSide,
    pub strictness: Strictness,
    /// `proc.node` names in discovery order.
    pub operations: Vec<String>,
    pub exclusive: bool,
    pub totally_ordered: bool,
    #[serde(flatten)]
    pub action: GroupAction,
}

/// Summary of one legalization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegalizationReport {
    pub changed: bool,
    pub groups: Vec<GroupDecision>,
}

/// A decided group awaiting synthesis.
struct Plan {
    channel: ChannelId,
    side: ChannelSide,
    ops: Vec<OpRef>,
    order: ChannelOrder,
    decision: usize,
}

/// Legalize every shared channel side of `package`.
pub fn legalize_package(package: &mut Package) -> Result<LegalizationReport, Diagnostic> {
    let mut report = LegalizationReport::default();
    let mut plans = Vec::new();

    // ── Phase 1: decide ──

    for channel in &package.channels {
        for &side in channel.sides() {
            let ops = package.channel_ops(channel.id, side);
            if ops.len() <= 1 {
                continue;
            }

            let order = analyze_group(package, &ops);
            let exclusivity = prove_mutually_exclusive(package, &ops);
            let name_of = |i: usize| op_name(package, ops[i]);
            let facts = GroupFacts {
                exclusive: exclusivity.exclusive,
                totally_ordered: order.is_total,
                cross_proc: ops.iter().any(|o| o.proc != ops[0].proc),
                overlapping: exclusivity.overlapping.map(|(a, b)| (name_of(a), name_of(b))),
                unordered: order.unordered.map(|(a, b)| (name_of(a), name_of(b))),
            };

            let resolution = resolve(&channel.name, side, channel.strictness, &facts, channel.span)?;
            log::debug!(
                "channel `{}` {} side: {} ops, exclusive={}, total={} -> {:?}",
                channel.name,
                side,
                ops.len(),
                facts.exclusive,
                facts.totally_ordered,
                resolution
            );

            let action = match resolution {
                Resolution::Keep => GroupAction::Keep,
                Resolution::Synthesize { policy, check } => GroupAction::Synthesize {
                    policy,
                    check,
                    adapter: None,
                },
            };
            report.groups.push(GroupDecision {
                channel: channel.name.clone(),
                side,
                strictness: channel.strictness,
                operations: (0..ops.len()).map(name_of).collect(),
                exclusive: facts.exclusive,
                totally_ordered: facts.totally_ordered,
                action,
            });
            if matches!(resolution, Resolution::Synthesize { .. }) {
                plans.push(Plan {
                    channel: channel.id,
                    side,
                    ops,
                    order,
                    decision: report.groups.len() - 1,
                });
            }
        }
    }

    if plans.is_empty() {
        return Ok(report);
    }

    // ── Phase 2: synthesize on a working copy ──

    let mut work = package.clone();
    for plan in &plans {
        let decision = &mut report.groups[plan.decision];
        let GroupAction::Synthesize {
            policy,
            check,
            adapter,
        } = &mut decision.action
        else {
            continue;
        };
        let summary = synthesize_adapter(
            &mut work,
            plan.channel,
            plan.side,
            &plan.ops,
            &plan.order,
            *policy,
            *check,
        )
        .map_err(|e| {
            Diagnostic::error(
                codes::E0303,
                None,
                format!(
                    "adapter synthesis for channel `{}` {} side failed: {e}",
                    decision.channel, plan.side
                ),
            )
        })?;
        *adapter = Some(summary);
    }

    *package = work;
    report.changed = true;
    log::info!("legalized {} channel side(s)", plans.len());
    Ok(report)
}

fn op_name(package: &Package, op: OpRef) -> String {
    let proc = package.proc(op.proc);
    format!("{}.{}", proc.name, proc.node(op.node).name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_package;

    fn source(strictness: &str, second_pred: &str) -> String {
        format!(
            r#"package t
chan out(bits[8], id=0, kind=streaming, ops=send_only, flow_control=ready_valid, strictness={strictness}, metadata="")
chan single(bits[8], id=1, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=proven_mutually_exclusive, metadata="")
top proc m(tok: token, p: bits[1], init={{0}}) {{
  np: bits[1] = not(p)
  x: bits[8] = literal(value=5)
  a: token = send(tok, x, predicate=p, channel=out)
  b: token = send(tok, x, predicate={second_pred}, channel=out)
  c: token = send(tok, x, channel=single)
  j: token = after_all(a, b, c)
  next(j, p)
}}
"#
        )
    }

    #[test]
    fn complementary_group_is_kept() {
        let mut pkg = parse_package(&source("proven_mutually_exclusive", "np")).unwrap();
        let before = pkg.clone();
        let report = legalize_package(&mut pkg).unwrap();
        assert!(!report.changed);
        assert_eq!(pkg, before);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].action, GroupAction::Keep);
    }

    #[test]
    fn unproven_group_fails_without_mutation() {
        let mut pkg = parse_package(&source("proven_mutually_exclusive", "p")).unwrap();
        let before = pkg.to_string();
        let diag = legalize_package(&mut pkg).unwrap_err();
        assert_eq!(diag.code, Some(codes::E0301));
        assert!(diag.message.contains("`m.a` and `m.b`"));
        assert_eq!(pkg.to_string(), before);
    }

    #[test]
    fn unconditional_sends_are_not_proven_exclusive() {
        let src = source("proven_mutually_exclusive", "p")
            .replace(", predicate=p, channel=out", ", channel=out");
        let mut pkg = parse_package(&src).unwrap();
        let before = pkg.to_string();
        let diag = legalize_package(&mut pkg).unwrap_err();
        assert_eq!(diag.code, Some(codes::E0301));
        assert_eq!(
            diag.message,
            "channel `out` send side is not proven mutually exclusive: `m.a` and `m.b` may fire in the same activation"
        );
        assert!(diag.hint.as_deref().unwrap().contains("complementary predicates"));
        assert!(diag.related_spans.is_empty());
        assert_eq!(pkg.to_string(), before);
    }

    #[test]
    fn unordered_total_order_fails() {
        let mut pkg = parse_package(&source("total_order", "p")).unwrap();
        let diag = legalize_package(&mut pkg).unwrap_err();
        assert_eq!(diag.code, Some(codes::E0302));
        assert!(diag.message.contains("is not totally ordered"));
    }

    #[test]
    fn runtime_strictness_synthesizes_once() {
        let mut pkg = parse_package(&source("runtime_ordered", "p")).unwrap();
        let report = legalize_package(&mut pkg).unwrap();
        assert!(report.changed);
        let GroupAction::Synthesize { adapter, check, .. } = &report.groups[0].action else {
            panic!("expected synthesis")
        };
        assert_eq!(*check, RuntimeCheck::Ordering);
        assert_eq!(adapter.as_ref().unwrap().adapter, "out__adapter");
        assert_eq!(pkg.procs.len(), 2);

        let again = legalize_package(&mut pkg).unwrap();
        assert!(!again.changed);
        assert!(again.groups.is_empty());
    }

    #[test]
    fn report_serializes() {
        let mut pkg = parse_package(&source("arbitrary_static_order", "p")).unwrap();
        let report = legalize_package(&mut pkg).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["changed"], true);
        assert_eq!(json["groups"][0]["action"], "synthesize");
        assert_eq!(json["groups"][0]["strictness"], "arbitrary_static_order");
        assert_eq!(json["groups"][0]["operations"][1], "m.b");
    }
}
