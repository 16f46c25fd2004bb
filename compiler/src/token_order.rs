// token_order.rs — Happens-before order of side effects from token threading
//
// Builds, per proc, an arena of effect records (the initial token plus every
// receive, send, assert and after_all) with explicit predecessor/successor
// handle lists, then answers ordering queries for the operations sharing one
// channel side.
//
// Preconditions: the proc verifies (operands precede users).
// Postconditions: the effect graph is acyclic; edges only point forward in
//   the proc's node order.
// Failure modes: none; unknown nodes are simply unordered.
// Side effects: none.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::id::{NodeId, ProcId};
use crate::ir::{NodeKind, OpRef, Package, Proc};

// ── Effect graph ────────────────────────────────────────────────────────

/// Handle of an effect record within a `TokenGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// The proc's token parameter.
    Root,
    Receive,
    Send,
    Assert,
    Join,
}

#[derive(Debug, Clone)]
pub struct Effect {
    pub id: EffectId,
    pub node: NodeId,
    pub kind: EffectKind,
    pub preds: Vec<EffectId>,
    pub succs: Vec<EffectId>,
}

/// Token dependency graph of one proc.
#[derive(Debug, Clone, Default)]
pub struct TokenGraph {
    effects: Vec<Effect>,
    by_node: HashMap<NodeId, EffectId>,
}

impl TokenGraph {
    pub fn build(proc: &Proc) -> Self {
        let mut graph = TokenGraph::default();
        // Effects whose token is (possibly) contained in each node's value.
        let mut carried: HashMap<NodeId, Vec<EffectId>> = HashMap::new();

        for node in proc.live_nodes() {
            let kind = match &node.kind {
                NodeKind::Param { index: 0 } => Some(EffectKind::Root),
                NodeKind::Receive { .. } => Some(EffectKind::Receive),
                NodeKind::Send { .. } => Some(EffectKind::Send),
                NodeKind::Assert { .. } => Some(EffectKind::Assert),
                NodeKind::AfterAll(_) => Some(EffectKind::Join),
                _ => None,
            };

            let mut incoming: Vec<EffectId> = Vec::new();
            for op in node.kind.operands() {
                for e in carried.get(&op).into_iter().flatten() {
                    if !incoming.contains(e) {
                        incoming.push(*e);
                    }
                }
            }

            match kind {
                Some(kind) => {
                    let id = graph.push(node.id, kind, incoming);
                    carried.insert(node.id, vec![id]);
                }
                None if node.ty.contains_token() => {
                    carried.insert(node.id, incoming);
                }
                None => {}
            }
        }
        graph
    }

    fn push(&mut self, node: NodeId, kind: EffectKind, preds: Vec<EffectId>) -> EffectId {
        let id = EffectId(self.effects.len() as u32);
        for p in &preds {
            self.effects[p.0 as usize].succs.push(id);
        }
        self.effects.push(Effect {
            id,
            node,
            kind,
            preds,
            succs: Vec::new(),
        });
        self.by_node.insert(node, id);
        id
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn effect(&self, id: EffectId) -> &Effect {
        &self.effects[id.0 as usize]
    }

    pub fn effect_of(&self, node: NodeId) -> Option<EffectId> {
        self.by_node.get(&node).copied()
    }

    /// True when `a`'s token transitively feeds `b`.
    pub fn happens_before(&self, a: NodeId, b: NodeId) -> bool {
        let (Some(from), Some(to)) = (self.effect_of(a), self.effect_of(b)) else {
            return false;
        };
        if from == to {
            return false;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(cur) = queue.pop_front() {
            for &s in &self.effect(cur).succs {
                if s == to {
                    return true;
                }
                if seen.insert(s) {
                    queue.push_back(s);
                }
            }
        }
        false
    }
}

// ── Channel groups ──────────────────────────────────────────────────────

/// Ordering facts for the operations sharing one channel side.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOrder {
    /// `before[i][j]`: operation `i` happens before operation `j`.
    pub before: Vec<Vec<bool>>,
    pub is_total: bool,
    /// Indices into the group, a linear extension of `before`.
    pub reference_order: Vec<usize>,
    /// First pair (by index) with no relation, when not total.
    pub unordered: Option<(usize, usize)>,
}

/// Relate every pair of `ops`. Pairs in different procs are never related.
pub fn analyze_group(package: &Package, ops: &[OpRef]) -> ChannelOrder {
    let mut graphs: HashMap<ProcId, TokenGraph> = HashMap::new();
    for op in ops {
        graphs
            .entry(op.proc)
            .or_insert_with(|| TokenGraph::build(package.proc(op.proc)));
    }

    let n = ops.len();
    let mut before = vec![vec![false; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j && ops[i].proc == ops[j].proc {
                before[i][j] = graphs[&ops[i].proc].happens_before(ops[i].node, ops[j].node);
            }
        }
    }

    let mut unordered = None;
    'pairs: for i in 0..n {
        for j in i + 1..n {
            if !before[i][j] && !before[j][i] {
                unordered = Some((i, j));
                break 'pairs;
            }
        }
    }

    // Package order then node order: token edges only point forward, so
    // this sort is a linear extension of `before`.
    let mut reference_order: Vec<usize> = (0..n).collect();
    reference_order.sort_by_key(|&i| {
        let proc = package.proc(ops[i].proc);
        (ops[i].proc, proc.position(ops[i].node).unwrap_or(usize::MAX))
    });

    ChannelOrder {
        before,
        is_total: unordered.is_none(),
        reference_order,
        unordered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_package;

    const CHAIN: &str = r#"package t
chan in(bits[8], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=total_order, metadata="")
top proc p(tok: token, init={}) {
  a: (token, bits[8]) = receive(tok, channel=in)
  a_tok: token = tuple_index(a, index=0)
  b: (token, bits[8]) = receive(a_tok, channel=in)
  c: (token, bits[8]) = receive(tok, channel=in)
  b_tok: token = tuple_index(b, index=0)
  c_tok: token = tuple_index(c, index=0)
  j: token = after_all(b_tok, c_tok)
  d: (token, bits[8]) = receive(j, channel=in)
  d_tok: token = tuple_index(d, index=0)
  next(d_tok)
}
"#;

    fn ids(pkg: &Package, names: &[&str]) -> Vec<NodeId> {
        names
            .iter()
            .map(|n| pkg.procs[0].node_by_name(n).unwrap())
            .collect()
    }

    #[test]
    fn follows_tuple_index_and_joins() {
        let pkg = parse_package(CHAIN).unwrap();
        let g = TokenGraph::build(&pkg.procs[0]);
        let v = ids(&pkg, &["tok", "a", "b", "c", "d"]);
        assert!(g.happens_before(v[0], v[4]));
        assert!(g.happens_before(v[1], v[2]));
        assert!(g.happens_before(v[1], v[4]));
        assert!(g.happens_before(v[3], v[4]));
        assert!(!g.happens_before(v[1], v[3]));
        assert!(!g.happens_before(v[3], v[1]));
        assert!(!g.happens_before(v[4], v[1]));
        assert_eq!(g.effect(g.effect_of(v[0]).unwrap()).kind, EffectKind::Root);
    }

    #[test]
    fn data_outputs_carry_no_token() {
        let src = r#"package t
chan in(bits[8], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=total_order, metadata="")
top proc p(tok: token, init={}) {
  a: (token, bits[8]) = receive(tok, channel=in)
  x: bits[8] = tuple_index(a, index=1)
  t: (bits[8]) = tuple(x)
  next(tok)
}
"#;
        let pkg = parse_package(src).unwrap();
        let g = TokenGraph::build(&pkg.procs[0]);
        assert_eq!(g.effects().len(), 2);
        assert!(g.effects()[1].succs.is_empty());
    }

    #[test]
    fn group_partial_order() {
        let pkg = parse_package(CHAIN).unwrap();
        let ops = pkg.channel_ops(pkg.channels[0].id, crate::ir::ChannelSide::Receive);
        let order = analyze_group(&pkg, &ops);
        assert!(!order.is_total);
        assert_eq!(order.unordered, Some((0, 2)));
        assert_eq!(order.reference_order, vec![0, 1, 2, 3]);
        assert!(order.before[0][3]);
        assert!(!order.before[3][0]);
    }

    #[test]
    fn chained_pair_is_total() {
        let pkg = parse_package(CHAIN).unwrap();
        let ops = pkg.channel_ops(pkg.channels[0].id, crate::ir::ChannelSide::Receive);
        let order = analyze_group(&pkg, &[ops[0], ops[1], ops[3]]);
        assert!(order.is_total);
        assert_eq!(order.unordered, None);
    }
}
