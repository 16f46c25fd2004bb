// exclusivity.rs — Conservative proof that channel operations never co-fire
//
// Recognized patterns, for two operations in the same proc:
//   - a predicate that is unsatisfiable on its own (literal 0 conjunct);
//   - complementary conjuncts `a` and `not(a)` on the same node, looking
//     through `and`, `not` (double negation cancels) and `not(or(..))`;
//   - `eq(x, c1)` and `eq(x, c2)` on the same node with distinct literals.
// A group of one operation is trivially exclusive. Any unpredicated
// operation in a larger group, and any pair split across procs, is never
// proven exclusive.
//
// Preconditions: predicates are bits[1] nodes of the operation's proc.
// Postconditions: `exclusive == true` only if no activation can fire two
//   operations of the group.
// Failure modes: none; "not proven" is a normal answer.
// Side effects: none.

use crate::id::NodeId;
use crate::ir::{BinOp, NaryOp, NodeKind, OpRef, Package, Proc};

/// One conjunct of a flattened predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Atom {
    Node(NodeId),
    /// `eq(node, literal)`.
    EqConst(NodeId, u64),
}

/// A predicate as a conjunction of polarized atoms.
#[derive(Debug, Clone, Default)]
struct Conjunction {
    atoms: Vec<(Atom, bool)>,
    /// Some conjunct is constant false.
    never: bool,
}

impl Conjunction {
    fn of(proc: &Proc, predicate: NodeId) -> Self {
        let mut conj = Conjunction::default();
        conj.flatten(proc, predicate, true);
        conj
    }

    fn flatten(&mut self, proc: &Proc, id: NodeId, positive: bool) {
        match &proc.node(id).kind {
            NodeKind::Not(x) => self.flatten(proc, *x, !positive),
            NodeKind::Nary {
                op: NaryOp::And,
                operands,
            } if positive => {
                for o in operands {
                    self.flatten(proc, *o, true);
                }
            }
            NodeKind::Nary {
                op: NaryOp::Or,
                operands,
            } if !positive => {
                for o in operands {
                    self.flatten(proc, *o, false);
                }
            }
            NodeKind::Literal(v) => {
                if v.is_true() != positive {
                    self.never = true;
                }
            }
            NodeKind::Binary { op, lhs, rhs }
                if (*op == BinOp::Eq && positive) || (*op == BinOp::Ne && !positive) =>
            {
                if let Some(atom) = eq_const(proc, *lhs, *rhs) {
                    self.atoms.push((atom, true));
                }
                self.atoms.push((Atom::Node(id), positive));
            }
            _ => self.atoms.push((Atom::Node(id), positive)),
        }
    }

    fn disjoint_with(&self, other: &Conjunction) -> bool {
        if self.never || other.never {
            return true;
        }
        self.atoms.iter().any(|(a, pa)| {
            other.atoms.iter().any(|(b, pb)| match (a, b) {
                (Atom::Node(x), Atom::Node(y)) => x == y && pa != pb,
                (Atom::EqConst(x, c1), Atom::EqConst(y, c2)) => x == y && c1 != c2,
                _ => false,
            })
        })
    }
}

fn eq_const(proc: &Proc, lhs: NodeId, rhs: NodeId) -> Option<Atom> {
    let literal = |id: NodeId| match &proc.node(id).kind {
        NodeKind::Literal(v) => v.as_u64(),
        _ => None,
    };
    match (literal(lhs), literal(rhs)) {
        (None, Some(c)) => Some(Atom::EqConst(lhs, c)),
        (Some(c), None) => Some(Atom::EqConst(rhs, c)),
        _ => None,
    }
}

/// Outcome of the exclusivity proof for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusivity {
    pub exclusive: bool,
    /// First pair (by index) that could not be separated.
    pub overlapping: Option<(usize, usize)>,
}

/// Try to prove that at most one of `ops` fires in any activation.
pub fn prove_mutually_exclusive(package: &Package, ops: &[OpRef]) -> Exclusivity {
    let conjunctions: Vec<Option<Conjunction>> = ops
        .iter()
        .map(|op| {
            let proc = package.proc(op.proc);
            proc.node(op.node)
                .kind
                .predicate()
                .map(|p| Conjunction::of(proc, p))
        })
        .collect();

    for i in 0..ops.len() {
        for j in i + 1..ops.len() {
            let separated = ops[i].proc == ops[j].proc
                && match (&conjunctions[i], &conjunctions[j]) {
                    (Some(a), Some(b)) => a.disjoint_with(b),
                    _ => false,
                };
            if !separated {
                return Exclusivity {
                    exclusive: false,
                    overlapping: Some((i, j)),
                };
            }
        }
    }
    Exclusivity {
        exclusive: true,
        overlapping: None,
    }
}
