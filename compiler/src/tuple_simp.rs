// tuple_simp.rs — Tuple simplification
//
// Forwards `tuple_index(tuple(a, b, ..), i)` to the i-th element and
// collapses `tuple(tuple_index(x, 0), .., tuple_index(x, n-1))` back to `x`
// when it rebuilds all of `x`. Rewritten nodes are left for DCE.
//
// Preconditions: the package verifies.
// Postconditions: the package still verifies; side effects are untouched.
// Failure modes: none.
// Side effects: none.

use crate::id::NodeId;
use crate::ir::{NodeKind, Package, Proc, Type};

/// Run tuple simplification over every proc. Returns whether anything changed.
pub fn simplify_tuples(package: &mut Package) -> bool {
    let mut changed = false;
    for proc in &mut package.procs {
        changed |= simplify_proc(proc);
    }
    changed
}

fn simplify_proc(proc: &mut Proc) -> bool {
    let mut changed = false;
    let order = proc.order.clone();
    for id in order {
        let Some(replacement) = forwarded(proc, id) else {
            continue;
        };
        if proc.users(id).is_empty() && !proc.is_next_operand(id) {
            continue;
        }
        proc.replace_uses(id, replacement);
        changed = true;
    }
    changed
}

fn forwarded(proc: &Proc, id: NodeId) -> Option<NodeId> {
    match &proc.node(id).kind {
        NodeKind::TupleIndex { tuple, index } => match &proc.node(*tuple).kind {
            NodeKind::Tuple(elems) => elems.get(*index).copied(),
            _ => None,
        },
        NodeKind::Tuple(elems) => {
            let mut source = None;
            for (i, e) in elems.iter().enumerate() {
                let NodeKind::TupleIndex { tuple, index } = &proc.node(*e).kind else {
                    return None;
                };
                if *index != i || source.is_some_and(|s| s != *tuple) {
                    return None;
                }
                source = Some(*tuple);
            }
            let source = source?;
            match &proc.node(source).ty {
                Type::Tuple(tys) if tys.len() == elems.len() => Some(source),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_package;

    #[test]
    fn forwards_index_of_literal_tuple() {
        let src = r#"package t
top proc m(tok: token, s: bits[4], init={3}) {
  one: bits[4] = literal(value=1)
  pair: (bits[4], bits[4]) = tuple(s, one)
  second: bits[4] = tuple_index(pair, index=1)
  sum: bits[4] = add(s, second)
  next(tok, sum)
}
"#;
        let mut pkg = parse_package(src).unwrap();
        assert!(simplify_tuples(&mut pkg));
        let m = &pkg.procs[0];
        let sum = m.node(m.node_by_name("sum").unwrap());
        assert_eq!(sum.kind.operands()[1], m.node_by_name("one").unwrap());
        assert!(!simplify_tuples(&mut pkg));
    }

    #[test]
    fn collapses_rebuilt_tuple() {
        let src = r#"package t
top proc m(tok: token, s: (bits[1], bits[2]), init={(0, 0)}) {
  a: bits[1] = tuple_index(s, index=0)
  b: bits[2] = tuple_index(s, index=1)
  again: (bits[1], bits[2]) = tuple(a, b)
  next(tok, again)
}
"#;
        let mut pkg = parse_package(src).unwrap();
        assert!(simplify_tuples(&mut pkg));
        let m = &pkg.procs[0];
        assert_eq!(m.next_state[0], m.state_params()[0]);
    }

    #[test]
    fn partial_rebuild_is_kept() {
        let src = r#"package t
top proc m(tok: token, s: (bits[1], bits[1]), init={(0, 0)}) {
  a: bits[1] = tuple_index(s, index=0)
  swapped: (bits[1], bits[1]) = tuple(a, a)
  next(tok, swapped)
}
"#;
        let mut pkg = parse_package(src).unwrap();
        assert!(!simplify_tuples(&mut pkg));
    }
}
