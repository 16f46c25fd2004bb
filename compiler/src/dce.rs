// dce.rs — Dead code elimination
//
// Removes pure nodes with no live users that do not feed `next`.
// Parameters, channel operations and asserts are always kept.
//
// Preconditions: the package verifies.
// Postconditions: the package still verifies.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;

use crate::id::NodeId;
use crate::ir::{Package, Proc};

/// Run DCE over every proc. Returns whether any node was removed.
pub fn eliminate_dead_code(package: &mut Package) -> bool {
    let mut changed = false;
    for proc in &mut package.procs {
        let removed = eliminate_proc(proc);
        if removed > 0 {
            log::debug!("dce: removed {} node(s) from `{}`", removed, proc.name);
            changed = true;
        }
    }
    changed
}

fn eliminate_proc(proc: &mut Proc) -> usize {
    let mut uses: HashMap<NodeId, usize> = HashMap::new();
    for node in proc.live_nodes() {
        for op in node.kind.operands() {
            *uses.entry(op).or_default() += 1;
        }
    }
    for id in std::iter::once(proc.next_token).chain(proc.next_state.iter().copied()) {
        *uses.entry(id).or_default() += 1;
    }

    // Reverse topological order: a node's users are visited before it.
    let mut dead = Vec::new();
    for &id in proc.order.iter().rev() {
        let node = proc.node(id);
        if node.kind.is_side_effecting() || uses.get(&id).copied().unwrap_or(0) > 0 {
            continue;
        }
        for op in node.kind.operands() {
            if let Some(n) = uses.get_mut(&op) {
                *n -= 1;
            }
        }
        dead.push(id);
    }
    for id in &dead {
        proc.remove(*id);
    }
    dead.len()
}
