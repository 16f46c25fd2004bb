// verify.rs — Structural and codegen-readiness checks for packages
//
// Runs after every pass invocation. Produces a `VerifyCert` whose
// obligations record which postconditions hold, plus one diagnostic per
// violation.
//
// Preconditions: none; any in-memory package may be checked.
// Postconditions: `Ok(cert)` implies `cert.all_pass()`.
// Failure modes: E02xx diagnostics, one per violated obligation instance.
// Side effects: none.

use std::collections::HashSet;

use crate::diag::{codes, Diagnostic};
use crate::ir::{infer_type, Channel, NodeKind, Package, Proc, Type};
use crate::pass::StageCert;
use crate::strictness::Strictness;

/// Machine-checkable evidence for package postconditions (V1-V5).
#[derive(Debug, Clone)]
pub struct VerifyCert {
    /// V1: every operand is live and precedes its user.
    pub v1_operands_defined: bool,
    /// V2: stored node types agree with inference; `next` matches the params.
    pub v2_types_consistent: bool,
    /// V3: channel operations respect the channel's direction.
    pub v3_channel_directions: bool,
    /// V4: channel, proc and node names are unique in their scopes.
    pub v4_unique_names: bool,
    /// V5 (codegen only): each channel side has at most one operation
    /// unless the channel is proven mutually exclusive.
    pub v5_single_access: bool,
}

impl StageCert for VerifyCert {
    fn all_pass(&self) -> bool {
        self.v1_operands_defined
            && self.v2_types_consistent
            && self.v3_channel_directions
            && self.v4_unique_names
            && self.v5_single_access
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_operands_defined", self.v1_operands_defined),
            ("V2_types_consistent", self.v2_types_consistent),
            ("V3_channel_directions", self.v3_channel_directions),
            ("V4_unique_names", self.v4_unique_names),
            ("V5_single_access", self.v5_single_access),
        ]
    }
}

/// Verify `package`; with `codegen` also require single-access channels.
pub fn verify_package(package: &Package, codegen: bool) -> Result<VerifyCert, Vec<Diagnostic>> {
    let mut diags = Vec::new();

    let v4 = verify_v4_unique_names(package, &mut diags);
    let mut v1 = true;
    let mut v2 = true;
    let mut v3 = true;
    for proc in &package.procs {
        v1 &= verify_v1_operands_defined(proc, &mut diags);
        // Type inference reads operand types, so skip it on broken graphs.
        if v1 {
            v2 &= verify_v2_types(package, proc, &mut diags);
        }
        v3 &= verify_v3_directions(package, proc, &mut diags);
    }
    let v5 = !codegen || verify_v5_single_access(package, &mut diags);

    let cert = VerifyCert {
        v1_operands_defined: v1,
        v2_types_consistent: v2,
        v3_channel_directions: v3,
        v4_unique_names: v4,
        v5_single_access: v5,
    };
    if cert.all_pass() {
        Ok(cert)
    } else {
        Err(diags)
    }
}

fn verify_v1_operands_defined(proc: &Proc, diags: &mut Vec<Diagnostic>) -> bool {
    let mut ok = true;
    let mut defined = HashSet::new();
    for node in proc.live_nodes() {
        for op in node.kind.operands() {
            if !defined.contains(&op) {
                ok = false;
                diags.push(Diagnostic::error(
                    codes::E0201,
                    node.span,
                    format!(
                        "node `{}` in proc `{}` uses an operand that is not defined before it",
                        node.name, proc.name
                    ),
                ));
            }
        }
        defined.insert(node.id);
    }
    for id in std::iter::once(proc.next_token).chain(proc.next_state.iter().copied()) {
        if !defined.contains(&id) {
            ok = false;
            diags.push(Diagnostic::error(
                codes::E0201,
                proc.span,
                format!("next of proc `{}` refers to a removed node", proc.name),
            ));
        }
    }
    for (i, param) in proc.params.iter().enumerate() {
        if !matches!(proc.node(*param).kind, NodeKind::Param { index } if index == i) {
            ok = false;
            diags.push(Diagnostic::error(
                codes::E0206,
                proc.span,
                format!("parameter {i} of proc `{}` is malformed", proc.name),
            ));
        }
    }
    ok
}

fn verify_v2_types(package: &Package, proc: &Proc, diags: &mut Vec<Diagnostic>) -> bool {
    let mut ok = true;
    for node in proc.live_nodes() {
        if matches!(node.kind, NodeKind::Param { .. }) {
            continue;
        }
        match infer_type(proc, &package.channels, &node.name, &node.kind) {
            Ok(ty) if ty == node.ty => {}
            Ok(ty) => {
                ok = false;
                diags.push(Diagnostic::error(
                    codes::E0202,
                    node.span,
                    format!(
                        "node `{}` is typed {} but `{}` produces {ty}",
                        node.name,
                        node.ty,
                        node.kind.op_name()
                    ),
                ));
            }
            Err(e) => {
                ok = false;
                diags.push(Diagnostic::error(codes::E0202, node.span, e.to_string()));
            }
        }
    }

    if proc.node(proc.next_token).ty != Type::Token {
        ok = false;
        diags.push(Diagnostic::error(
            codes::E0202,
            proc.span,
            format!("next token of proc `{}` is not a token", proc.name),
        ));
    }
    let state = proc.state_params();
    if state.len() != proc.next_state.len() || state.len() != proc.init.len() {
        ok = false;
        diags.push(Diagnostic::error(
            codes::E0206,
            proc.span,
            format!("proc `{}` state, init and next disagree in length", proc.name),
        ));
        return ok;
    }
    for ((param, next), init) in state.iter().zip(&proc.next_state).zip(&proc.init) {
        let param = proc.node(*param);
        if proc.node(*next).ty != param.ty || init.ty() != param.ty {
            ok = false;
            diags.push(Diagnostic::error(
                codes::E0202,
                proc.span,
                format!(
                    "state `{}` of proc `{}` is {} but its init or next value differs",
                    param.name, proc.name, param.ty
                ),
            ));
        }
    }
    ok
}

fn verify_v3_directions(package: &Package, proc: &Proc, diags: &mut Vec<Diagnostic>) -> bool {
    let mut ok = true;
    for node in proc.live_nodes() {
        let Some((id, side)) = node.kind.channel() else {
            continue;
        };
        match package.channel(id) {
            Some(channel) if channel.ops.supports(side) => {}
            Some(channel) => {
                ok = false;
                diags.push(Diagnostic::error(
                    codes::E0203,
                    node.span,
                    format!(
                        "`{}` performs a {side} on channel `{}` which is {}",
                        node.name,
                        channel.name,
                        channel.ops.as_str()
                    ),
                ));
            }
            None => {
                ok = false;
                diags.push(Diagnostic::error(
                    codes::E0203,
                    node.span,
                    format!("`{}` uses unknown channel id {}", node.name, id.0),
                ));
            }
        }
    }
    ok
}

fn verify_v4_unique_names(package: &Package, diags: &mut Vec<Diagnostic>) -> bool {
    let mut ok = true;
    let mut dup = |scope: &str, name: &str, diags: &mut Vec<Diagnostic>| {
        ok = false;
        diags.push(Diagnostic::error(
            codes::E0204,
            None,
            format!("duplicate {scope} name `{name}`"),
        ));
    };

    let mut globals = HashSet::new();
    for name in package
        .channels
        .iter()
        .map(|c| &c.name)
        .chain(package.procs.iter().map(|p| &p.name))
    {
        if !globals.insert(name.as_str()) {
            dup("channel or proc", name, diags);
        }
    }
    let mut ids = HashSet::new();
    for c in &package.channels {
        if !ids.insert(c.id) {
            dup("channel id", &c.id.0.to_string(), diags);
        }
    }
    for proc in &package.procs {
        let mut names = HashSet::new();
        for node in proc.live_nodes() {
            if !names.insert(node.name.as_str()) {
                dup("node", &format!("{}.{}", proc.name, node.name), diags);
            }
        }
    }
    ok
}

fn verify_v5_single_access(package: &Package, diags: &mut Vec<Diagnostic>) -> bool {
    let mut ok = true;
    for channel in &package.channels {
        if channel.strictness == Strictness::ProvenMutuallyExclusive {
            continue;
        }
        for &side in channel.sides() {
            let count = package.channel_ops(channel.id, side).len();
            if count > 1 {
                ok = false;
                diags.push(multiple_access(channel, side, count));
            }
        }
    }
    ok
}

fn multiple_access(channel: &Channel, side: crate::ir::ChannelSide, count: usize) -> Diagnostic {
    Diagnostic::error(
        codes::E0205,
        channel.span,
        format!(
            "channel `{}` has {count} operations on its {side} side; codegen requires one",
            channel.name
        ),
    )
    .with_hint("run channel legalization before code generation")
}
