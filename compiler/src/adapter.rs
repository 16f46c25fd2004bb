// adapter.rs — Synthesis of arbiter procs for shared channel sides
//
// Moves every operation of a channel side onto a private pair of internal
// channels and creates one adapter proc that owns the original channel.
// Each user operation announces on its request channel whether it fires
// this activation; the adapter decides which request to serve and moves
// the payload between the original channel and the operation's private
// payload channel through a single operation of its own.
//
// Ordered policy: the adapter keeps a turn index as state and serves one
// turn of the reference order per activation, stalling until that turn's
// request arrives.
//
// Exclusive policy: requests are issued as early as the user proc allows.
// The adapter collects them in phases (one phase per activation); a phase
// holds every request that does not wait on an earlier operation of the
// group. All requests of a phase are checked before anything is forwarded,
// and at most one request may be valid per round.
//
// Preconditions: `ops` all target `channel` on `side`, in discovery order;
//   `order` was computed for exactly these ops.
// Postconditions: `channel`'s `side` has exactly one operation (in the new
//   adapter); every user operation keeps its predicate and result type.
// Failure modes: `IrError` if the rewritten IR is ill-formed.
// Side effects: appends channels and one proc to the package.

use std::collections::HashSet;

use serde::Serialize;

use crate::id::{ChannelId, NodeId, ProcId};
use crate::ir::{
    BinOp, Channel, ChannelOps, ChannelSide, IrError, NaryOp, NodeKind, OpRef, Package, Proc, Type,
    Value,
};
use crate::strictness::{AdapterPolicy, RuntimeCheck, Strictness};
use crate::token_order::{ChannelOrder, EffectKind, TokenGraph};

/// What one synthesis created, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterSummary {
    pub adapter: String,
    pub internal_channels: Vec<String>,
    /// `proc.node` names of the served operations, by turn.
    pub turns: Vec<String>,
}

/// Private channels of one operation site.
struct Site {
    op: OpRef,
    request: ChannelId,
    payload: ChannelId,
    /// The request send inserted into the user proc.
    request_node: NodeId,
}

/// Legalize `ops` on one side of `channel` behind a new adapter proc.
pub fn synthesize_adapter(
    package: &mut Package,
    channel: ChannelId,
    side: ChannelSide,
    ops: &[OpRef],
    order: &ChannelOrder,
    policy: AdapterPolicy,
    check: RuntimeCheck,
) -> Result<AdapterSummary, IrError> {
    let original = package
        .channel(channel)
        .cloned()
        .ok_or(IrError::UnknownChannel(channel.0))?;
    let base = original.name.clone();
    let mut globals = package.global_names();
    let mut internal_channels = Vec::new();
    let group: HashSet<NodeId> = ops.iter().map(|o| o.node).collect();

    // ── Private channels and operation rewiring ──

    let mut sites = Vec::with_capacity(ops.len());
    for (turn, &index) in order.reference_order.iter().enumerate() {
        let op = ops[index];
        let payload_suffix = match side {
            ChannelSide::Receive => "resp",
            ChannelSide::Send => "data",
        };
        let request = add_internal_channel(
            package,
            globals.fresh(&format!("{base}__req_{turn}")),
            Type::Bits(1),
            &original,
        )?;
        let payload = add_internal_channel(
            package,
            globals.fresh(&format!("{base}__{payload_suffix}_{turn}")),
            original.ty.clone(),
            &original,
        )?;
        for id in [request, payload] {
            if let Some(c) = package.channel(id) {
                internal_channels.push(c.name.clone());
            }
        }
        let request_node = match policy {
            AdapterPolicy::Ordered => rewire_in_place(package, op, request, payload)?,
            AdapterPolicy::Exclusive => rewire_early(package, op, &group, request, payload)?,
        };
        sites.push(Site {
            op,
            request,
            payload,
            request_node,
        });
    }

    // ── Adapter proc ──

    let adapter_name = globals.fresh(&format!("{base}__adapter"));
    let shape = AdapterShape {
        channel,
        side,
        base: &base,
    };
    match policy {
        AdapterPolicy::Ordered => build_ordered(package, &adapter_name, &shape, &sites, order, check)?,
        AdapterPolicy::Exclusive => {
            let phases = request_phases(package, &sites);
            build_exclusive(package, &adapter_name, &shape, &sites, &phases)?
        }
    };

    let turns = sites
        .iter()
        .map(|s| {
            let proc = package.proc(s.op.proc);
            format!("{}.{}", proc.name, proc.node(s.op.node).name)
        })
        .collect();

    log::debug!(
        "synthesized `{}` for channel `{}` {} side ({:?}, {} turns)",
        adapter_name,
        base,
        side,
        policy,
        sites.len()
    );

    Ok(AdapterSummary {
        adapter: adapter_name,
        internal_channels,
        turns,
    })
}

fn add_internal_channel(
    package: &mut Package,
    name: String,
    ty: Type,
    shadowed: &Channel,
) -> Result<ChannelId, IrError> {
    let mut channel = Channel::new(package.next_channel_id(), name, ty, ChannelOps::SendReceive);
    channel.flow_control = shadowed.flow_control;
    channel.strictness = Strictness::ProvenMutuallyExclusive;
    package.add_channel(channel)
}

// ── User-side rewiring ──────────────────────────────────────────────────

/// The op's original token and its valid flag (the predicate, or a fresh
/// literal 1 inserted before `anchor`).
fn valid_flag(package: &mut Package, op: OpRef, anchor: NodeId) -> Result<(NodeId, NodeId), IrError> {
    let node = package.node(op).clone();
    if node.kind.channel().is_none() {
        return Err(IrError::Type {
            name: node.name,
            message: "not a channel operation".into(),
        });
    }
    let token = node.kind.operands()[0];
    let valid = match node.kind.predicate() {
        Some(p) => p,
        None => {
            let name = package.proc(op.proc).names().fresh(&format!("{}__valid", node.name));
            package.insert_node_before(op.proc, anchor, &name, NodeKind::Literal(Value::bool(true)))?
        }
    };
    Ok((token, valid))
}

fn retarget(package: &mut Package, op: OpRef, token: NodeId, payload: ChannelId) {
    match &mut package.proc_mut(op.proc).node_mut(op.node).kind {
        NodeKind::Receive {
            token: t, channel, ..
        }
        | NodeKind::Send {
            token: t, channel, ..
        } => {
            *t = token;
            *channel = payload;
        }
        _ => {}
    }
}

/// Insert the request send directly in front of `op` and move `op` to
/// `payload`. The op consumes the request's token.
fn rewire_in_place(
    package: &mut Package,
    op: OpRef,
    request: ChannelId,
    payload: ChannelId,
) -> Result<NodeId, IrError> {
    let (token, valid) = valid_flag(package, op, op.node)?;
    let name = package.proc(op.proc).names().fresh(&format!("{}__req", package.node(op).name));
    let req = package.insert_node_before(
        op.proc,
        op.node,
        &name,
        NodeKind::Send {
            token,
            data: valid,
            predicate: None,
            channel: request,
        },
    )?;
    retarget(package, op, req, payload);
    Ok(req)
}

/// Issue the request as early as the proc allows: right after the op's
/// predicate and after every effect outside the group that is token-ordered
/// before the op. The op joins its original token with the request's.
fn rewire_early(
    package: &mut Package,
    op: OpRef,
    group: &HashSet<NodeId>,
    request: ChannelId,
    payload: ChannelId,
) -> Result<NodeId, IrError> {
    let anchor = earliest_anchor(package.proc(op.proc), op.node, group);
    let (token, valid) = valid_flag(package, op, anchor)?;
    let op_name = package.node(op).name.clone();
    let root = package.proc(op.proc).token_param();

    let mut names = package.proc(op.proc).names();
    let req = package.insert_node_before(
        op.proc,
        anchor,
        &names.fresh(&format!("{op_name}__req")),
        NodeKind::Send {
            token: root,
            data: valid,
            predicate: None,
            channel: request,
        },
    )?;
    let join = package.insert_node_before(
        op.proc,
        op.node,
        &names.fresh(&format!("{op_name}__join")),
        NodeKind::AfterAll(vec![token, req]),
    )?;
    retarget(package, op, join, payload);
    Ok(req)
}

fn earliest_anchor(proc: &Proc, op: NodeId, group: &HashSet<NodeId>) -> NodeId {
    let graph = TokenGraph::build(proc);
    let mut after = proc
        .order
        .iter()
        .position(|id| !matches!(proc.node(*id).kind, NodeKind::Param { .. }))
        .unwrap_or(proc.order.len());

    if let Some(at) = proc.node(op).kind.predicate().and_then(|p| proc.position(p)) {
        after = after.max(at + 1);
    }
    for effect in graph.effects() {
        let real = matches!(
            effect.kind,
            EffectKind::Receive | EffectKind::Send | EffectKind::Assert
        );
        if real && !group.contains(&effect.node) && graph.happens_before(effect.node, op) {
            if let Some(at) = proc.position(effect.node) {
                after = after.max(at + 1);
            }
        }
    }
    proc.order.get(after).copied().unwrap_or(op)
}

/// Phase of each turn's request: one past the latest phase of any group
/// operation the request is issued after.
fn request_phases(package: &Package, sites: &[Site]) -> Vec<usize> {
    let mut phases: Vec<usize> = Vec::with_capacity(sites.len());
    for (j, site) in sites.iter().enumerate() {
        let proc = package.proc(site.op.proc);
        let req_at = proc.position(site.request_node);
        let phase = sites[..j]
            .iter()
            .zip(&phases)
            .filter(|(k, _)| k.op.proc == site.op.proc && proc.position(k.op.node) < req_at)
            .map(|(_, p)| p + 1)
            .max()
            .unwrap_or(0);
        phases.push(phase);
    }
    phases
}

// ── Adapter construction ────────────────────────────────────────────────

struct AdapterShape<'a> {
    channel: ChannelId,
    side: ChannelSide,
    base: &'a str,
}

/// Appends nodes to the adapter proc under construction.
struct Emitter<'a> {
    package: &'a mut Package,
    proc: ProcId,
    tok: NodeId,
}

impl Emitter<'_> {
    fn node(&mut self, name: &str, kind: NodeKind) -> Result<NodeId, IrError> {
        self.package.add_node(self.proc, name, kind, None)
    }

    fn literal(&mut self, name: &str, value: Value) -> Result<NodeId, IrError> {
        self.node(name, NodeKind::Literal(value))
    }

    fn nary(&mut self, name: &str, op: NaryOp, operands: &[NodeId]) -> Result<NodeId, IrError> {
        match operands {
            [single] => Ok(*single),
            _ => self.node(
                name,
                NodeKind::Nary {
                    op,
                    operands: operands.to_vec(),
                },
            ),
        }
    }

    fn binary(&mut self, name: &str, op: BinOp, lhs: NodeId, rhs: NodeId) -> Result<NodeId, IrError> {
        self.node(name, NodeKind::Binary { op, lhs, rhs })
    }

    /// `if flag { then } else { otherwise }`.
    fn choose(&mut self, name: &str, flag: NodeId, otherwise: NodeId, then: NodeId) -> Result<NodeId, IrError> {
        self.node(
            name,
            NodeKind::Sel {
                selector: flag,
                cases: vec![otherwise, then],
                default: None,
            },
        )
    }

    /// Receive on `channel` and return the payload, advancing the token.
    fn receive(&mut self, name: &str, predicate: Option<NodeId>, channel: ChannelId) -> Result<NodeId, IrError> {
        let recv = self.node(
            name,
            NodeKind::Receive {
                token: self.tok,
                predicate,
                channel,
            },
        )?;
        self.tok = self.node(&format!("{name}_tok"), NodeKind::TupleIndex { tuple: recv, index: 0 })?;
        self.node(&format!("{name}_data"), NodeKind::TupleIndex { tuple: recv, index: 1 })
    }

    fn send(&mut self, name: &str, data: NodeId, predicate: Option<NodeId>, channel: ChannelId) -> Result<(), IrError> {
        self.tok = self.node(
            name,
            NodeKind::Send {
                token: self.tok,
                data,
                predicate,
                channel,
            },
        )?;
        Ok(())
    }

    /// `assert(!(valid && (conflicting...)))`, labelled `<ch>__<kind>_<turn>`.
    fn check(
        &mut self,
        shape: &AdapterShape,
        check: RuntimeCheck,
        turn: usize,
        valid: NodeId,
        conflicting: &[NodeId],
    ) -> Result<(), IrError> {
        let (channel, side) = (shape.base, shape.side);
        let (kind, message) = match check {
            RuntimeCheck::Ordering => (
                "ordering",
                format!("channel `{channel}` {side} operation fired out of turn (runtime ordering violation)"),
            ),
            _ => (
                "exclusivity",
                format!("channel `{channel}` {side} predicate was not mutually exclusive"),
            ),
        };
        let earlier = self.nary(&format!("{kind}_{turn}_earlier"), NaryOp::Or, conflicting)?;
        let both = self.nary(&format!("{kind}_{turn}_conflict"), NaryOp::And, &[valid, earlier])?;
        let ok = self.node(&format!("{kind}_{turn}_ok"), NodeKind::Not(both))?;
        self.tok = self.node(
            &format!("{kind}_{turn}"),
            NodeKind::Assert {
                token: self.tok,
                condition: ok,
                message,
                label: format!("{channel}__{kind}_{turn}"),
            },
        )?;
        Ok(())
    }

    /// Move one payload between the original channel and the private
    /// channel of whichever site is valid. `valids` are zero for every site
    /// not served this activation.
    fn forward(&mut self, shape: &AdapterShape, sites: &[Site], valids: &[NodeId]) -> Result<(), IrError> {
        let any = self.nary("serve", NaryOp::Or, valids)?;
        match shape.side {
            ChannelSide::Receive => {
                let data = self.receive("fwd_recv", Some(any), shape.channel)?;
                for (i, (site, valid)) in sites.iter().zip(valids).enumerate() {
                    self.send(&format!("fwd_send_{i}"), data, Some(*valid), site.payload)?;
                }
            }
            ChannelSide::Send => {
                let mut data: Option<NodeId> = None;
                for (i, (site, valid)) in sites.iter().zip(valids).enumerate() {
                    let d = self.receive(&format!("fwd_recv_{i}"), Some(*valid), site.payload)?;
                    data = Some(match data {
                        None => d,
                        Some(prev) => self.choose(&format!("fwd_pick_{i}"), *valid, prev, d)?,
                    });
                }
                if let Some(data) = data {
                    self.send("fwd_send", data, Some(any), shape.channel)?;
                }
            }
        }
        Ok(())
    }
}

fn counter_width(n: usize) -> u32 {
    let mut width = 1;
    while (1usize << width) < n {
        width += 1;
    }
    width
}

/// Wrapping increment of a counter state element that cycles through `n`.
fn advance(e: &mut Emitter, name: &str, counter: NodeId, width: u32, n: usize) -> Result<(NodeId, NodeId), IrError> {
    let last_value = e.literal(&format!("{name}_last_value"), Value::bits(width, (n - 1) as u64))?;
    let last = e.binary(&format!("{name}_is_last"), BinOp::Eq, counter, last_value)?;
    let one = e.literal(&format!("{name}_one"), Value::bits(width, 1))?;
    let bumped = e.binary(&format!("{name}_bumped"), BinOp::Add, counter, one)?;
    let zero = e.literal(&format!("{name}_zero"), Value::bits(width, 0))?;
    let next = e.choose(&format!("{name}_next"), last, bumped, zero)?;
    Ok((next, last))
}

/// One turn of the reference order per activation.
fn build_ordered(
    package: &mut Package,
    name: &str,
    shape: &AdapterShape,
    sites: &[Site],
    order: &ChannelOrder,
    check: RuntimeCheck,
) -> Result<(), IrError> {
    let n = sites.len();
    let width = counter_width(n);

    // Earlier turns each ordering check watches: not token-ordered before it.
    let mut watched: Vec<Vec<usize>> = vec![Vec::new(); n];
    if check == RuntimeCheck::Ordering {
        for (turn, list) in watched.iter_mut().enumerate() {
            *list = (0..turn)
                .filter(|&j| !order.before[order.reference_order[j]][order.reference_order[turn]])
                .collect();
        }
    }
    let mut tracked: Vec<usize> = watched.iter().flatten().copied().collect();
    tracked.sort_unstable();
    tracked.dedup();

    let mut state = vec![("turn".to_string(), Type::Bits(width), Value::bits(width, 0))];
    for j in &tracked {
        state.push((format!("seen_{j}"), Type::Bits(1), Value::bool(false)));
    }
    let adapter = package.add_proc(Proc::new(name, "tok", state))?;
    let params = package.proc(adapter).state_params().to_vec();
    let turn_state = params[0];
    let seen = |j: usize| tracked.iter().position(|t| *t == j).map(|i| params[i + 1]);

    let tok = package.proc(adapter).token_param();
    let mut e = Emitter {
        package,
        proc: adapter,
        tok,
    };

    let mut valids = Vec::with_capacity(n);
    for (i, site) in sites.iter().enumerate() {
        let index = e.literal(&format!("turn_{i}"), Value::bits(width, i as u64))?;
        let current = e.binary(&format!("turn_is_{i}"), BinOp::Eq, turn_state, index)?;
        valids.push(e.receive(&format!("req_{i}"), Some(current), site.request)?);
    }

    for (turn, list) in watched.iter().enumerate() {
        let conflicting: Vec<NodeId> = list.iter().filter_map(|j| seen(*j)).collect();
        if !conflicting.is_empty() {
            e.check(shape, check, turn, valids[turn], &conflicting)?;
        }
    }

    e.forward(shape, sites, &valids)?;

    let (next_turn, round_done) = advance(&mut e, "turn", turn_state, width, n)?;
    let mut next_state = vec![next_turn];
    if !tracked.is_empty() {
        let cleared = e.literal("seen_cleared", Value::bool(false))?;
        for j in &tracked {
            let Some(prev) = seen(*j) else { continue };
            let marked = e.nary(&format!("seen_{j}_marked"), NaryOp::Or, &[prev, valids[*j]])?;
            next_state.push(e.choose(&format!("seen_{j}_next"), round_done, marked, cleared)?);
        }
    }

    let tok = e.tok;
    let proc = package.proc_mut(adapter);
    proc.next_token = tok;
    proc.next_state = next_state;
    Ok(())
}

/// Every request of a phase is checked before the single forward.
fn build_exclusive(
    package: &mut Package,
    name: &str,
    shape: &AdapterShape,
    sites: &[Site],
    phases: &[usize],
) -> Result<(), IrError> {
    let rounds = phases.iter().max().map_or(1, |p| p + 1);
    let width = counter_width(rounds);
    let state = if rounds > 1 {
        vec![
            ("phase".to_string(), Type::Bits(width), Value::bits(width, 0)),
            ("seen".to_string(), Type::Bits(1), Value::bool(false)),
        ]
    } else {
        Vec::new()
    };
    let adapter = package.add_proc(Proc::new(name, "tok", state))?;
    let params = package.proc(adapter).state_params().to_vec();

    let tok = package.proc(adapter).token_param();
    let mut e = Emitter {
        package,
        proc: adapter,
        tok,
    };

    let mut valids = Vec::with_capacity(sites.len());
    for (i, site) in sites.iter().enumerate() {
        let predicate = match params.first() {
            Some(&phase) => {
                let index = e.literal(&format!("phase_{i}"), Value::bits(width, phases[i] as u64))?;
                Some(e.binary(&format!("phase_is_{i}"), BinOp::Eq, phase, index)?)
            }
            None => None,
        };
        valids.push(e.receive(&format!("req_{i}"), predicate, site.request)?);
    }

    for (i, phase) in phases.iter().enumerate() {
        let mut conflicting = valids[..i].to_vec();
        if *phase > 0 {
            conflicting.extend(params.get(1).copied());
        }
        if !conflicting.is_empty() {
            e.check(shape, RuntimeCheck::Exclusivity, i, valids[i], &conflicting)?;
        }
    }

    e.forward(shape, sites, &valids)?;

    let mut next_state = Vec::new();
    if let [phase, seen] = params[..] {
        let (next_phase, round_done) = advance(&mut e, "phase", phase, width, rounds)?;
        let fired = e.nary("fired", NaryOp::Or, &valids)?;
        let marked = e.nary("seen_marked", NaryOp::Or, &[seen, fired])?;
        let cleared = e.literal("seen_cleared", Value::bool(false))?;
        next_state.push(next_phase);
        next_state.push(e.choose("seen_next", round_done, marked, cleared)?);
    }

    let tok = e.tok;
    let proc = package.proc_mut(adapter);
    proc.next_token = tok;
    proc.next_state = next_state;
    Ok(())
}
