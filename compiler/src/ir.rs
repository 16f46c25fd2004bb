// ir.rs — Proc network IR: packages, channels, procs and the node arena
//
// A package owns channels and procs. Each proc owns an arena of nodes
// addressed by stable `NodeId` handles plus an `order` list of the live
// nodes in operands-before-users order. Nodes are added through `Package`
// so their result type is inferred against the package's channels.
//
// Preconditions: none.
// Postconditions: every node added via `Package::add_node` /
//   `insert_node_before` is well-typed with live operands.
// Failure modes: `IrError` on duplicate names, unknown channels, dead
//   operands or ill-typed operations.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::ast::Span;
use crate::id::{ChannelId, NameGenerator, NodeId, ProcId};
use crate::strictness::Strictness;

// ── Types and values ────────────────────────────────────────────────────

pub const MAX_BITS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bits(u32),
    Token,
    Tuple(Vec<Type>),
}

impl Type {
    pub fn contains_token(&self) -> bool {
        match self {
            Type::Token => true,
            Type::Bits(_) => false,
            Type::Tuple(elems) => elems.iter().any(Type::contains_token),
        }
    }

    pub fn zero_value(&self) -> Value {
        match self {
            Type::Bits(w) => Value::bits(*w, 0),
            Type::Token => Value::Token,
            Type::Tuple(elems) => Value::Tuple(elems.iter().map(Type::zero_value).collect()),
        }
    }

    pub fn is_bits(&self, width: u32) -> bool {
        *self == Type::Bits(width)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bits(w) => write!(f, "bits[{w}]"),
            Type::Token => write!(f, "token"),
            Type::Tuple(elems) => {
                write!(f, "(")?;
                for (i, t) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A runtime value. Bits values are always masked to their width.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Bits { width: u32, value: u64 },
    Token,
    Tuple(Vec<Value>),
}

pub(crate) fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Value {
    pub fn bits(width: u32, value: u64) -> Self {
        Value::Bits {
            width,
            value: value & mask(width),
        }
    }

    pub fn bool(b: bool) -> Self {
        Value::bits(1, b as u64)
    }

    pub fn ty(&self) -> Type {
        match self {
            Value::Bits { width, .. } => Type::Bits(*width),
            Value::Token => Type::Token,
            Value::Tuple(elems) => Type::Tuple(elems.iter().map(Value::ty).collect()),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Bits { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.as_u64().is_some_and(|v| v != 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bits { value, .. } => write!(f, "{value}"),
            Value::Token => write!(f, "token"),
            Value::Tuple(elems) => {
                write!(f, "(")?;
                for (i, v) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ── Channels ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOps {
    SendOnly,
    ReceiveOnly,
    SendReceive,
}

impl ChannelOps {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelOps::SendOnly => "send_only",
            ChannelOps::ReceiveOnly => "receive_only",
            ChannelOps::SendReceive => "send_receive",
        }
    }

    /// Whether procs may perform operations on `side` of such a channel.
    pub fn supports(self, side: ChannelSide) -> bool {
        matches!(
            (self, side),
            (ChannelOps::SendReceive, _)
                | (ChannelOps::SendOnly, ChannelSide::Send)
                | (ChannelOps::ReceiveOnly, ChannelSide::Receive)
        )
    }
}

impl FromStr for ChannelOps {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_only" => Ok(ChannelOps::SendOnly),
            "receive_only" => Ok(ChannelOps::ReceiveOnly),
            "send_receive" => Ok(ChannelOps::SendReceive),
            _ => Err(format!(
                "unknown channel ops '{s}' (expected send_only, receive_only or send_receive)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    ReadyValid,
    None,
}

impl FlowControl {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowControl::ReadyValid => "ready_valid",
            FlowControl::None => "none",
        }
    }
}

impl FromStr for FlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready_valid" => Ok(FlowControl::ReadyValid),
            "none" => Ok(FlowControl::None),
            _ => Err(format!(
                "unknown flow control '{s}' (expected ready_valid or none)"
            )),
        }
    }
}

/// One of the two endpoints of a channel, as seen by the procs using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSide {
    Send,
    Receive,
}

impl ChannelSide {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelSide::Send => "send",
            ChannelSide::Receive => "receive",
        }
    }
}

impl fmt::Display for ChannelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub ty: Type,
    pub ops: ChannelOps,
    pub flow_control: FlowControl,
    pub strictness: Strictness,
    pub metadata: String,
    pub span: Option<Span>,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>, ty: Type, ops: ChannelOps) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            ops,
            flow_control: FlowControl::ReadyValid,
            strictness: Strictness::default(),
            metadata: String::new(),
            span: None,
        }
    }

    pub fn sides(&self) -> &'static [ChannelSide] {
        match self.ops {
            ChannelOps::SendOnly => &[ChannelSide::Send],
            ChannelOps::ReceiveOnly => &[ChannelSide::Receive],
            ChannelOps::SendReceive => &[ChannelSide::Send, ChannelSide::Receive],
        }
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl BinOp {
    pub const ALL: [BinOp; 8] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Ult,
        BinOp::Ule,
        BinOp::Ugt,
        BinOp::Uge,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Ult => "ult",
            BinOp::Ule => "ule",
            BinOp::Ugt => "ugt",
            BinOp::Uge => "uge",
        }
    }

    pub fn is_comparison(self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub)
    }

    pub fn from_name(name: &str) -> Option<BinOp> {
        BinOp::ALL.into_iter().find(|op| op.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NaryOp {
    And,
    Or,
    Xor,
}

impl NaryOp {
    pub fn name(self) -> &'static str {
        match self {
            NaryOp::And => "and",
            NaryOp::Or => "or",
            NaryOp::Xor => "xor",
        }
    }

    pub fn from_name(name: &str) -> Option<NaryOp> {
        match name {
            "and" => Some(NaryOp::And),
            "or" => Some(NaryOp::Or),
            "xor" => Some(NaryOp::Xor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Proc parameter: index 0 is the token, the rest are state elements.
    Param { index: usize },
    Literal(Value),
    Receive {
        token: NodeId,
        predicate: Option<NodeId>,
        channel: ChannelId,
    },
    Send {
        token: NodeId,
        data: NodeId,
        predicate: Option<NodeId>,
        channel: ChannelId,
    },
    AfterAll(Vec<NodeId>),
    Tuple(Vec<NodeId>),
    TupleIndex { tuple: NodeId, index: usize },
    Not(NodeId),
    Nary { op: NaryOp, operands: Vec<NodeId> },
    Binary { op: BinOp, lhs: NodeId, rhs: NodeId },
    BitSlice { operand: NodeId, start: u32, width: u32 },
    Sel {
        selector: NodeId,
        cases: Vec<NodeId>,
        default: Option<NodeId>,
    },
    Assert {
        token: NodeId,
        condition: NodeId,
        message: String,
        label: String,
    },
}

impl NodeKind {
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Param { .. } | NodeKind::Literal(_) => Vec::new(),
            NodeKind::Receive {
                token, predicate, ..
            } => std::iter::once(*token).chain(*predicate).collect(),
            NodeKind::Send {
                token,
                data,
                predicate,
                ..
            } => [*token, *data].into_iter().chain(*predicate).collect(),
            NodeKind::AfterAll(ops) | NodeKind::Tuple(ops) => ops.clone(),
            NodeKind::Nary { operands, .. } => operands.clone(),
            NodeKind::TupleIndex { tuple, .. } => vec![*tuple],
            NodeKind::Not(x) => vec![*x],
            NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::BitSlice { operand, .. } => vec![*operand],
            NodeKind::Sel {
                selector,
                cases,
                default,
            } => std::iter::once(*selector)
                .chain(cases.iter().copied())
                .chain(*default)
                .collect(),
            NodeKind::Assert {
                token, condition, ..
            } => vec![*token, *condition],
        }
    }

    /// Rewrite every operand equal to `from` into `to`.
    pub fn replace_operand(&mut self, from: NodeId, to: NodeId) {
        let swap = |id: &mut NodeId| {
            if *id == from {
                *id = to;
            }
        };
        match self {
            NodeKind::Param { .. } | NodeKind::Literal(_) => {}
            NodeKind::Receive {
                token, predicate, ..
            } => {
                swap(token);
                predicate.iter_mut().for_each(swap);
            }
            NodeKind::Send {
                token,
                data,
                predicate,
                ..
            } => {
                swap(token);
                swap(data);
                predicate.iter_mut().for_each(swap);
            }
            NodeKind::AfterAll(ops) | NodeKind::Tuple(ops) => ops.iter_mut().for_each(swap),
            NodeKind::Nary { operands, .. } => operands.iter_mut().for_each(swap),
            NodeKind::TupleIndex { tuple, .. } => swap(tuple),
            NodeKind::Not(x) => swap(x),
            NodeKind::Binary { lhs, rhs, .. } => {
                swap(lhs);
                swap(rhs);
            }
            NodeKind::BitSlice { operand, .. } => swap(operand),
            NodeKind::Sel {
                selector,
                cases,
                default,
            } => {
                swap(selector);
                cases.iter_mut().for_each(swap);
                default.iter_mut().for_each(swap);
            }
            NodeKind::Assert {
                token, condition, ..
            } => {
                swap(token);
                swap(condition);
            }
        }
    }

    /// The channel and side this operation touches, if any.
    pub fn channel(&self) -> Option<(ChannelId, ChannelSide)> {
        match self {
            NodeKind::Receive { channel, .. } => Some((*channel, ChannelSide::Receive)),
            NodeKind::Send { channel, .. } => Some((*channel, ChannelSide::Send)),
            _ => None,
        }
    }

    pub fn predicate(&self) -> Option<NodeId> {
        match self {
            NodeKind::Receive { predicate, .. } | NodeKind::Send { predicate, .. } => *predicate,
            _ => None,
        }
    }

    /// Nodes that must survive dead-code elimination regardless of users.
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self,
            NodeKind::Param { .. }
                | NodeKind::Receive { .. }
                | NodeKind::Send { .. }
                | NodeKind::Assert { .. }
        )
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            NodeKind::Param { .. } => "param",
            NodeKind::Literal(_) => "literal",
            NodeKind::Receive { .. } => "receive",
            NodeKind::Send { .. } => "send",
            NodeKind::AfterAll(_) => "after_all",
            NodeKind::Tuple(_) => "tuple",
            NodeKind::TupleIndex { .. } => "tuple_index",
            NodeKind::Not(_) => "not",
            NodeKind::Nary { op, .. } => op.name(),
            NodeKind::Binary { op, .. } => op.name(),
            NodeKind::BitSlice { .. } => "bit_slice",
            NodeKind::Sel { .. } => "sel",
            NodeKind::Assert { .. } => "assert",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub ty: Type,
    pub span: Option<Span>,
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("duplicate channel name `{0}`")]
    DuplicateChannelName(String),
    #[error("duplicate channel id {0}")]
    DuplicateChannelId(u32),
    #[error("duplicate proc `{0}`")]
    DuplicateProc(String),
    #[error("duplicate node name `{name}` in proc `{proc_name}`")]
    DuplicateNode { proc_name: String, name: String },
    #[error("unknown channel id {0}")]
    UnknownChannel(u32),
    #[error("node `{name}` uses an operand that is not live in proc `{proc_name}`")]
    DeadOperand { proc_name: String, name: String },
    #[error("node `{name}`: {message}")]
    Type { name: String, message: String },
    #[error("parameters cannot be added as body nodes (`{0}`)")]
    ParamNode(String),
}

// ── Procs ───────────────────────────────────────────────────────────────

/// A proc: repeated activations threaded by a token, with persistent state.
#[derive(Debug, Clone, PartialEq)]
pub struct Proc {
    pub name: String,
    /// Parameter nodes: `params[0]` is the token, the rest are state.
    pub params: Vec<NodeId>,
    pub init: Vec<Value>,
    pub nodes: Vec<Node>,
    pub order: Vec<NodeId>,
    pub next_token: NodeId,
    pub next_state: Vec<NodeId>,
    pub span: Option<Span>,
}

impl Proc {
    /// A proc whose body is empty and whose `next` passes params through.
    pub fn new(
        name: impl Into<String>,
        token_param: impl Into<String>,
        state: Vec<(String, Type, Value)>,
    ) -> Self {
        let mut proc = Proc {
            name: name.into(),
            params: Vec::new(),
            init: Vec::new(),
            nodes: Vec::new(),
            order: Vec::new(),
            next_token: NodeId(0),
            next_state: Vec::new(),
            span: None,
        };
        let tok = proc.push_node(token_param.into(), NodeKind::Param { index: 0 }, Type::Token, None);
        proc.params.push(tok);
        proc.next_token = tok;
        for (i, (name, ty, init)) in state.into_iter().enumerate() {
            let id = proc.push_node(name, NodeKind::Param { index: i + 1 }, ty, None);
            proc.params.push(id);
            proc.init.push(init);
            proc.next_state.push(id);
        }
        proc
    }

    fn push_node(&mut self, name: String, kind: NodeKind, ty: Type, span: Option<Span>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            name,
            kind,
            ty,
            span,
        });
        self.order.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn token_param(&self) -> NodeId {
        self.params[0]
    }

    pub fn state_params(&self) -> &[NodeId] {
        &self.params[1..]
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.order.contains(&id)
    }

    /// Live nodes in topological order.
    pub fn live_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().map(move |id| self.node(*id))
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.live_nodes().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|n| *n == id)
    }

    /// Name generator seeded with every name ever used in this proc.
    pub fn names(&self) -> NameGenerator {
        NameGenerator::new(self.nodes.iter().map(|n| n.name.clone()))
    }

    /// Live nodes that take `id` as an operand.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        self.live_nodes()
            .filter(|n| n.kind.operands().contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Whether `id` feeds the proc's `next`.
    pub fn is_next_operand(&self, id: NodeId) -> bool {
        self.next_token == id || self.next_state.contains(&id)
    }

    pub fn replace_uses(&mut self, from: NodeId, to: NodeId) {
        let live = self.order.clone();
        for id in live {
            self.node_mut(id).kind.replace_operand(from, to);
        }
        if self.next_token == from {
            self.next_token = to;
        }
        for s in &mut self.next_state {
            if *s == from {
                *s = to;
            }
        }
    }

    /// Drop a node from the live order. Its handle is never reused.
    pub fn remove(&mut self, id: NodeId) {
        self.order.retain(|n| *n != id);
    }
}

// ── Package ─────────────────────────────────────────────────────────────

/// A reference to one channel operation within a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OpRef {
    pub proc: ProcId,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub channels: Vec<Channel>,
    pub procs: Vec<Proc>,
    pub top: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Vec::new(),
            procs: Vec::new(),
            top: None,
        }
    }

    pub fn add_channel(&mut self, channel: Channel) -> Result<ChannelId, IrError> {
        if self.channels.iter().any(|c| c.name == channel.name) {
            return Err(IrError::DuplicateChannelName(channel.name));
        }
        if self.channels.iter().any(|c| c.id == channel.id) {
            return Err(IrError::DuplicateChannelId(channel.id.0));
        }
        let id = channel.id;
        self.channels.push(channel);
        Ok(id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_by_name(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn next_channel_id(&self) -> ChannelId {
        ChannelId(self.channels.iter().map(|c| c.id.0 + 1).max().unwrap_or(0))
    }

    /// Name generator over channel and proc names, which share one namespace.
    pub fn global_names(&self) -> NameGenerator {
        NameGenerator::new(
            self.channels
                .iter()
                .map(|c| c.name.clone())
                .chain(self.procs.iter().map(|p| p.name.clone())),
        )
    }

    pub fn add_proc(&mut self, proc: Proc) -> Result<ProcId, IrError> {
        if self.procs.iter().any(|p| p.name == proc.name) {
            return Err(IrError::DuplicateProc(proc.name));
        }
        self.procs.push(proc);
        Ok(ProcId(self.procs.len() as u32 - 1))
    }

    pub fn proc(&self, id: ProcId) -> &Proc {
        &self.procs[id.index()]
    }

    pub fn proc_mut(&mut self, id: ProcId) -> &mut Proc {
        &mut self.procs[id.index()]
    }

    pub fn proc_by_name(&self, name: &str) -> Option<ProcId> {
        self.procs
            .iter()
            .position(|p| p.name == name)
            .map(|i| ProcId(i as u32))
    }

    pub fn node(&self, op: OpRef) -> &Node {
        self.proc(op.proc).node(op.node)
    }

    /// Append a node at the end of `proc`'s order.
    pub fn add_node(
        &mut self,
        proc: ProcId,
        name: &str,
        kind: NodeKind,
        span: Option<Span>,
    ) -> Result<NodeId, IrError> {
        let ty = self.check_new_node(proc, name, &kind)?;
        Ok(self.proc_mut(proc).push_node(name.to_string(), kind, ty, span))
    }

    /// Insert a node into `proc`'s order immediately before `anchor`.
    pub fn insert_node_before(
        &mut self,
        proc: ProcId,
        anchor: NodeId,
        name: &str,
        kind: NodeKind,
    ) -> Result<NodeId, IrError> {
        let ty = self.check_new_node(proc, name, &kind)?;
        let p = self.proc_mut(proc);
        let id = p.push_node(name.to_string(), kind, ty, None);
        p.order.pop();
        let at = p.position(anchor).unwrap_or(p.order.len());
        p.order.insert(at, id);
        Ok(id)
    }

    fn check_new_node(&self, proc: ProcId, name: &str, kind: &NodeKind) -> Result<Type, IrError> {
        let p = self.proc(proc);
        if matches!(kind, NodeKind::Param { .. }) {
            return Err(IrError::ParamNode(name.to_string()));
        }
        if p.node_by_name(name).is_some() {
            return Err(IrError::DuplicateNode {
                proc_name: p.name.clone(),
                name: name.to_string(),
            });
        }
        if kind.operands().iter().any(|o| !p.is_live(*o)) {
            return Err(IrError::DeadOperand {
                proc_name: p.name.clone(),
                name: name.to_string(),
            });
        }
        infer_type(p, &self.channels, name, kind)
    }

    /// Every operation on `channel`'s `side`, in discovery order
    /// (package proc order, then node order within each proc).
    pub fn channel_ops(&self, channel: ChannelId, side: ChannelSide) -> Vec<OpRef> {
        let mut ops = Vec::new();
        for (pi, proc) in self.procs.iter().enumerate() {
            for node in proc.live_nodes() {
                if node.kind.channel() == Some((channel, side)) {
                    ops.push(OpRef {
                        proc: ProcId(pi as u32),
                        node: node.id,
                    });
                }
            }
        }
        ops
    }
}

// ── Type inference ──────────────────────────────────────────────────────

/// Result type of `kind` given the types of its operands in `proc`.
pub fn infer_type(
    proc: &Proc,
    channels: &[Channel],
    name: &str,
    kind: &NodeKind,
) -> Result<Type, IrError> {
    let err = |message: String| IrError::Type {
        name: name.to_string(),
        message,
    };
    let ty = |id: NodeId| &proc.node(id).ty;
    let expect_bits1 = |id: NodeId, what: &str| -> Result<(), IrError> {
        if ty(id).is_bits(1) {
            Ok(())
        } else {
            Err(err(format!("{what} must be bits[1], found {}", ty(id))))
        }
    };
    let expect_token = |id: NodeId, what: &str| -> Result<(), IrError> {
        if *ty(id) == Type::Token {
            Ok(())
        } else {
            Err(err(format!("{what} must be a token, found {}", ty(id))))
        }
    };
    let channel_ty = |id: ChannelId| -> Result<&Type, IrError> {
        channels
            .iter()
            .find(|c| c.id == id)
            .map(|c| &c.ty)
            .ok_or(IrError::UnknownChannel(id.0))
    };

    match kind {
        NodeKind::Param { .. } => Err(IrError::ParamNode(name.to_string())),
        NodeKind::Literal(v) => {
            if v.ty().contains_token() {
                return Err(err("literals cannot contain tokens".into()));
            }
            Ok(v.ty())
        }
        NodeKind::Receive {
            token,
            predicate,
            channel,
        } => {
            expect_token(*token, "receive token")?;
            if let Some(p) = predicate {
                expect_bits1(*p, "predicate")?;
            }
            Ok(Type::Tuple(vec![Type::Token, channel_ty(*channel)?.clone()]))
        }
        NodeKind::Send {
            token,
            data,
            predicate,
            channel,
        } => {
            expect_token(*token, "send token")?;
            if let Some(p) = predicate {
                expect_bits1(*p, "predicate")?;
            }
            let payload = channel_ty(*channel)?;
            if ty(*data) != payload {
                return Err(err(format!(
                    "send data has type {} but the channel carries {payload}",
                    ty(*data)
                )));
            }
            Ok(Type::Token)
        }
        NodeKind::AfterAll(tokens) => {
            for t in tokens {
                expect_token(*t, "after_all operand")?;
            }
            Ok(Type::Token)
        }
        NodeKind::Tuple(elems) => Ok(Type::Tuple(elems.iter().map(|e| ty(*e).clone()).collect())),
        NodeKind::TupleIndex { tuple, index } => match ty(*tuple) {
            Type::Tuple(elems) => elems.get(*index).cloned().ok_or_else(|| {
                err(format!("tuple index {index} out of range for {}", ty(*tuple)))
            }),
            other => Err(err(format!("tuple_index operand must be a tuple, found {other}"))),
        },
        NodeKind::Not(x) => match ty(*x) {
            Type::Bits(w) => Ok(Type::Bits(*w)),
            other => Err(err(format!("not operand must be bits, found {other}"))),
        },
        NodeKind::Nary { op, operands } => {
            let first = operands
                .first()
                .ok_or_else(|| err(format!("{} needs at least one operand", op.name())))?;
            let t = ty(*first);
            if !matches!(t, Type::Bits(_)) {
                return Err(err(format!("{} operands must be bits, found {t}", op.name())));
            }
            if let Some(bad) = operands.iter().find(|o| ty(**o) != t) {
                return Err(err(format!(
                    "{} operands disagree: {t} vs {}",
                    op.name(),
                    ty(*bad)
                )));
            }
            Ok(t.clone())
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let (l, r) = (ty(*lhs), ty(*rhs));
            if !matches!(l, Type::Bits(_)) || l != r {
                return Err(err(format!("{} operands must be equal-width bits, found {l} and {r}", op.name())));
            }
            if op.is_comparison() {
                Ok(Type::Bits(1))
            } else {
                Ok(l.clone())
            }
        }
        NodeKind::BitSlice {
            operand,
            start,
            width,
        } => match ty(*operand) {
            Type::Bits(w) if *width >= 1 && start.saturating_add(*width) <= *w => Ok(Type::Bits(*width)),
            other => Err(err(format!(
                "bit_slice start={start} width={width} out of range for {other}"
            ))),
        },
        NodeKind::Sel {
            selector,
            cases,
            default,
        } => {
            let s = match ty(*selector) {
                Type::Bits(s) => *s,
                other => return Err(err(format!("sel selector must be bits, found {other}"))),
            };
            let first = cases
                .first()
                .ok_or_else(|| err("sel needs at least one case".into()))?;
            let t = ty(*first);
            if cases.iter().chain(default.iter()).any(|c| ty(*c) != t) {
                return Err(err("sel cases and default must share one type".into()));
            }
            let capacity = if s >= 32 { u64::MAX } else { 1u64 << s };
            let n = cases.len() as u64;
            if n > capacity {
                return Err(err(format!("sel has {n} cases but selector is bits[{s}]")));
            }
            if (n < capacity) != default.is_some() {
                return Err(err(
                    "sel needs a default exactly when the cases do not cover the selector".into(),
                ));
            }
            Ok(t.clone())
        }
        NodeKind::Assert {
            token, condition, ..
        } => {
            expect_token(*token, "assert token")?;
            expect_bits1(*condition, "assert condition")?;
            Ok(Type::Token)
        }
    }
}
