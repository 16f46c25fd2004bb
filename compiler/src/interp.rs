// interp.rs — Serial execution engine for proc networks
//
// Every channel is an unbounded FIFO. Procs are evaluated in package order;
// within one tick each proc runs until it blocks on an empty channel or
// finishes one activation, and sweeps repeat while any proc makes progress.
// A blocked activation keeps its evaluated values and resumes at the
// blocked receive, so effects already performed are never repeated.
//
// Preconditions: the package verifies.
// Postconditions: queue contents reflect every completed send in order.
// Failure modes: `RuntimeError` on failed asserts (abort), exhausted tick
//   budgets or no possible progress (deadline), and misuse of the queues.
// Side effects: none outside the runtime.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::id::{ChannelId, NodeId};
use crate::ir::{mask, BinOp, NaryOp, NodeKind, Package, Proc, Type, Value};

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("assertion `{label}` failed in proc `{proc_name}`: {message}")]
    AssertionFailed {
        proc_name: String,
        label: String,
        message: String,
    },
    #[error("deadline exceeded after {ticks} tick(s). Blocked channels: {}", blocked_list(.blocked))]
    DeadlineExceeded { ticks: usize, blocked: Vec<String> },
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("channel `{channel}` carries {expected} but was given a {found}")]
    TypeMismatch {
        channel: String,
        expected: Type,
        found: Type,
    },
    #[error("proc `{proc_name}` cannot be evaluated: {message}")]
    Malformed { proc_name: String, message: String },
}

fn blocked_list(blocked: &[String]) -> String {
    if blocked.is_empty() {
        "none".to_string()
    } else {
        blocked.join(", ")
    }
}

/// Coarse category of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// An ordered adapter saw an operation fire out of turn.
    OrderingViolation,
    /// An exclusive adapter saw two operations fire together.
    ExclusivityViolation,
    /// Any other failed assert.
    Assertion,
    /// The expected outputs never appeared.
    DeadlineExceeded,
    /// The runtime was driven incorrectly.
    Usage,
}

impl RuntimeError {
    pub fn kind(&self) -> RuntimeErrorKind {
        match self {
            RuntimeError::AssertionFailed { label, .. } if label.contains("__ordering_") => {
                RuntimeErrorKind::OrderingViolation
            }
            RuntimeError::AssertionFailed { label, .. } if label.contains("__exclusivity_") => {
                RuntimeErrorKind::ExclusivityViolation
            }
            RuntimeError::AssertionFailed { .. } => RuntimeErrorKind::Assertion,
            RuntimeError::DeadlineExceeded { .. } => RuntimeErrorKind::DeadlineExceeded,
            RuntimeError::UnknownChannel(_)
            | RuntimeError::TypeMismatch { .. }
            | RuntimeError::Malformed { .. } => RuntimeErrorKind::Usage,
        }
    }
}

// ── Channel queues ─────────────────────────────────────────────────────────

/// Unbounded FIFO backing one channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    id: ChannelId,
    name: String,
    ty: Type,
    values: VecDeque<Value>,
}

impl ChannelQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn write(&mut self, value: Value) -> Result<(), RuntimeError> {
        let found = value.ty();
        if found != self.ty {
            return Err(RuntimeError::TypeMismatch {
                channel: self.name.clone(),
                expected: self.ty.clone(),
                found,
            });
        }
        self.values.push_back(value);
        Ok(())
    }

    pub fn read(&mut self) -> Option<Value> {
        self.values.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// All channel queues of a package, in channel declaration order.
#[derive(Debug, Clone)]
pub struct QueueManager {
    queues: Vec<ChannelQueue>,
}

impl QueueManager {
    pub fn new(package: &Package) -> Self {
        let queues = package
            .channels
            .iter()
            .map(|c| ChannelQueue {
                id: c.id,
                name: c.name.clone(),
                ty: c.ty.clone(),
                values: VecDeque::new(),
            })
            .collect();
        Self { queues }
    }

    pub fn queue_by_name(&mut self, name: &str) -> Result<&mut ChannelQueue, RuntimeError> {
        self.queues
            .iter_mut()
            .find(|q| q.name == name)
            .ok_or_else(|| RuntimeError::UnknownChannel(name.to_string()))
    }

    pub fn len_of(&self, name: &str) -> Result<usize, RuntimeError> {
        self.queues
            .iter()
            .find(|q| q.name == name)
            .map(ChannelQueue::len)
            .ok_or_else(|| RuntimeError::UnknownChannel(name.to_string()))
    }

    fn by_id(&mut self, id: ChannelId) -> Option<&mut ChannelQueue> {
        self.queues.iter_mut().find(|q| q.id == id)
    }

    fn name_of(&self, id: ChannelId) -> String {
        self.queues
            .iter()
            .find(|q| q.id == id)
            .map(|q| q.name.clone())
            .unwrap_or_else(|| format!("#{}", id.0))
    }
}

// ── Runtime ────────────────────────────────────────────────────────────────

/// A partially evaluated activation.
#[derive(Debug, Clone, Default)]
struct Activation {
    values: HashMap<NodeId, Value>,
    /// Index into the proc's order of the next node to evaluate.
    pc: usize,
}

#[derive(Debug, Clone)]
struct ProcState {
    state: Vec<Value>,
    activation: Option<Activation>,
    completed: u64,
}

enum Step {
    Completed,
    Blocked { channel: ChannelId, advanced: bool },
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Some proc evaluated at least one node.
    pub progress: bool,
    /// Channels that procs are waiting on at the end of the tick, sorted.
    pub blocked: Vec<String>,
}

/// Evaluates a package's procs one after another, tick by tick.
#[derive(Debug, Clone)]
pub struct SerialProcRuntime {
    package: Package,
    queues: QueueManager,
    procs: Vec<ProcState>,
    ticks: usize,
}

impl SerialProcRuntime {
    pub fn new(package: Package) -> Self {
        let queues = QueueManager::new(&package);
        let procs = package
            .procs
            .iter()
            .map(|p| ProcState {
                state: p.init.clone(),
                activation: None,
                completed: 0,
            })
            .collect();
        Self {
            package,
            queues,
            procs,
            ticks: 0,
        }
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn queues_mut(&mut self) -> &mut QueueManager {
        &mut self.queues
    }

    /// Ticks run since construction.
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    /// Completed activations of `proc_name`, if it exists.
    pub fn activations(&self, proc_name: &str) -> Option<u64> {
        self.package
            .proc_by_name(proc_name)
            .map(|id| self.procs[id.index()].completed)
    }

    /// Advance every proc by at most one activation.
    pub fn tick(&mut self) -> Result<TickReport, RuntimeError> {
        self.ticks += 1;
        let n = self.procs.len();
        let mut done = vec![false; n];
        let mut waiting: Vec<Option<ChannelId>> = vec![None; n];
        let mut progress = false;

        loop {
            let mut swept = false;
            for p in 0..n {
                if done[p] {
                    continue;
                }
                match self.step(p)? {
                    Step::Completed => {
                        done[p] = true;
                        waiting[p] = None;
                        swept = true;
                    }
                    Step::Blocked { channel, advanced } => {
                        waiting[p] = Some(channel);
                        swept |= advanced;
                    }
                }
            }
            progress |= swept;
            if !swept {
                break;
            }
        }

        let mut blocked: Vec<String> = waiting
            .into_iter()
            .flatten()
            .map(|c| self.queues.name_of(c))
            .collect();
        blocked.sort();
        blocked.dedup();
        log::trace!("tick {}: progress={} blocked={:?}", self.ticks, progress, blocked);
        Ok(TickReport { progress, blocked })
    }

    /// Tick until every `(channel, count)` queue holds at least `count`
    /// values. Returns the number of ticks taken.
    pub fn tick_until_output(
        &mut self,
        outputs: &[(&str, usize)],
        max_ticks: usize,
    ) -> Result<usize, RuntimeError> {
        let mut ticks = 0;
        let mut blocked = Vec::new();
        loop {
            let mut satisfied = true;
            for (name, count) in outputs {
                satisfied &= self.queues.len_of(name)? >= *count;
            }
            if satisfied {
                return Ok(ticks);
            }
            if ticks >= max_ticks {
                return Err(RuntimeError::DeadlineExceeded { ticks, blocked });
            }
            let report = self.tick()?;
            ticks += 1;
            blocked = report.blocked;
            if !report.progress {
                log::debug!("no progress possible after {} tick(s)", ticks);
                return Err(RuntimeError::DeadlineExceeded { ticks, blocked });
            }
        }
    }

    fn step(&mut self, p: usize) -> Result<Step, RuntimeError> {
        let proc = &self.package.procs[p];
        let state = &mut self.procs[p];
        let mut act = state.activation.take().unwrap_or_default();
        let start = act.pc;

        while act.pc < proc.order.len() {
            let id = proc.order[act.pc];
            match eval_node(proc, id, &act.values, &state.state, &mut self.queues)? {
                Some(v) => {
                    act.values.insert(id, v);
                    act.pc += 1;
                }
                None => {
                    let channel = match proc.node(id).kind.channel() {
                        Some((c, _)) => c,
                        None => return Err(malformed(proc, "blocked on a non-receive")),
                    };
                    let advanced = act.pc > start;
                    state.activation = Some(act);
                    return Ok(Step::Blocked { channel, advanced });
                }
            }
        }

        let mut next = Vec::with_capacity(proc.next_state.len());
        for id in &proc.next_state {
            next.push(lookup(proc, &act.values, *id)?);
        }
        state.state = next;
        state.completed += 1;
        Ok(Step::Completed)
    }
}

fn malformed(proc: &Proc, message: impl Into<String>) -> RuntimeError {
    RuntimeError::Malformed {
        proc_name: proc.name.clone(),
        message: message.into(),
    }
}

fn lookup(proc: &Proc, values: &HashMap<NodeId, Value>, id: NodeId) -> Result<Value, RuntimeError> {
    values
        .get(&id)
        .cloned()
        .ok_or_else(|| malformed(proc, format!("`{}` used before evaluation", proc.node(id).name)))
}

fn bits_of(proc: &Proc, values: &HashMap<NodeId, Value>, id: NodeId) -> Result<(u32, u64), RuntimeError> {
    match lookup(proc, values, id)? {
        Value::Bits { width, value } => Ok((width, value)),
        other => Err(malformed(proc, format!("expected bits, found {}", other.ty()))),
    }
}

/// Evaluate one node. `Ok(None)` means a receive found its channel empty.
fn eval_node(
    proc: &Proc,
    id: NodeId,
    values: &HashMap<NodeId, Value>,
    state: &[Value],
    queues: &mut QueueManager,
) -> Result<Option<Value>, RuntimeError> {
    let node = proc.node(id);
    let fires = |predicate: &Option<NodeId>| -> Result<bool, RuntimeError> {
        match predicate {
            Some(p) => Ok(lookup(proc, values, *p)?.is_true()),
            None => Ok(true),
        }
    };

    let value = match &node.kind {
        NodeKind::Param { index: 0 } => Value::Token,
        NodeKind::Param { index } => state
            .get(index - 1)
            .cloned()
            .ok_or_else(|| malformed(proc, "state parameter out of range"))?,
        NodeKind::Literal(v) => v.clone(),
        NodeKind::Receive {
            predicate, channel, ..
        } => {
            let queue = queues
                .by_id(*channel)
                .ok_or_else(|| malformed(proc, format!("unknown channel id {}", channel.0)))?;
            let data = if fires(predicate)? {
                match queue.read() {
                    Some(v) => v,
                    None => return Ok(None),
                }
            } else {
                queue.ty().zero_value()
            };
            Value::Tuple(vec![Value::Token, data])
        }
        NodeKind::Send {
            data,
            predicate,
            channel,
            ..
        } => {
            if fires(predicate)? {
                let v = lookup(proc, values, *data)?;
                queues
                    .by_id(*channel)
                    .ok_or_else(|| malformed(proc, format!("unknown channel id {}", channel.0)))?
                    .write(v)?;
            }
            Value::Token
        }
        NodeKind::AfterAll(_) => Value::Token,
        NodeKind::Tuple(elems) => Value::Tuple(
            elems
                .iter()
                .map(|e| lookup(proc, values, *e))
                .collect::<Result<_, _>>()?,
        ),
        NodeKind::TupleIndex { tuple, index } => match lookup(proc, values, *tuple)? {
            Value::Tuple(elems) => elems
                .get(*index)
                .cloned()
                .ok_or_else(|| malformed(proc, "tuple index out of range"))?,
            _ => return Err(malformed(proc, "tuple_index of a non-tuple")),
        },
        NodeKind::Not(x) => {
            let (w, v) = bits_of(proc, values, *x)?;
            Value::bits(w, !v & mask(w))
        }
        NodeKind::Nary { op, operands } => {
            let mut acc: Option<(u32, u64)> = None;
            for o in operands {
                let (w, v) = bits_of(proc, values, *o)?;
                acc = Some(match acc {
                    None => (w, v),
                    Some((_, a)) => (
                        w,
                        match op {
                            NaryOp::And => a & v,
                            NaryOp::Or => a | v,
                            NaryOp::Xor => a ^ v,
                        },
                    ),
                });
            }
            let (w, v) = acc.ok_or_else(|| malformed(proc, "n-ary op without operands"))?;
            Value::bits(w, v)
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let (w, a) = bits_of(proc, values, *lhs)?;
            let (_, b) = bits_of(proc, values, *rhs)?;
            match op {
                BinOp::Add => Value::bits(w, a.wrapping_add(b)),
                BinOp::Sub => Value::bits(w, a.wrapping_sub(b)),
                BinOp::Eq => Value::bool(a == b),
                BinOp::Ne => Value::bool(a != b),
                BinOp::Ult => Value::bool(a < b),
                BinOp::Ule => Value::bool(a <= b),
                BinOp::Ugt => Value::bool(a > b),
                BinOp::Uge => Value::bool(a >= b),
            }
        }
        NodeKind::BitSlice {
            operand,
            start,
            width,
        } => {
            let (_, v) = bits_of(proc, values, *operand)?;
            let shifted = v.checked_shr(*start).unwrap_or(0);
            Value::bits(*width, shifted)
        }
        NodeKind::Sel {
            selector,
            cases,
            default,
        } => {
            let (_, s) = bits_of(proc, values, *selector)?;
            let chosen = usize::try_from(s)
                .ok()
                .and_then(|i| cases.get(i))
                .copied()
                .or(*default)
                .ok_or_else(|| malformed(proc, "sel selector out of range without default"))?;
            lookup(proc, values, chosen)?
        }
        NodeKind::Assert {
            condition,
            message,
            label,
            ..
        } => {
            if !lookup(proc, values, *condition)?.is_true() {
                log::debug!("assert `{}` failed in `{}`", label, proc.name);
                return Err(RuntimeError::AssertionFailed {
                    proc_name: proc.name.clone(),
                    label: label.clone(),
                    message: message.clone(),
                });
            }
            Value::Token
        }
    };
    Ok(Some(value))
}
