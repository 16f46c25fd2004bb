// printer.rs — Canonical textual form of a package
//
// Emits the same syntax the parser accepts: channels first in declaration
// order, then procs in package order with their live nodes in topological
// order. Parameters appear only in the proc header.
//
// Preconditions: every channel id referenced by a node exists in the package.
// Postconditions: `parse_package(print(p))` rebuilds an equivalent package,
//   and printing it again yields identical text.
// Failure modes: none.
// Side effects: none.

use std::fmt::{self, Write as _};

use crate::id::{ChannelId, NodeId};
use crate::ir::{Channel, NodeKind, Package, Proc};
use crate::lexer::escape_string;

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "package {}", self.name)?;
        if !self.channels.is_empty() {
            writeln!(f)?;
        }
        for channel in &self.channels {
            writeln!(f, "{}", channel_decl(channel))?;
        }
        for proc in &self.procs {
            writeln!(f)?;
            self.fmt_proc(proc, f)?;
        }
        Ok(())
    }
}

impl Package {
    fn fmt_proc(&self, proc: &Proc, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.top.as_deref() == Some(proc.name.as_str()) {
            write!(f, "top ")?;
        }
        write!(f, "proc {}(", proc.name)?;
        for id in &proc.params {
            let node = proc.node(*id);
            write!(f, "{}: {}, ", node.name, node.ty)?;
        }
        let init: Vec<String> = proc.init.iter().map(|v| v.to_string()).collect();
        writeln!(f, "init={{{}}}) {{", init.join(", "))?;

        for node in proc.live_nodes() {
            if matches!(node.kind, NodeKind::Param { .. }) {
                continue;
            }
            writeln!(
                f,
                "  {}: {} = {}",
                node.name,
                node.ty,
                self.op_text(proc, &node.kind)
            )?;
        }

        let next: Vec<&str> = std::iter::once(proc.next_token)
            .chain(proc.next_state.iter().copied())
            .map(|id| proc.node(id).name.as_str())
            .collect();
        writeln!(f, "  next({})", next.join(", "))?;
        writeln!(f, "}}")
    }

    fn op_text(&self, proc: &Proc, kind: &NodeKind) -> String {
        let name = |id: NodeId| proc.node(id).name.clone();
        let list = |ids: &[NodeId]| ids.iter().map(|id| name(*id)).collect::<Vec<_>>().join(", ");
        let chan = |id: ChannelId| {
            self.channel(id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| format!("__unknown_channel_{}", id.0))
        };

        let mut out = String::new();
        out.push_str(kind.op_name());
        out.push('(');
        // `write!` into a String cannot fail.
        let _ = match kind {
            NodeKind::Param { .. } => Ok(()),
            NodeKind::Literal(v) => write!(out, "value={v}"),
            NodeKind::Receive {
                token,
                predicate,
                channel,
            } => {
                let _ = write!(out, "{}", name(*token));
                if let Some(p) = predicate {
                    let _ = write!(out, ", predicate={}", name(*p));
                }
                write!(out, ", channel={}", chan(*channel))
            }
            NodeKind::Send {
                token,
                data,
                predicate,
                channel,
            } => {
                let _ = write!(out, "{}, {}", name(*token), name(*data));
                if let Some(p) = predicate {
                    let _ = write!(out, ", predicate={}", name(*p));
                }
                write!(out, ", channel={}", chan(*channel))
            }
            NodeKind::AfterAll(ops) | NodeKind::Tuple(ops) => write!(out, "{}", list(ops)),
            NodeKind::Nary { operands, .. } => write!(out, "{}", list(operands)),
            NodeKind::TupleIndex { tuple, index } => {
                write!(out, "{}, index={index}", name(*tuple))
            }
            NodeKind::Not(x) => write!(out, "{}", name(*x)),
            NodeKind::Binary { lhs, rhs, .. } => write!(out, "{}, {}", name(*lhs), name(*rhs)),
            NodeKind::BitSlice {
                operand,
                start,
                width,
            } => write!(out, "{}, start={start}, width={width}", name(*operand)),
            NodeKind::Sel {
                selector,
                cases,
                default,
            } => {
                let _ = write!(out, "{}, cases=[{}]", name(*selector), list(cases));
                match default {
                    Some(d) => write!(out, ", default={}", name(*d)),
                    None => Ok(()),
                }
            }
            NodeKind::Assert {
                token,
                condition,
                message,
                label,
            } => write!(
                out,
                "{}, {}, message={}, label={}",
                name(*token),
                name(*condition),
                escape_string(message),
                escape_string(label)
            ),
        };
        out.push(')');
        out
    }
}

/// The `chan` line for one channel.
pub fn channel_decl(c: &Channel) -> String {
    format!(
        "chan {}({}, id={}, kind=streaming, ops={}, flow_control={}, strictness={}, metadata={})",
        c.name,
        c.ty,
        c.id.0,
        c.ops.as_str(),
        c.flow_control.as_str(),
        c.strictness,
        escape_string(&c.metadata)
    )
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_package;
    use crate::strictness::Strictness;

    const SOURCE: &str = r#"package test

chan in(bits[32], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=runtime_ordered, metadata="")
chan out(bits[32], id=1, kind=streaming, ops=send_only, flow_control=none, strictness=arbitrary_static_order, metadata="note \"x\"")

top proc p(tok: token, s: (bits[1], bits[2]), init={(1, 3)}) {
  r: (token, bits[32]) = receive(tok, channel=in)
  t: token = tuple_index(r, index=0)
  d: bits[32] = tuple_index(r, index=1)
  c: bits[1] = tuple_index(s, index=0)
  o: token = send(t, d, predicate=c, channel=out)
  ok: token = assert(o, c, message="must \\ hold", label="lbl")
  next(ok, s)
}
"#;

    #[test]
    fn print_is_canonical() {
        let pkg = parse_package(SOURCE).unwrap();
        assert_eq!(pkg.to_string(), SOURCE);
    }

    #[test]
    fn every_strictness_literal_round_trips() {
        for s in Strictness::ALL {
            let src = format!("package p\n\nchan c(bits[1], id=3, kind=streaming, ops=send_receive, flow_control=ready_valid, strictness={s}, metadata=\"\")\n");
            let pkg = parse_package(&src).unwrap();
            assert_eq!(pkg.channels[0].strictness, s);
            assert_eq!(pkg.to_string(), src);
        }
    }

    #[test]
    fn omitted_strictness_prints_default() {
        let pkg = parse_package("package p\nchan c(bits[4], id=0)").unwrap();
        assert!(pkg
            .to_string()
            .contains("strictness=proven_mutually_exclusive"));
    }
}
