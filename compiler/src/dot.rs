// dot.rs — Graphviz DOT output for proc networks
//
// Renders each proc as a cluster of its side-effecting operations linked by
// token dependencies, and each channel as a shared node connecting the
// sends that feed it to the receives that drain it.
//
// Preconditions: `package` verifies.
// Postconditions: returns a valid DOT string representing the package.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::ir::{Channel, ChannelSide, NodeKind, Package};
use crate::strictness::Strictness;
use crate::token_order::{EffectKind, TokenGraph};

/// Emit the package as a Graphviz DOT string.
pub fn emit_dot(package: &Package) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(&package.name)).unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    for proc in &package.procs {
        let p = sanitize(&proc.name);
        let graph = TokenGraph::build(proc);
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_{p} {{").unwrap();
        let top = if package.top.as_deref() == Some(proc.name.as_str()) {
            " (top)"
        } else {
            ""
        };
        writeln!(buf, "        label=\"proc: {}{top}\";", proc.name).unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();

        for effect in graph.effects() {
            let node = proc.node(effect.node);
            let (shape, color) = match effect.kind {
                EffectKind::Root => ("point", "black"),
                EffectKind::Receive => ("box", "lightblue"),
                EffectKind::Send => ("box", "lightsalmon"),
                EffectKind::Assert => ("octagon", "lightpink"),
                EffectKind::Join => ("diamond", "lightyellow"),
            };
            let predicated = if node.kind.predicate().is_some() {
                ", peripheries=2"
            } else {
                ""
            };
            writeln!(
                buf,
                "        {p}_n{} [shape={shape}, style=filled, fillcolor={color}{predicated}, label=\"{}\"];",
                node.id.0,
                effect_label(package, &node.name, &node.kind),
            )
            .unwrap();
        }
        for effect in graph.effects() {
            for succ in &effect.succs {
                writeln!(
                    buf,
                    "        {p}_n{} -> {p}_n{};",
                    effect.node.0,
                    graph.effect(*succ).node.0
                )
                .unwrap();
            }
        }
        writeln!(buf, "    }}").unwrap();
    }

    // Channels and the operations that touch them (outside any cluster)
    if !package.channels.is_empty() {
        writeln!(buf).unwrap();
        writeln!(buf, "    // Channels").unwrap();
    }
    for channel in &package.channels {
        let c = channel_node_id(channel);
        writeln!(
            buf,
            "    {c} [shape=cylinder, style=filled, fillcolor={}, label=\"{}\\n{}\"];",
            strictness_color(channel.strictness),
            channel.name,
            channel.strictness.as_str(),
        )
        .unwrap();
        for side in channel.sides() {
            for op in package.channel_ops(channel.id, *side) {
                let p = sanitize(&package.proc(op.proc).name);
                match side {
                    ChannelSide::Send => {
                        writeln!(buf, "    {p}_n{} -> {c} [style=dashed];", op.node.0).unwrap()
                    }
                    ChannelSide::Receive => {
                        writeln!(buf, "    {c} -> {p}_n{} [style=dashed];", op.node.0).unwrap()
                    }
                }
            }
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn channel_node_id(channel: &Channel) -> String {
    format!("chan_{}", channel.id.0)
}

fn effect_label(package: &Package, name: &str, kind: &NodeKind) -> String {
    match kind.channel() {
        Some((id, side)) => {
            let channel = package.channel(id).map(|c| c.name.as_str()).unwrap_or("?");
            let arrow = match side {
                ChannelSide::Send => "->",
                ChannelSide::Receive => "<-",
            };
            format!("{name}\\n{arrow}{channel}")
        }
        None => name.to_string(),
    }
}

fn strictness_color(strictness: Strictness) -> &'static str {
    match strictness {
        Strictness::ProvenMutuallyExclusive => "white",
        Strictness::TotalOrder => "lightgreen",
        Strictness::RuntimeMutuallyExclusive | Strictness::RuntimeOrdered => "khaki",
        Strictness::ArbitraryStaticOrder => "lightgray",
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
