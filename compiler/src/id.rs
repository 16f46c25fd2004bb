// id.rs — Stable identifiers and fresh-name generation for IR entities
//
// Handles are allocated once and never reused, so analyses can key on them
// across rewrites. Channel ids are the user-visible `id=` values from the
// textual IR; node and proc ids are arena positions.

use std::collections::HashSet;

use serde::Serialize;

/// Stable handle of a node within its proc's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

/// Declared identifier of a channel (`id=N` in the textual IR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(pub u32);

/// Position of a proc within its package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcId(pub u32);

impl ProcId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Produces names that do not collide with any name seen so far.
///
/// The first request for `base` returns `base` itself when it is free;
/// later requests append `_1`, `_2`, ... in allocation order, so the
/// generated names are deterministic for a given input package.
#[derive(Debug, Default, Clone)]
pub struct NameGenerator {
    used: HashSet<String>,
}

impl NameGenerator {
    pub fn new<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: existing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fresh(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{base}_{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }
}
