//! Structural deltas between two tagged snapshots.

mod format;

pub use format::DeltaFormatError;

use crate::tag::{Tagged, Tags, Token};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt::Display,
};

/// Largest table, in cells, that [`lcs`] may allocate. Longer unaligned
/// stretches skip alignment: every item in them is removed, inserted or
/// moved.
const MAX_LCS_CELLS: usize = 1 << 22;

/// Change to one node of a state tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    /// The node did not exist before.
    Added(Value),
    /// The node no longer exists. Carries the old value.
    Removed(Value),
    /// The node was replaced wholesale (scalar change or kind change).
    Modified { old: Value, new: Value },
    /// Per-key changes of an object. Only changed keys are present.
    Object(BTreeMap<String, Delta>),
    /// Index-aware changes of an array.
    Array(Vec<ArrayEntry>),
}

/// One entry of an array delta.
///
/// Indices of removals and move sources refer to the array before the
/// change; every other index refers to the array after the change.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayEntry {
    Inserted {
        index: usize,
        value: Value,
    },
    Removed {
        index: usize,
        value: Value,
    },
    Moved {
        from: usize,
        to: usize,
        delta: Option<Box<Delta>>,
    },
    Nested {
        index: usize,
        delta: Box<Delta>,
    },
}

impl ArrayEntry {
    fn sort_key(&self) -> (usize, u8) {
        match self {
            ArrayEntry::Removed { index, .. } => (*index, 0),
            ArrayEntry::Inserted { index, .. } => (*index, 1),
            ArrayEntry::Moved { to, .. } => (*to, 2),
            ArrayEntry::Nested { index, .. } => (*index, 3),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DiffOptions {
    /// Nesting depth at which a diff gives up with [`DepthExceeded`].
    pub max_depth: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions { max_depth: 128 }
    }
}

/// The trees are nested deeper than [`DiffOptions::max_depth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthExceeded {
    pub max_depth: usize,
}

impl Display for DepthExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state tree is nested deeper than {} levels",
            self.max_depth
        )
    }
}

impl std::error::Error for DepthExceeded {}

/// Compute the delta from `before` to `after`, or `None` when they are
/// structurally equal.
pub fn diff(before: &Tagged, after: &Tagged) -> Result<Option<Delta>, DepthExceeded> {
    diff_with(DiffOptions::default(), before, after)
}

pub fn diff_with(
    options: DiffOptions,
    before: &Tagged,
    after: &Tagged,
) -> Result<Option<Delta>, DepthExceeded> {
    let differ = Differ { options };
    differ.node(
        Side::new(before.value(), before.tags()),
        Side::new(after.value(), after.tags()),
        0,
    )
}

#[derive(Clone, Copy)]
struct Side<'a> {
    value: &'a Value,
    tags: &'a Tags,
}

impl<'a> Side<'a> {
    fn new(value: &'a Value, tags: &'a Tags) -> Self {
        Side { value, tags }
    }

    fn item(self, items: &'a [Value], index: usize) -> Side<'a> {
        Side::new(&items[index], self.tags.item(index))
    }

    /// What array items are matched by: identity for containers, value for
    /// scalars (and for containers that somehow lack tags).
    fn key(self) -> MatchKey<'a> {
        match self.tags.token() {
            Some(token) => MatchKey::Token(token),
            None => MatchKey::Value(self.value),
        }
    }
}

#[derive(PartialEq)]
enum MatchKey<'a> {
    Token(Token),
    Value(&'a Value),
}

struct Differ {
    options: DiffOptions,
}

impl Differ {
    fn node(&self, before: Side, after: Side, depth: usize) -> Result<Option<Delta>, DepthExceeded> {
        if depth > self.options.max_depth {
            return Err(DepthExceeded {
                max_depth: self.options.max_depth,
            });
        }
        if before.value == after.value {
            return Ok(None);
        }
        match (before.value, after.value) {
            (Value::Object(old), Value::Object(new)) => {
                self.object(old, before.tags, new, after.tags, depth)
            }
            (Value::Array(old), Value::Array(new)) => self.array(before, old, after, new, depth),
            (old, new) => Ok(Some(Delta::Modified {
                old: old.clone(),
                new: new.clone(),
            })),
        }
    }

    fn object(
        &self,
        old: &Map<String, Value>,
        old_tags: &Tags,
        new: &Map<String, Value>,
        new_tags: &Tags,
        depth: usize,
    ) -> Result<Option<Delta>, DepthExceeded> {
        let mut changes = BTreeMap::new();
        for (key, value) in old {
            match new.get(key) {
                None => {
                    changes.insert(key.clone(), Delta::Removed(value.clone()));
                }
                Some(next) => {
                    let before = Side::new(value, old_tags.field(key));
                    let after = Side::new(next, new_tags.field(key));
                    if let Some(delta) = self.node(before, after, depth + 1)? {
                        changes.insert(key.clone(), delta);
                    }
                }
            }
        }
        for (key, value) in new {
            if !old.contains_key(key) {
                changes.insert(key.clone(), Delta::Added(value.clone()));
            }
        }
        Ok(if changes.is_empty() {
            None
        } else {
            Some(Delta::Object(changes))
        })
    }

    fn array<'a>(
        &self,
        before: Side<'a>,
        old: &'a [Value],
        after: Side<'a>,
        new: &'a [Value],
        depth: usize,
    ) -> Result<Option<Delta>, DepthExceeded> {
        let old_keys: Vec<MatchKey> = (0..old.len()).map(|i| before.item(old, i).key()).collect();
        let new_keys: Vec<MatchKey> = (0..new.len()).map(|j| after.item(new, j).key()).collect();

        let shortest = old.len().min(new.len());
        let mut head = 0;
        while head < shortest && old_keys[head] == new_keys[head] {
            head += 1;
        }
        let mut tail = 0;
        while tail < shortest - head
            && old_keys[old.len() - 1 - tail] == new_keys[new.len() - 1 - tail]
        {
            tail += 1;
        }

        let mut pairs: Vec<(usize, usize)> = (0..head).map(|i| (i, i)).collect();
        pairs.extend((0..tail).map(|t| (old.len() - 1 - t, new.len() - 1 - t)));

        let old_mid = head..old.len() - tail;
        let new_mid = head..new.len() - tail;
        let common = if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_CELLS {
            Vec::new()
        } else {
            lcs(&old_keys[old_mid.clone()], &new_keys[new_mid.clone()])
        };
        pairs.extend(common.iter().map(|(i, j)| (i + head, j + head)));
        let mut old_matched = vec![false; old.len()];
        let mut new_matched = vec![false; new.len()];
        for (i, j) in &common {
            old_matched[i + head] = true;
            new_matched[j + head] = true;
        }

        let mut entries = Vec::new();
        for (i, j) in pairs {
            if let Some(delta) = self.node(before.item(old, i), after.item(new, j), depth + 1)? {
                entries.push(ArrayEntry::Nested {
                    index: j,
                    delta: Box::new(delta),
                });
            }
        }

        let removed: Vec<usize> = old_mid.filter(|i| !old_matched[*i]).collect();
        let mut inserted: Vec<Option<usize>> = new_mid
            .filter(|j| !new_matched[*j])
            .map(Some)
            .collect();
        // Slots of unmatched insertions by token, first come first served.
        let mut by_token: HashMap<Token, VecDeque<usize>> = HashMap::new();
        for (slot, j) in inserted.iter().enumerate() {
            if let Some(MatchKey::Token(token)) = j.map(|j| &new_keys[j]) {
                by_token.entry(*token).or_default().push_back(slot);
            }
        }

        // An unmatched removal and insertion with the same key is a move.
        for i in removed {
            let slot = match &old_keys[i] {
                MatchKey::Token(token) => by_token.get_mut(token).and_then(VecDeque::pop_front),
                key => inserted
                    .iter()
                    .position(|slot| matches!(slot, Some(j) if new_keys[*j] == *key)),
            };
            let target = slot.and_then(|slot| inserted[slot].take());
            match target {
                Some(j) => {
                    let delta = self.node(before.item(old, i), after.item(new, j), depth + 1)?;
                    entries.push(ArrayEntry::Moved {
                        from: i,
                        to: j,
                        delta: delta.map(Box::new),
                    });
                }
                None => entries.push(ArrayEntry::Removed {
                    index: i,
                    value: old[i].clone(),
                }),
            }
        }
        for j in inserted.into_iter().flatten() {
            entries.push(ArrayEntry::Inserted {
                index: j,
                value: new[j].clone(),
            });
        }

        entries.sort_by_key(ArrayEntry::sort_key);
        Ok(if entries.is_empty() {
            None
        } else {
            Some(Delta::Array(entries))
        })
    }
}

/// Index pairs of a longest common subsequence of `a` and `b`.
fn lcs<T: PartialEq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    // table[i][j]: length of the LCS of a[i..] and b[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}
