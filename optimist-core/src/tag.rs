//! Stable identity for the object and array nodes of a state tree.
//!
//! Values stay plain `serde_json::Value`s; identity lives in a side table,
//! [`Tags`], which mirrors the shape of the value it describes. Every time a
//! new value is committed, [`tag`] re-keys the side table by correlating the
//! new value with the previous snapshot, so a node that survives a
//! structural copy keeps its token. The diff engine uses these tokens to
//! recognise a reordered array item as a move rather than a removal paired
//! with an insertion.

use crate::path::{Path, Segment};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one object or array node. Only meaningful for
/// correlating snapshots; never for business logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    fn mint() -> Self {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn num(self) -> u64 {
        self.0
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity side table for one value. Scalars carry no token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tags {
    Scalar,
    Object {
        token: Token,
        fields: BTreeMap<String, Tags>,
    },
    Array {
        token: Token,
        items: Vec<Tags>,
    },
}

static SCALAR: Tags = Tags::Scalar;

impl Tags {
    pub fn token(&self) -> Option<Token> {
        match self {
            Tags::Scalar => None,
            Tags::Object { token, .. } | Tags::Array { token, .. } => Some(*token),
        }
    }

    /// Tags of an object field, or scalar tags if there is no such field.
    pub fn field(&self, key: &str) -> &Tags {
        match self {
            Tags::Object { fields, .. } => fields.get(key).unwrap_or(&SCALAR),
            _ => &SCALAR,
        }
    }

    /// Tags of an array item, or scalar tags if there is no such item.
    pub fn item(&self, index: usize) -> &Tags {
        match self {
            Tags::Array { items, .. } => items.get(index).unwrap_or(&SCALAR),
            _ => &SCALAR,
        }
    }

    fn fresh(value: &Value) -> Tags {
        match value {
            Value::Object(fields) => Tags::Object {
                token: Token::mint(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Tags::fresh(v)))
                    .collect(),
            },
            Value::Array(items) => Tags::Array {
                token: Token::mint(),
                items: items.iter().map(Tags::fresh).collect(),
            },
            _ => Tags::Scalar,
        }
    }

    /// Tags for `value`, reusing tokens from `self`, which describes
    /// `previous`.
    fn correlate(&self, previous: &Value, value: &Value) -> Tags {
        if previous == value {
            return self.clone();
        }
        match (self, previous, value) {
            (Tags::Object { token, fields }, Value::Object(old), Value::Object(new)) => {
                Tags::Object {
                    token: *token,
                    fields: new
                        .iter()
                        .map(|(k, v)| {
                            let tags = match (fields.get(k), old.get(k)) {
                                (Some(t), Some(o)) => t.correlate(o, v),
                                _ => Tags::fresh(v),
                            };
                            (k.clone(), tags)
                        })
                        .collect(),
                }
            }
            (Tags::Array { token, items }, Value::Array(old), Value::Array(new)) => Tags::Array {
                token: *token,
                items: correlate_items(items, old, new),
            },
            _ => Tags::fresh(value),
        }
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_))
    )
}

/// Array items are claimed in three rounds: an equal item at the same index,
/// then an equal item anywhere (a move), then whatever sits at the same index
/// with the same kind (an in-place update). Leftovers are new nodes.
fn correlate_items(tags: &[Tags], old: &[Value], new: &[Value]) -> Vec<Tags> {
    let mut claimed = vec![false; old.len()];
    let mut result: Vec<Option<Tags>> = vec![None; new.len()];

    for (j, v) in new.iter().enumerate() {
        if !is_container(v) {
            result[j] = Some(Tags::Scalar);
        } else if j < old.len() && old[j] == *v {
            claimed[j] = true;
            result[j] = Some(tags.get(j).cloned().unwrap_or_else(|| Tags::fresh(v)));
        }
    }

    for (j, v) in new.iter().enumerate() {
        if result[j].is_some() {
            continue;
        }
        if let Some(i) = (0..old.len()).find(|&i| !claimed[i] && old[i] == *v) {
            claimed[i] = true;
            result[j] = Some(tags.get(i).cloned().unwrap_or_else(|| Tags::fresh(v)));
        }
    }

    for (j, v) in new.iter().enumerate() {
        if result[j].is_some() || j >= old.len() || claimed[j] || !same_kind(&old[j], v) {
            continue;
        }
        claimed[j] = true;
        result[j] = Some(match tags.get(j) {
            Some(t) => t.correlate(&old[j], v),
            None => Tags::fresh(v),
        });
    }

    result
        .into_iter()
        .zip(new)
        .map(|(t, v)| t.unwrap_or_else(|| Tags::fresh(v)))
        .collect()
}

/// A snapshot of a state tree together with its identity side table.
///
/// The value is shared behind an `Arc`, so handing a snapshot to a renderer
/// does not copy it, and a later commit cannot change it.
#[derive(Clone, Debug)]
pub struct Tagged {
    value: Arc<Value>,
    tags: Tags,
}

impl Tagged {
    /// Tag a value that has no predecessor. Every node gets a fresh token.
    pub fn new(value: Value) -> Self {
        let tags = Tags::fresh(&value);
        Tagged {
            value: Arc::new(value),
            tags,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn snapshot(&self) -> Arc<Value> {
        self.value.clone()
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Tag `value` as the successor of this snapshot.
    pub fn retag(&self, value: Value) -> Tagged {
        tag(value, Some(self))
    }

    pub fn token_at(&self, path: &Path) -> Option<Token> {
        path.segments()
            .iter()
            .try_fold(&self.tags, |tags, segment| match (tags, segment) {
                (Tags::Object { fields, .. }, Segment::Key(k)) => fields.get(k),
                (Tags::Object { fields, .. }, Segment::Index(i)) => fields.get(&i.to_string()),
                (Tags::Array { items, .. }, segment) => segment.as_index().and_then(|i| items.get(i)),
                _ => None,
            })
            .and_then(Tags::token)
    }
}

/// Tag `value`, reusing the identity of nodes it shares with `previous`.
///
/// Without a previous snapshot every object and array node gets a fresh
/// token. `previous` is only read.
pub fn tag(value: Value, previous: Option<&Tagged>) -> Tagged {
    let tags = match previous {
        Some(previous) => previous.tags.correlate(&previous.value, &value),
        None => Tags::fresh(&value),
    };
    Tagged {
        value: Arc::new(value),
        tags,
    }
}
