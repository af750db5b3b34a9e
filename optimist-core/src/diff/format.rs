//! The JSON layout of a [`Delta`], compatible with jsondiffpatch.
//!
//! | delta                        | JSON                          |
//! |------------------------------|-------------------------------|
//! | added                        | `[new]`                       |
//! | modified                     | `[old, new]`                  |
//! | removed                      | `[old, 0, 0]`                 |
//! | object                       | `{"key": <delta>, ...}`       |
//! | array                        | `{"_t": "a", ...}`            |
//! | array item moved             | `"_from": ["", to, 3]`        |
//!
//! Array keys without an underscore are after-indices; keys with one are
//! before-indices (removals and move sources). A moved item that also
//! changed carries its nested delta under its after-index.

use super::{ArrayEntry, Delta};
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, fmt::Display};

const ARRAY_MARKER: &str = "_t";
const TEXT_DIFF: u64 = 2;
const ARRAY_MOVE: u64 = 3;

/// A JSON value is not a delta in the expected layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFormatError {
    pub at: String,
    pub reason: String,
}

impl DeltaFormatError {
    fn new(at: &str, reason: impl Into<String>) -> Self {
        DeltaFormatError {
            at: at.to_owned(),
            reason: reason.into(),
        }
    }
}

impl Display for DeltaFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.at.is_empty() {
            write!(f, "invalid delta: {}", self.reason)
        } else {
            write!(f, "invalid delta at {}: {}", self.at, self.reason)
        }
    }
}

impl std::error::Error for DeltaFormatError {}

impl Delta {
    pub fn to_json(&self) -> Value {
        match self {
            Delta::Added(new) => json!([new]),
            Delta::Modified { old, new } => json!([old, new]),
            Delta::Removed(old) => json!([old, 0, 0]),
            Delta::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, d)| (k.clone(), d.to_json()))
                    .collect(),
            ),
            Delta::Array(entries) => {
                let mut out = Map::new();
                out.insert(ARRAY_MARKER.to_owned(), json!("a"));
                for entry in entries {
                    match entry {
                        ArrayEntry::Inserted { index, value } => {
                            out.insert(index.to_string(), json!([value]));
                        }
                        ArrayEntry::Removed { index, value } => {
                            out.insert(format!("_{}", index), json!([value, 0, 0]));
                        }
                        ArrayEntry::Moved { from, to, delta } => {
                            out.insert(format!("_{}", from), json!(["", to, ARRAY_MOVE]));
                            if let Some(delta) = delta {
                                out.insert(to.to_string(), delta.to_json());
                            }
                        }
                        ArrayEntry::Nested { index, delta } => {
                            out.insert(index.to_string(), delta.to_json());
                        }
                    }
                }
                Value::Object(out)
            }
        }
    }

    pub fn from_json(value: &Value) -> Result<Delta, DeltaFormatError> {
        decode(value, "")
    }
}

fn child(at: &str, key: &str) -> String {
    if at.is_empty() {
        key.to_owned()
    } else {
        format!("{}.{}", at, key)
    }
}

fn decode(value: &Value, at: &str) -> Result<Delta, DeltaFormatError> {
    match value {
        Value::Array(parts) => decode_leaf(parts, at),
        Value::Object(fields) if fields.get(ARRAY_MARKER) == Some(&json!("a")) => {
            decode_array(fields, at)
        }
        Value::Object(fields) => {
            let mut out = BTreeMap::new();
            for (key, delta) in fields {
                out.insert(key.clone(), decode(delta, &child(at, key))?);
            }
            Ok(Delta::Object(out))
        }
        _ => Err(DeltaFormatError::new(at, "expected an array or an object")),
    }
}

fn decode_leaf(parts: &[Value], at: &str) -> Result<Delta, DeltaFormatError> {
    match parts {
        [new] => Ok(Delta::Added(new.clone())),
        [old, new] => Ok(Delta::Modified {
            old: old.clone(),
            new: new.clone(),
        }),
        // A zero/zero marker is a removal, whatever the first element holds.
        [old, zero, marker] if zero == &json!(0) && marker == &json!(0) => {
            Ok(Delta::Removed(old.clone()))
        }
        [_, _, marker] if marker.as_u64() == Some(TEXT_DIFF) => {
            Err(DeltaFormatError::new(at, "text diffs are not supported"))
        }
        [_, _, marker] if marker.as_u64() == Some(ARRAY_MOVE) => Err(DeltaFormatError::new(
            at,
            "move marker outside of an array delta",
        )),
        _ => Err(DeltaFormatError::new(
            at,
            format!("unrecognised leaf with {} elements", parts.len()),
        )),
    }
}

fn index(key: &str, at: &str) -> Result<usize, DeltaFormatError> {
    key.parse()
        .map_err(|_| DeltaFormatError::new(at, format!("invalid array index {:?}", key)))
}

fn decode_array(fields: &Map<String, Value>, at: &str) -> Result<Delta, DeltaFormatError> {
    let mut entries = Vec::new();
    let mut moved_to = BTreeMap::new();
    let mut after: BTreeMap<usize, &Value> = BTreeMap::new();

    for (key, value) in fields {
        if key == ARRAY_MARKER {
            continue;
        }
        let here = child(at, key);
        match key.strip_prefix('_') {
            Some(from) => {
                let from = index(from, &here)?;
                let parts = value
                    .as_array()
                    .ok_or_else(|| DeltaFormatError::new(&here, "expected a removal or a move"))?;
                match parts.as_slice() {
                    [_, to, marker] if marker.as_u64() == Some(ARRAY_MOVE) => {
                        let to = to
                            .as_u64()
                            .ok_or_else(|| DeltaFormatError::new(&here, "invalid move target"))?;
                        moved_to.insert(to as usize, from);
                    }
                    _ => match decode_leaf(parts, &here)? {
                        Delta::Removed(value) => entries.push(ArrayEntry::Removed { index: from, value }),
                        _ => {
                            return Err(DeltaFormatError::new(
                                &here,
                                "before-index entries must be removals or moves",
                            ))
                        }
                    },
                }
            }
            None => {
                after.insert(index(key, &here)?, value);
            }
        }
    }

    for (to, from) in &moved_to {
        let delta = match after.remove(to) {
            Some(value) => Some(Box::new(decode(value, &child(at, &to.to_string()))?)),
            None => None,
        };
        entries.push(ArrayEntry::Moved {
            from: *from,
            to: *to,
            delta,
        });
    }

    for (index, value) in after {
        let here = child(at, &index.to_string());
        match decode(value, &here)? {
            Delta::Added(value) => entries.push(ArrayEntry::Inserted { index, value }),
            delta => entries.push(ArrayEntry::Nested {
                index,
                delta: Box::new(delta),
            }),
        }
    }

    entries.sort_by_key(ArrayEntry::sort_key);
    Ok(Delta::Array(entries))
}
