//! Flattening a [`Delta`] into mutation records.

use crate::{
    diff::{ArrayEntry, Delta},
    path::Path,
    process::ProcessToken,
    status::Status,
};
use anyhow::{anyhow, Result};
use json_patch::{
    jsonptr::PointerBuf, AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One path currently in flux because of one action invocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MutationRecord {
    pub path: Path,
    pub status: Status,
    /// The optimistic value, for additions and updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub process: ProcessToken,
}

impl MutationRecord {
    pub fn is_direct(&self) -> bool {
        self.status.contains(Status::DIRECT)
    }
}

/// Walk `delta` depth first and emit one record per touched path.
///
/// Changed nodes get a `DIRECT` record carrying the operation. Every
/// non-root ancestor of a changed node gets an `INDIRECT` record with the
/// same operation. A path touched more than once gets a single record whose
/// flags are the union. All records start out `PENDING`.
pub fn project(process: ProcessToken, delta: &Delta) -> Vec<MutationRecord> {
    let mut projector = Projector {
        process,
        records: Vec::new(),
        by_path: HashMap::new(),
    };
    projector.walk(&Path::root(), delta);
    projector.records
}

struct Projector {
    process: ProcessToken,
    records: Vec<MutationRecord>,
    by_path: HashMap<Path, usize>,
}

impl Projector {
    fn walk(&mut self, path: &Path, delta: &Delta) {
        match delta {
            Delta::Added(value) => self.direct(path, Status::ADDING, Some(value)),
            Delta::Removed(_) => self.direct(path, Status::REMOVING, None),
            Delta::Modified { new, .. } => self.direct(path, Status::UPDATING, Some(new)),
            Delta::Object(fields) => {
                for (key, delta) in fields {
                    self.walk(&path.child(key.as_str()), delta);
                }
            }
            Delta::Array(entries) => self.array(path, entries),
        }
    }

    fn array(&mut self, path: &Path, entries: &[ArrayEntry]) {
        let (gone, arrived) = displaced(entries);

        // A removal and an insertion replace in place when as many kept
        // items precede the one in the old array as precede the other in
        // the new one. Within a gap they pair up in order.
        let mut gaps: BTreeMap<usize, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for entry in entries {
            match entry {
                ArrayEntry::Removed { index, .. } => {
                    let gap = index - gone.range(..*index).count();
                    gaps.entry(gap).or_default().0.push(*index);
                }
                ArrayEntry::Inserted { index, .. } => {
                    let gap = index - arrived.range(..*index).count();
                    gaps.entry(gap).or_default().1.push(*index);
                }
                _ => {}
            }
        }
        let mut replaced = BTreeSet::new();
        let mut replacing = BTreeSet::new();
        for (removals, insertions) in gaps.values() {
            for (r, i) in removals.iter().zip(insertions) {
                replaced.insert(*r);
                replacing.insert(*i);
            }
        }

        for entry in entries {
            match entry {
                // Reported with the insertion that replaces it.
                ArrayEntry::Removed { index, .. } if replaced.contains(index) => {}
                ArrayEntry::Removed { index, .. } => {
                    self.direct(&path.child(*index), Status::REMOVING, None)
                }
                ArrayEntry::Inserted { index, value } => {
                    let op = if replacing.contains(index) {
                        Status::UPDATING
                    } else {
                        Status::ADDING
                    };
                    self.direct(&path.child(*index), op, Some(value))
                }
                ArrayEntry::Moved { to, delta, .. } => {
                    let at = path.child(*to);
                    self.direct(&at, Status::MOVING, None);
                    if let Some(delta) = delta {
                        self.walk(&at, delta);
                    }
                }
                ArrayEntry::Nested { index, delta } => self.walk(&path.child(*index), delta),
            }
        }
    }

    fn direct(&mut self, path: &Path, op: Status, value: Option<&Value>) {
        let record = self.upsert(path, Status::PENDING | op | Status::DIRECT);
        if let Some(value) = value {
            record.value = Some(value.clone());
        }
        for ancestor in path.ancestors() {
            self.upsert(&ancestor, Status::PENDING | op | Status::INDIRECT);
        }
    }

    fn upsert(&mut self, path: &Path, status: Status) -> &mut MutationRecord {
        let index = match self.by_path.get(path) {
            Some(index) => *index,
            None => {
                self.records.push(MutationRecord {
                    path: path.clone(),
                    status: Status::NONE,
                    value: None,
                    process: self.process,
                });
                self.by_path.insert(path.clone(), self.records.len() - 1);
                self.records.len() - 1
            }
        };
        let record = &mut self.records[index];
        record.status |= status;
        record
    }
}

/// Indices that left the old array and indices that arrived in the new
/// one, moves included.
fn displaced(entries: &[ArrayEntry]) -> (BTreeSet<usize>, BTreeSet<usize>) {
    let mut gone = BTreeSet::new();
    let mut arrived = BTreeSet::new();
    for entry in entries {
        match entry {
            ArrayEntry::Removed { index, .. } => {
                gone.insert(*index);
            }
            ArrayEntry::Inserted { index, .. } => {
                arrived.insert(*index);
            }
            ArrayEntry::Moved { from, to, .. } => {
                gone.insert(*from);
                arrived.insert(*to);
            }
            ArrayEntry::Nested { .. } => {}
        }
    }
    (gone, arrived)
}

/// Render `delta` as an RFC 6902 patch that takes `before` to the snapshot
/// the delta was computed against.
///
/// Array items leave back to front by old index, then arrive front to back
/// by new index, then nested changes apply at their new index. A moved item
/// is removed and added again with its nested changes applied.
pub fn to_patch(before: &Value, delta: &Delta) -> Result<Patch> {
    let mut ops = Vec::new();
    patch_ops(&Path::root(), before, delta, &mut ops)?;
    Ok(Patch(ops))
}

static NULL: Value = Value::Null;

fn pointer(path: &Path) -> Result<PointerBuf> {
    Ok(path.to_pointer().parse()?)
}

fn patch_ops(path: &Path, before: &Value, delta: &Delta, ops: &mut Vec<PatchOperation>) -> Result<()> {
    match delta {
        Delta::Added(value) => ops.push(PatchOperation::Add(AddOperation {
            path: pointer(path)?,
            value: value.clone(),
        })),
        Delta::Removed(_) => ops.push(PatchOperation::Remove(RemoveOperation {
            path: pointer(path)?,
        })),
        Delta::Modified { new, .. } => ops.push(PatchOperation::Replace(ReplaceOperation {
            path: pointer(path)?,
            value: new.clone(),
        })),
        Delta::Object(fields) => {
            for (key, delta) in fields {
                let old = before.get(key).unwrap_or(&NULL);
                patch_ops(&path.child(key.as_str()), old, delta, ops)?;
            }
        }
        Delta::Array(entries) => {
            let items = before.as_array().map(Vec::as_slice).unwrap_or_default();
            array_ops(path, items, entries, ops)?;
        }
    }
    Ok(())
}

fn array_ops(
    path: &Path,
    items: &[Value],
    entries: &[ArrayEntry],
    ops: &mut Vec<PatchOperation>,
) -> Result<()> {
    let (gone, arrived) = displaced(entries);
    for index in gone.iter().rev() {
        ops.push(PatchOperation::Remove(RemoveOperation {
            path: pointer(&path.child(*index))?,
        }));
    }

    let mut arrivals = Vec::new();
    for entry in entries {
        match entry {
            ArrayEntry::Inserted { index, value } => arrivals.push((*index, value.clone())),
            ArrayEntry::Moved { from, to, delta } => {
                let mut value = items
                    .get(*from)
                    .cloned()
                    .ok_or_else(|| anyhow!("move source {} is outside {}", from, path))?;
                if let Some(delta) = delta {
                    let inner = to_patch(&value, delta)?;
                    json_patch::patch(&mut value, &inner.0)?;
                }
                arrivals.push((*to, value));
            }
            _ => {}
        }
    }
    arrivals.sort_by_key(|(index, _)| *index);
    for (index, value) in arrivals {
        ops.push(PatchOperation::Add(AddOperation {
            path: pointer(&path.child(index))?,
            value,
        }));
    }

    // Kept items keep their relative order, so the n-th kept item of the
    // new array is the n-th kept item of the old one.
    let kept: Vec<&Value> = items
        .iter()
        .enumerate()
        .filter(|(i, _)| !gone.contains(i))
        .map(|(_, item)| item)
        .collect();
    for entry in entries {
        if let ArrayEntry::Nested { index, delta } = entry {
            let rank = index - arrived.range(..*index).count();
            let old = kept.get(rank).copied().unwrap_or(&NULL);
            patch_ops(&path.child(*index), old, delta, ops)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{diff::diff, path, query::is, tag::{tag, Tagged}};
    use serde_json::json;

    fn delta(before: &Value, after: &Value) -> Delta {
        let a = Tagged::new(before.clone());
        let b = tag(after.clone(), Some(&a));
        diff(&a, &b).unwrap().unwrap()
    }

    fn records(before: Value, after: Value) -> (Value, Vec<MutationRecord>) {
        let delta = delta(&before, &after);
        (before, project(ProcessToken::mint(), &delta))
    }

    fn replay(before: &Value, after: &Value) -> Value {
        let patch = to_patch(before, &delta(before, after)).unwrap();
        let mut value = before.clone();
        json_patch::patch(&mut value, &patch.0).unwrap();
        value
    }

    fn status_at(records: &[MutationRecord], path: &Path) -> Option<Status> {
        records.iter().find(|r| &r.path == path).map(|r| r.status)
    }

    #[test]
    fn test_add_to_array() {
        let (_, records) = records(json!({"tasks": []}), json!({"tasks": [{"summary": "write docs"}]}));
        assert_eq!(
            status_at(&records, &path!("tasks", 0)),
            Some(Status::PENDING | Status::ADDING | Status::DIRECT)
        );
        assert_eq!(
            status_at(&records, &path!("tasks")),
            Some(Status::PENDING | Status::ADDING | Status::INDIRECT)
        );
        let direct = records.iter().find(|r| r.is_direct()).unwrap();
        assert_eq!(direct.value, Some(json!({"summary": "write docs"})));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_object_operations() {
        let (_, records) = records(
            json!({"a": 1, "b": 2}),
            json!({"a": 5, "c": 3}),
        );
        assert_eq!(
            status_at(&records, &path!("a")),
            Some(Status::PENDING | Status::UPDATING | Status::DIRECT)
        );
        assert_eq!(
            status_at(&records, &path!("b")),
            Some(Status::PENDING | Status::REMOVING | Status::DIRECT)
        );
        assert_eq!(
            status_at(&records, &path!("c")),
            Some(Status::PENDING | Status::ADDING | Status::DIRECT)
        );
        let removed = records.iter().find(|r| r.path == path!("b")).unwrap();
        assert_eq!(removed.value, None);
    }

    #[test]
    fn test_insert_and_remove_at_same_index_is_update() {
        let (_, records) = records(json!([1, 2, 3]), json!([1, 9, 3]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, path!(1));
        assert_eq!(
            records[0].status,
            Status::PENDING | Status::UPDATING | Status::DIRECT
        );
        assert_eq!(records[0].value, Some(json!(9)));
    }

    #[test]
    fn test_removal_and_insertion_in_different_gaps() {
        // 1 and 2 leave ahead of the kept 3; 9 arrives after it.
        let (_, recs) = records(json!([1, 2, 3]), json!([3, 9]));
        assert_eq!(
            status_at(&recs, &path!(0)),
            Some(Status::PENDING | Status::REMOVING | Status::DIRECT)
        );
        let second = recs.iter().find(|r| r.path == path!(1)).unwrap();
        assert!(second.status.contains(Status::REMOVING | Status::ADDING));
        assert_eq!(second.value, Some(json!(9)));
        assert!(recs.iter().all(|r| !r.status.contains(Status::UPDATING)));
    }

    #[test]
    fn test_numeric_object_keys_answer_index_paths() {
        let (_, recs) = records(
            json!({"byId": {"7": {"done": false}}}),
            json!({"byId": {"7": {"done": true}}}),
        );
        let flags = Status::PENDING | Status::UPDATING;
        assert!(is(&recs, &"byId.7".parse().unwrap(), flags));
        assert!(is(&recs, &path!("byId", 7), flags));
        assert!(is(&recs, &"byId.7.done".parse().unwrap(), flags | Status::DIRECT));
        assert!(!is(&recs, &"byId.8".parse().unwrap(), Status::PENDING));
    }

    #[test]
    fn test_move_recorded_at_after_index() {
        let (_, records) = records(
            json!({"l": [{"id": 1}, {"id": 2}, {"id": 3}]}),
            json!({"l": [{"id": 3}, {"id": 1}, {"id": 2}]}),
        );
        assert_eq!(
            status_at(&records, &path!("l", 0)),
            Some(Status::PENDING | Status::MOVING | Status::DIRECT)
        );
        assert_eq!(
            status_at(&records, &path!("l")),
            Some(Status::PENDING | Status::MOVING | Status::INDIRECT)
        );
    }

    #[test]
    fn test_deep_update_marks_every_ancestor() {
        let (_, records) = records(
            json!({"tasks": [{"id": 1, "meta": {"done": false}}]}),
            json!({"tasks": [{"id": 1, "meta": {"done": true}}]}),
        );
        let indirect = Status::PENDING | Status::UPDATING | Status::INDIRECT;
        assert_eq!(status_at(&records, &path!("tasks")), Some(indirect));
        assert_eq!(status_at(&records, &path!("tasks", 0)), Some(indirect));
        assert_eq!(status_at(&records, &path!("tasks", 0, "meta")), Some(indirect));
        assert_eq!(
            status_at(&records, &path!("tasks", 0, "meta", "done")),
            Some(Status::PENDING | Status::UPDATING | Status::DIRECT)
        );
        assert_eq!(status_at(&records, &Path::root()), None);
    }

    #[test]
    fn test_overlapping_operations_merge() {
        let (_, records) = records(
            json!({"tasks": [{"id": 1}, {"id": 2}]}),
            json!({"tasks": [{"id": 2}, {"id": 3}]}),
        );
        let tasks = status_at(&records, &path!("tasks")).unwrap();
        assert!(tasks.contains(Status::INDIRECT));
        assert!(tasks.contains(Status::PENDING));
        assert_eq!(
            records.iter().filter(|r| r.path == path!("tasks")).count(),
            1
        );
    }

    #[test]
    fn test_optimistic_values_reconstruct_after() {
        let before = json!({"tasks": [{"id": 1}, {"id": 2}, {"id": 3}], "name": "x", "old": 1});
        let after = json!({"tasks": [{"id": 1}, {"id": 3}, {"id": 4}], "name": "y", "new": [1]});
        let (_, recs) = records(before, after.clone());
        for record in recs.iter().filter(|r| r.value.is_some()) {
            assert_eq!(record.path.get(&after), record.value.as_ref());
        }
    }

    #[test]
    fn test_patch_reproduces_after() {
        let before = json!({"tasks": [{"id": 1}, {"id": 2}, {"id": 3}], "name": "x", "old": 1});
        let after = json!({"tasks": [{"id": 1}, {"id": 3}, {"id": 4}, 7], "name": "y", "new": [1]});
        assert_eq!(replay(&before, &after), after);
    }

    #[test]
    fn test_patch_with_removals_ahead_of_kept_items() {
        let before = json!([1, 2, 3]);
        let after = json!([3, 9]);
        assert_eq!(replay(&before, &after), after);
        let patch = to_patch(&before, &delta(&before, &after)).unwrap();
        assert_eq!(patch.0.len(), 3);
    }

    #[test]
    fn test_patch_with_moves() {
        let before = json!({"l": [{"id": 1}, {"id": 2}, {"id": 3}], "k": true});
        let after = json!({"l": [{"id": 3}, {"id": 1}, {"id": 2, "n": [1]}]});
        let recs = project(ProcessToken::mint(), &delta(&before, &after));
        assert!(recs
            .iter()
            .any(|r| r.status.contains(Status::MOVING | Status::DIRECT)));
        assert_eq!(replay(&before, &after), after);
    }

    #[test]
    fn test_patch_applies_changes_inside_moved_item() {
        let before = json!([{"x": 0}, {"y": 1}]);
        let delta = Delta::Array(vec![ArrayEntry::Moved {
            from: 0,
            to: 1,
            delta: Some(Box::new(Delta::Object(
                [(
                    "x".to_owned(),
                    Delta::Modified {
                        old: json!(0),
                        new: json!(1),
                    },
                )]
                .into_iter()
                .collect(),
            ))),
        }]);
        let patch = to_patch(&before, &delta).unwrap();
        let mut value = before.clone();
        json_patch::patch(&mut value, &patch.0).unwrap();
        assert_eq!(value, json!([{"y": 1}, {"x": 1}]));
    }

    #[test]
    fn test_patch_replaces_root() {
        assert_eq!(replay(&json!(1), &json!("one")), json!("one"));
    }
}
