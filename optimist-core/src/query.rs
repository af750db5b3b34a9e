//! Answering "what is happening at this path" from the live records.

use crate::{
    path::{Path, Segment},
    project::MutationRecord,
    status::Status,
};
use serde_json::Value;
use std::sync::Arc;

/// The flags `record` contributes at `path`, if any.
///
/// A record at exactly `path` contributes its own flags. A direct record on a
/// strict ancestor or descendant of `path` contributes its flags with the
/// target replaced by [`Status::INDIRECT`]. Indirect records only speak for
/// their own path.
pub fn effective(record: &MutationRecord, path: &Path) -> Option<Status> {
    if &record.path == path {
        Some(record.status)
    } else if record.is_direct() && record.path.is_related(path) {
        Some(record.status.retarget(Status::INDIRECT))
    } else {
        None
    }
}

/// Whether some record puts every bit of `flags` on `path`. With no
/// records every query is false.
pub fn is(records: &[MutationRecord], path: &Path, flags: Status) -> bool {
    records
        .iter()
        .filter_map(|r| effective(r, path))
        .any(|s| s.contains(flags))
}

/// Union of all flags that apply to `path`.
pub fn status(records: &[MutationRecord], path: &Path) -> Status {
    records
        .iter()
        .filter_map(|r| effective(r, path))
        .fold(Status::NONE, |acc, s| acc | s)
}

/// A consistent pair of a state snapshot and the records that were live when
/// it was taken.
#[derive(Clone, Debug)]
pub struct View {
    model: Arc<Value>,
    records: Arc<Vec<MutationRecord>>,
}

impl View {
    pub fn new(model: Arc<Value>, records: Arc<Vec<MutationRecord>>) -> Self {
        View { model, records }
    }

    pub fn model(&self) -> &Value {
        &self.model
    }

    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    pub fn root(&self) -> Cursor<'_> {
        Cursor {
            view: self,
            path: Path::root(),
        }
    }

    pub fn at(&self, segment: impl Into<Segment>) -> Cursor<'_> {
        self.root().at(segment)
    }

    pub fn cursor(&self, path: Path) -> Cursor<'_> {
        Cursor { view: self, path }
    }

    pub fn is(&self, path: &Path, flags: Status) -> bool {
        is(&self.records, path, flags)
    }
}

/// A position in a [`View`]. Navigating does not require the position to
/// exist in the snapshot; a removed row can still be asked about.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    view: &'a View,
    path: Path,
}

impl<'a> Cursor<'a> {
    pub fn at(&self, segment: impl Into<Segment>) -> Cursor<'a> {
        Cursor {
            view: self.view,
            path: self.path.child(segment),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn value(&self) -> Option<&'a Value> {
        self.path.get(&self.view.model)
    }

    pub fn is(&self, flags: Status) -> bool {
        is(&self.view.records, &self.path, flags)
    }

    pub fn status(&self) -> Status {
        status(&self.view.records, &self.path)
    }

    /// Records that apply here, directly or indirectly.
    pub fn records(&self) -> impl Iterator<Item = &'a MutationRecord> + '_ {
        self.view
            .records
            .iter()
            .filter(move |r| effective(r, &self.path).is_some())
    }

    /// Cursors for the items of the array under this cursor. Empty when the
    /// value is not an array.
    pub fn items(&self) -> impl Iterator<Item = Cursor<'a>> + '_ {
        let len = match self.value() {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        };
        (0..len).map(move |i| self.at(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{path, process::ProcessToken};
    use serde_json::json;

    fn record(path: Path, status: Status) -> MutationRecord {
        MutationRecord {
            path,
            status,
            value: None,
            process: ProcessToken::mint(),
        }
    }

    #[test]
    fn test_empty_records() {
        let p = path!("tasks", 0);
        assert!(!is(&[], &p, Status::PENDING));
        assert!(!is(&[], &p, Status::NONE));
        assert_eq!(status(&[], &p), Status::NONE);
    }

    #[test]
    fn test_direct_and_indirect() {
        let records = vec![
            record(
                path!("tasks", 3),
                Status::PENDING | Status::REMOVING | Status::DIRECT,
            ),
            record(
                path!("tasks"),
                Status::PENDING | Status::REMOVING | Status::INDIRECT,
            ),
        ];
        assert!(is(&records, &path!("tasks", 3), Status::REMOVING | Status::DIRECT));
        assert!(!is(&records, &path!("tasks", 3), Status::INDIRECT | Status::ADDING));
        assert!(is(&records, &path!("tasks"), Status::REMOVING | Status::INDIRECT));
        assert!(!is(&records, &path!("tasks"), Status::DIRECT));
        // Descendant of a removed row.
        assert!(is(
            &records,
            &path!("tasks", 3, "summary"),
            Status::PENDING | Status::REMOVING | Status::INDIRECT
        ));
        assert!(!is(&records, &path!("tasks", 2), Status::PENDING));
        assert!(!is(&records, &path!("tasks", 2, "summary"), Status::PENDING));
    }

    #[test]
    fn test_cursor_navigation() {
        let model = Arc::new(json!({"tasks": [{"summary": "a"}, {"summary": "b"}]}));
        let records = Arc::new(vec![record(
            path!("tasks", 1),
            Status::PENDING | Status::ADDING | Status::DIRECT,
        )]);
        let view = View::new(model, records);
        let tasks = view.at("tasks");
        let pending: Vec<bool> = tasks.items().map(|c| c.is(Status::PENDING)).collect();
        assert_eq!(pending, vec![false, true]);
        assert_eq!(tasks.at(1).at("summary").value(), Some(&json!("b")));
        assert!(tasks.at(1).at("summary").is(Status::ADDING | Status::INDIRECT));
        assert_eq!(
            tasks.status(),
            Status::PENDING | Status::ADDING | Status::INDIRECT
        );
        assert_eq!(tasks.records().count(), 1);
        assert_eq!(view.at("other").records().count(), 0);
        assert!(view.at("tasks").at(9).value().is_none());
    }
}
