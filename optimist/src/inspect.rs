//! `optimist diff` and `optimist project`: run the pure pipeline stages on
//! JSON files, for debugging routines and renderers.

use anyhow::{bail, ensure, Context as _, Result};
use optimist::{diff, project, to_patch, Delta, MutationRecord, ProcessToken, Tagged};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(clap::Parser, Debug)]
pub(crate) struct DiffArgs {
    /// JSON file with the state before the change
    before: PathBuf,
    /// JSON file with the state after the change
    after: PathBuf,
}

#[derive(clap::Parser, Debug)]
pub(crate) struct ProjectArgs {
    /// JSON file with a delta, as printed by `optimist diff`
    delta: PathBuf,
}

fn read_json(path: &Path) -> Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// What `optimist diff` reports.
#[derive(Debug)]
pub(crate) struct DiffReport {
    pub delta: Delta,
    pub records: Vec<MutationRecord>,
    pub patch: json_patch::Patch,
}

/// Diff two states and project the delta. `None` if they are equal.
pub(crate) fn diff_values(before: Value, after: Value) -> Result<Option<DiffReport>> {
    let before = Tagged::new(before);
    let after = before.retag(after);
    let Some(delta) = diff(&before, &after)? else {
        return Ok(None);
    };
    let records = project(ProcessToken::mint(), &delta);
    let patch = to_patch(before.value(), &delta)?;

    let mut replayed = before.value().clone();
    json_patch::patch(&mut replayed, &patch.0).context("replaying the patch")?;
    ensure!(
        &replayed == after.value(),
        "patch does not reproduce the new state"
    );
    Ok(Some(DiffReport {
        delta,
        records,
        patch,
    }))
}

pub(crate) fn diff_command(args: &DiffArgs) -> Result<()> {
    let before = read_json(&args.before)?;
    let after = read_json(&args.after)?;
    match diff_values(before, after)? {
        None => eprintln!("No changes."),
        Some(report) => {
            println!("{}", serde_json::to_string_pretty(&report.delta.to_json())?);
            print_records(&report.records)?;
            println!("{}", serde_json::to_string_pretty(&report.patch)?);
        }
    }
    Ok(())
}

pub(crate) fn project_command(args: &ProjectArgs) -> Result<()> {
    let raw = read_json(&args.delta)?;
    if raw.is_null() {
        bail!("{} holds no delta", args.delta.display());
    }
    let delta = Delta::from_json(&raw).with_context(|| format!("decoding {}", args.delta.display()))?;
    print_records(&project(ProcessToken::mint(), &delta))
}

fn print_records(records: &[MutationRecord]) -> Result<()> {
    for record in records {
        println!("{:<24} {}", record.path.to_string(), record.status);
        if let Some(value) = &record.value {
            println!("{:<24} = {}", "", serde_json::to_string(value)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimist::{path, Status};
    use serde_json::json;

    #[test]
    fn equal_states() {
        assert!(diff_values(json!({"a": 1}), json!({"a": 1}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn report() {
        let report = diff_values(
            json!({"tasks": [{"id": 1}, {"id": 2}], "title": "x"}),
            json!({"tasks": [{"id": 2}], "title": "y"}),
        )
        .unwrap()
        .unwrap();
        let removed = report
            .records
            .iter()
            .find(|r| r.path == path!("tasks", 0))
            .unwrap();
        assert!(removed.status.contains(Status::REMOVING | Status::DIRECT));
        let title = report
            .records
            .iter()
            .find(|r| r.path == path!("title"))
            .unwrap();
        assert!(title.status.contains(Status::UPDATING));
        assert_eq!(title.value, Some(json!("y")));
        assert_eq!(report.patch.0.len(), 2);
    }

    #[test]
    fn report_for_reordered_list() {
        let report = diff_values(
            json!({"tasks": [{"id": 1}, {"id": 2}, {"id": 3}], "n": [1, 2, 3]}),
            json!({"tasks": [{"id": 3}, {"id": 1}], "n": [3, 9]}),
        )
        .unwrap()
        .unwrap();
        assert!(report
            .records
            .iter()
            .any(|r| r.path.starts_with(&path!("tasks")) && r.status.contains(Status::MOVING)));
        let gone = report
            .records
            .iter()
            .find(|r| r.path == path!("n", 0))
            .unwrap();
        assert!(gone.status.contains(Status::REMOVING));
    }
}
