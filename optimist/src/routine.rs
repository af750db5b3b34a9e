//! Transition routines: how an action describes its effects and the state
//! changes that go with them.
//!
//! A routine is a resumable state machine. The pipeline calls
//! [`Routine::resume`] repeatedly; each call either suspends on an [`Io`]
//! (an effect plus what to do once it settles) or completes with the
//! optimistic [`Transform`].

use crate::{control::effect::Effect, maybe::Maybe};
use anyhow::Result;
use optimist_core::{Path, Status};
use serde_json::Value;
use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
};

/// A state change, applied to a mutable draft of the current state.
pub type Transform = Box<dyn FnOnce(&mut Draft) -> Result<()> + Send>;

/// Builds the confirmed state change from the effect's settled value.
pub type Confirm = Box<dyn FnOnce(Maybe<Value>, &mut Draft) -> Result<()> + Send>;

/// A mutable copy of the module state, handed to transforms.
///
/// Dereferences to the [`Value`] being edited. Besides editing, a transform
/// can leave a sticky status on a path with [`Draft::annotate`], e.g. to
/// mark a row as failed.
#[derive(Debug)]
pub struct Draft {
    value: Value,
    annotations: Vec<(Path, Status)>,
}

impl Draft {
    pub(crate) fn new(value: Value) -> Self {
        Draft {
            value,
            annotations: Vec::new(),
        }
    }

    pub fn annotate(&mut self, path: impl Into<Path>, status: Status) {
        self.annotations.push((path.into(), status));
    }

    pub fn at(&self, path: &Path) -> Option<&Value> {
        path.get(&self.value)
    }

    pub fn at_mut(&mut self, path: &Path) -> Option<&mut Value> {
        path.get_mut(&mut self.value)
    }

    pub(crate) fn into_parts(self) -> (Value, Vec<(Path, Status)>) {
        (self.value, self.annotations)
    }
}

impl Deref for Draft {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.value
    }
}

impl DerefMut for Draft {
    fn deref_mut(&mut self) -> &mut Value {
        &mut self.value
    }
}

/// One suspension point: an effect that has not been started, and the
/// confirmation to run when it settles.
pub struct Io {
    pub(crate) effect: Effect,
    pub(crate) confirm: Confirm,
}

impl Io {
    pub fn new(
        effect: Effect,
        confirm: impl FnOnce(Maybe<Value>, &mut Draft) -> Result<()> + Send + 'static,
    ) -> Self {
        Io {
            effect,
            confirm: Box::new(confirm),
        }
    }

    /// An effect whose result does not change the state. A rejection is
    /// still reported.
    pub fn effect_only(effect: Effect) -> Self {
        Io::new(effect, |settled, _| settled.into_result().map(|_| ()))
    }
}

pub enum Step {
    Suspended(Io),
    Completed(Transform),
}

impl Step {
    pub fn completed(f: impl FnOnce(&mut Draft) -> Result<()> + Send + 'static) -> Step {
        Step::Completed(Box::new(f))
    }
}

pub trait Routine: Send {
    /// Advance to the next suspension point, or to completion. `model` is
    /// the state as committed so far.
    fn resume(&mut self, model: &Value) -> Result<Step>;
}

/// A routine from a closure, called once per step.
pub struct FromFn<F>(F);

pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(&Value) -> Result<Step> + Send,
{
    FromFn(f)
}

impl<F> Routine for FromFn<F>
where
    F: FnMut(&Value) -> Result<Step> + Send,
{
    fn resume(&mut self, model: &Value) -> Result<Step> {
        (self.0)(model)
    }
}

/// The common routine: some effects, then one optimistic transform.
///
/// ```ignore
/// Script::new()
///     .io(Io::new(save(task.clone()), confirm_saved))
///     .produce(move |draft| { push_task(draft, task) })
/// ```
pub struct Script {
    ios: VecDeque<Io>,
    produce: Option<Transform>,
}

impl Script {
    pub fn new() -> Self {
        Script {
            ios: VecDeque::new(),
            produce: None,
        }
    }

    pub fn io(mut self, io: Io) -> Self {
        self.ios.push_back(io);
        self
    }

    pub fn produce(mut self, f: impl FnOnce(&mut Draft) -> Result<()> + Send + 'static) -> Self {
        self.produce = Some(Box::new(f));
        self
    }
}

impl Default for Script {
    fn default() -> Self {
        Script::new()
    }
}

impl Routine for Script {
    fn resume(&mut self, _model: &Value) -> Result<Step> {
        if let Some(io) = self.ios.pop_front() {
            return Ok(Step::Suspended(io));
        }
        Ok(match self.produce.take() {
            Some(produce) => Step::Completed(produce),
            None => Step::completed(|_| Ok(())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimist_core::path;
    use serde_json::json;

    #[test]
    fn script_suspends_then_completes() {
        let mut script = Script::new()
            .io(Io::effect_only(Effect::ready(json!(1))))
            .io(Io::effect_only(Effect::ready(json!(2))))
            .produce(|draft| {
                **draft = json!({"done": true});
                Ok(())
            });
        let model = json!({});
        assert!(matches!(script.resume(&model).unwrap(), Step::Suspended(_)));
        assert!(matches!(script.resume(&model).unwrap(), Step::Suspended(_)));
        let Step::Completed(transform) = script.resume(&model).unwrap() else {
            panic!("expected completion");
        };
        let mut draft = Draft::new(model);
        transform(&mut draft).unwrap();
        assert_eq!(*draft, json!({"done": true}));
    }

    #[test]
    fn from_fn_sees_model() {
        let mut routine = from_fn(|model: &Value| {
            let n = model["n"].as_i64().unwrap_or(0);
            Ok(Step::completed(move |draft| {
                draft["n"] = json!(n + 1);
                Ok(())
            }))
        });
        let Step::Completed(transform) = routine.resume(&json!({"n": 1})).unwrap() else {
            panic!("expected completion");
        };
        let mut draft = Draft::new(json!({"n": 1}));
        transform(&mut draft).unwrap();
        assert_eq!(draft["n"], json!(2));
    }

    #[test]
    fn draft_annotations() {
        let mut draft = Draft::new(json!({"tasks": [{"id": 1}]}));
        draft.annotate(path!("tasks", 0), Status::FAILED);
        *draft.at_mut(&path!("tasks", 0, "id")).unwrap() = json!(2);
        let (value, annotations) = draft.into_parts();
        assert_eq!(value, json!({"tasks": [{"id": 2}]}));
        assert_eq!(annotations, vec![(path!("tasks", 0), Status::FAILED)]);
    }
}
