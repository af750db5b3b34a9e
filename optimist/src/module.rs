//! One managed unit of state, and everything shared by its invocations.

use crate::{
    abort::AbortSignal,
    control::queue::DispatchQueue,
    controller::{Controller, MOUNT, UNMOUNT},
    dispatch::{self, DispatchHandle, Outcome},
};
use optimist_core::{MutationRecord, Path, ProcessToken, Status, Tagged, View};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// In which order the confirmations of one invocation are applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmOrder {
    /// As the effects settle.
    #[default]
    Settlement,
    /// After all effects have settled, in the order they were declared.
    Declaration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleOptions {
    /// Shown in logs.
    pub name: String,
    pub confirm_order: ConfirmOrder,
    /// Deeper state trees fail the invocation that produced them.
    pub max_depth: usize,
    /// A routine that suspends more often than this fails.
    pub max_effects: usize,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        ModuleOptions {
            name: "module".to_owned(),
            confirm_order: ConfirmOrder::Settlement,
            max_depth: 128,
            max_effects: 1024,
        }
    }
}

/// Commit point that produced a [`Change::Committed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Optimistic,
    Confirmed { effect: usize },
}

/// Notification for renderers and other observers.
#[derive(Clone, Debug)]
pub enum Change {
    Committed {
        process: ProcessToken,
        phase: Phase,
        revision: u64,
    },
    Settled {
        process: ProcessToken,
        outcome: Outcome,
        revision: u64,
    },
    /// An error inside an invocation. The invocation still settles.
    Failed {
        process: ProcessToken,
        error: String,
    },
    Dismissed {
        path: Path,
        revision: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Change) + Send + Sync>;

pub(crate) struct ModuleState {
    pub(crate) model: Tagged,
    /// Records of in-flight invocations
    pub(crate) records: Vec<MutationRecord>,
    /// Sticky records left by transforms
    pub(crate) annotations: Vec<MutationRecord>,
    /// `records` followed by `annotations`, as handed out to readers
    published: Arc<Vec<MutationRecord>>,
    pub(crate) queue: DispatchQueue,
    pub(crate) revision: u64,
}

impl ModuleState {
    /// Publish the current records and bump the revision.
    pub(crate) fn bump(&mut self) -> u64 {
        let mut published = self.records.clone();
        published.extend(self.annotations.iter().cloned());
        self.published = Arc::new(published);
        self.revision += 1;
        self.revision
    }
}

pub(crate) struct Inner {
    pub(crate) options: ModuleOptions,
    pub(crate) controller: Controller,
    pub(crate) state: Mutex<ModuleState>,
    /// Held for the whole first pass, so optimistic commits happen in
    /// admission order. This is what orders first passes: by the time a
    /// pipeline waits on its predecessors' optimistic flags, they are up.
    pub(crate) gate: Mutex<()>,
    listeners: Mutex<(u64, Vec<(ListenerId, Listener)>)>,
    revision: watch::Sender<u64>,
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// State is only written after all fallible steps, so it stays consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    /// Tell listeners about a change. Must be called without holding any of
    /// the module's locks.
    pub(crate) fn notify(&self, change: Change) {
        match &change {
            Change::Committed { revision, .. }
            | Change::Settled { revision, .. }
            | Change::Dismissed { revision, .. } => {
                self.revision.send_replace(*revision);
            }
            Change::Failed { .. } => {}
        }
        let listeners: Vec<Listener> = lock(&self.listeners)
            .1
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }
}

/// A module instance: its state, its live mutation records and its
/// dispatch queue. Cloning shares the instance.
///
/// Transforms run while the module's state is locked and must not call back
/// into the module. Routines run during [`Module::dispatch`] and must not
/// dispatch synchronously either; spawn a task for follow-up dispatches.
/// Listeners are called with no lock held and may dispatch.
#[derive(Clone)]
pub struct Module {
    pub(crate) inner: Arc<Inner>,
}

impl Module {
    pub fn new(options: ModuleOptions, controller: Controller, initial: Value) -> Self {
        let (revision, _) = watch::channel(0);
        Module {
            inner: Arc::new(Inner {
                options,
                controller,
                state: Mutex::new(ModuleState {
                    model: Tagged::new(initial),
                    records: Vec::new(),
                    annotations: Vec::new(),
                    published: Arc::new(Vec::new()),
                    queue: DispatchQueue::new(),
                    revision: 0,
                }),
                gate: Mutex::new(()),
                listeners: Mutex::new((0, Vec::new())),
                revision,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.inner.options
    }

    /// Start one invocation of `action`. The optimistic pass has been
    /// committed when this returns; the handle resolves once the invocation
    /// has settled, and never with an error.
    pub fn dispatch(&self, action: &str, payload: Value) -> DispatchHandle {
        dispatch::dispatch(self, action, payload)
    }

    /// Dispatch the mount action, if the controller has one.
    pub fn mount(&self, payload: Value) -> Option<DispatchHandle> {
        self.inner
            .controller
            .has(MOUNT)
            .then(|| self.dispatch(MOUNT, payload))
    }

    /// Dispatch the unmount action, if the controller has one.
    pub fn unmount(&self) -> Option<DispatchHandle> {
        self.inner
            .controller
            .has(UNMOUNT)
            .then(|| self.dispatch(UNMOUNT, Value::Null))
    }

    pub fn broadcast_actions(&self) -> Vec<String> {
        self.inner.controller.broadcast_actions()
    }

    pub fn current_state(&self) -> Arc<Value> {
        lock(&self.inner.state).model.snapshot()
    }

    pub fn current_mutations(&self) -> Arc<Vec<MutationRecord>> {
        lock(&self.inner.state).published.clone()
    }

    /// State and records, taken at the same instant.
    pub fn inspect(&self) -> View {
        let state = lock(&self.inner.state);
        View::new(state.model.snapshot(), state.published.clone())
    }

    pub fn is(&self, path: &Path, flags: Status) -> bool {
        optimist_core::is(&self.current_mutations(), path, flags)
    }

    /// Remove annotations on `path`. Returns whether there were any.
    pub fn dismiss(&self, path: &Path) -> bool {
        let revision = {
            let mut state = lock(&self.inner.state);
            let before = state.annotations.len();
            state.annotations.retain(|a| &a.path != path);
            if state.annotations.len() == before {
                return false;
            }
            state.bump()
        };
        debug!(module = %self.name(), %path, "dismissed annotations");
        self.inner.notify(Change::Dismissed {
            path: path.clone(),
            revision,
        });
        true
    }

    /// Ask every queued invocation to abort.
    pub fn abort_all(&self) {
        lock(&self.inner.state).queue.abort_all();
    }

    /// Queued invocations in admission order.
    pub fn queued(&self) -> Vec<(ProcessToken, String)> {
        lock(&self.inner.state).queue.entries()
    }

    pub fn is_queued(&self, process: ProcessToken) -> bool {
        lock(&self.inner.state).queue.contains(process)
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.inner.state).queue.len() == 0
    }

    /// Receiver of the revision number, bumped at every commit point.
    pub fn revision(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn on_change(&self, listener: impl Fn(&Change) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = lock(&self.inner.listeners);
        listeners.0 += 1;
        let id = ListenerId(listeners.0);
        listeners.1.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        lock(&self.inner.listeners).1.retain(|(i, _)| *i != id);
    }

    pub(crate) fn admit(&self, process: ProcessToken, action: &str, abort: AbortSignal) -> (u64, watch::Sender<bool>) {
        lock(&self.inner.state).queue.admit(process, action, abort)
    }
}
