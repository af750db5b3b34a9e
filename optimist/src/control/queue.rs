//! Admission order of the invocations of one module.

use crate::abort::AbortSignal;
use optimist_core::ProcessToken;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// Position of a task in its queue. Later admissions get larger numbers.
pub(crate) type Seq = u64;

struct QueuedTask {
    process: ProcessToken,
    action: String,
    /// Raised once the task's optimistic pass has been committed
    optimistic: watch::Receiver<bool>,
    abort: AbortSignal,
}

/// Live invocations of one module, keyed by admission order.
///
/// A task stays in the queue from admission until it has settled. The
/// pipeline uses [`DispatchQueue::predecessors`] to wait for exactly the
/// tasks admitted before it, never for itself or later ones.
pub(crate) struct DispatchQueue {
    next: Seq,
    tasks: BTreeMap<Seq, QueuedTask>,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        DispatchQueue {
            next: 0,
            tasks: BTreeMap::new(),
        }
    }

    /// Register a task. The returned sender raises its optimistic flag.
    pub(crate) fn admit(
        &mut self,
        process: ProcessToken,
        action: &str,
        abort: AbortSignal,
    ) -> (Seq, watch::Sender<bool>) {
        let seq = self.next;
        self.next += 1;
        let (tx, rx) = watch::channel(false);
        self.tasks.insert(
            seq,
            QueuedTask {
                process,
                action: action.to_owned(),
                optimistic: rx,
                abort,
            },
        );
        (seq, tx)
    }

    /// Remove a settled task. Returns whether it was still queued.
    pub(crate) fn retire(&mut self, seq: Seq) -> bool {
        self.tasks.remove(&seq).is_some()
    }

    /// Optimistic flags of every task admitted before `seq`.
    pub(crate) fn predecessors(&self, seq: Seq) -> Vec<watch::Receiver<bool>> {
        self.tasks
            .range(..seq)
            .map(|(_, task)| task.optimistic.clone())
            .collect()
    }

    /// The queued invocations in admission order.
    pub(crate) fn entries(&self) -> Vec<(ProcessToken, String)> {
        self.tasks
            .values()
            .map(|task| (task.process, task.action.clone()))
            .collect()
    }

    pub(crate) fn contains(&self, process: ProcessToken) -> bool {
        self.tasks.values().any(|task| task.process == process)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn abort_all(&self) {
        for task in self.tasks.values() {
            task.abort.abort();
        }
    }
}

/// Wait until every flag in `flags` has been raised. A flag whose sender is
/// gone counts as raised: its task can no longer hold anyone up.
pub(crate) async fn wait_raised(flags: Vec<watch::Receiver<bool>>) {
    for mut flag in flags {
        let _ = flag.wait_for(|raised| *raised).await;
    }
}
