//! The dispatch pipeline: one action invocation from admission to
//! settlement.
//!
//! 1. Admit: mint a process token and queue the invocation.
//! 2. First pass: drive the routine, collecting its effects without
//!    starting them, then apply its transform. If there were effects, the
//!    resulting changes become pending mutation records.
//! 3. Wait until every invocation admitted earlier has committed its first
//!    pass. The module's gate serializes first passes, which is what
//!    provides this ordering; the wait itself never blocks.
//! 4. Run all effects concurrently and wait for every one of them.
//! 5. Apply each confirmation, in settlement or declaration order.
//! 6. Settle: retract this invocation's records and leave the queue, no
//!    matter what happened before.
//!
//! Steps 1 and 2 run inside [`crate::Module::dispatch`]. Listeners hear
//! about the optimistic commit after the gate is released, so they may
//! dispatch. The rest runs on a spawned task, unless the routine had no
//! effects, in which case the invocation settles right away.

use crate::{
    abort::{AbortSignal, AbortedError},
    control::{
        effect::Effect,
        queue::{wait_raised, Seq},
    },
    maybe::Maybe,
    module::{lock, Change, ConfirmOrder, Inner, Module, Phase},
    routine::{Confirm, Draft, Io, Step, Transform},
};
use anyhow::{bail, Context as _, Result};
use futures_util::{stream::FuturesUnordered, StreamExt as _};
use optimist_core::{diff_with, project, DiffOptions, MutationRecord, ProcessToken, Status};
use serde_json::Value;
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, trace, warn, Instrument as _};

/// How an invocation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every confirmation was applied. `faults` effects were rejected; their
    /// confirmations decided what that means for the state.
    Completed { faults: usize },
    /// Aborted before all confirmations were applied.
    Aborted,
    /// The routine, a transform or the pipeline itself failed.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub process: ProcessToken,
    pub outcome: Outcome,
}

enum HandleState {
    Ready(Option<Settlement>),
    Running(JoinHandle<Settlement>),
}

/// Completion handle of one invocation. Resolves once the invocation has
/// settled; it never fails.
pub struct DispatchHandle {
    process: ProcessToken,
    abort: AbortSignal,
    state: HandleState,
}

impl DispatchHandle {
    pub fn process(&self) -> ProcessToken {
        self.process
    }

    /// Skip the confirmations that have not been applied yet. Effects that
    /// are already running are not cancelled. The invocation still settles.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }
}

impl Future for DispatchHandle {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Settlement> {
        let this = self.get_mut();
        let process = this.process;
        match &mut this.state {
            HandleState::Ready(settlement) => Poll::Ready(settlement.take().unwrap_or(Settlement {
                process,
                outcome: Outcome::Failed("dispatch handle polled after completion".to_owned()),
            })),
            HandleState::Running(join) => Pin::new(join).poll(cx).map(|joined| match joined {
                Ok(settlement) => settlement,
                Err(e) => Settlement {
                    process,
                    outcome: Outcome::Failed(format!("dispatch task failed: {}", e)),
                },
            }),
        }
    }
}

pub(crate) fn dispatch(module: &Module, action: &str, payload: Value) -> DispatchHandle {
    let inner = &module.inner;
    let process = ProcessToken::mint();
    let abort = AbortSignal::new();
    let span = info_span!(
        "dispatch",
        module = %inner.options.name,
        action,
        process = process.num()
    );

    let (seq, first) = {
        let _enter = span.enter();
        let _gate = lock(&inner.gate);
        let (seq, optimistic) = module.admit(process, action, abort.clone());
        let first = std::panic::catch_unwind(AssertUnwindSafe(|| {
            first_pass(inner, process, action, &payload)
        }))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("routine for {:?} panicked", action)));
        // Raised even on failure, so later invocations are not held up.
        optimistic.send_replace(true);
        (seq, first)
    };

    let ios = match first {
        Ok((ios, revision)) => {
            let _enter = span.enter();
            if let Some(revision) = revision {
                inner.notify(Change::Committed {
                    process,
                    phase: Phase::Optimistic,
                    revision,
                });
            }
            if ios.is_empty() {
                return ready(inner, process, abort, seq, Outcome::Completed { faults: 0 });
            }
            ios
        }
        Err(e) => {
            let _enter = span.enter();
            report(inner, process, &e);
            return ready(inner, process, abort, seq, Outcome::Failed(format!("{:#}", e)));
        }
    };

    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _enter = span.enter();
            let e = anyhow::Error::new(e).context("cannot run effects outside of a tokio runtime");
            report(inner, process, &e);
            return ready(inner, process, abort, seq, Outcome::Failed(format!("{:#}", e)));
        }
    };

    let pipeline = Pipeline {
        guard: SettleGuard {
            inner: inner.clone(),
            process,
            seq,
            armed: true,
        },
        abort: abort.clone(),
        errors: Vec::new(),
        faults: 0,
        aborted: false,
    };
    let join = runtime.spawn(pipeline.run(ios).instrument(span));
    DispatchHandle {
        process,
        abort,
        state: HandleState::Running(join),
    }
}

/// Settle an invocation that never left the first pass.
fn ready(
    inner: &Arc<Inner>,
    process: ProcessToken,
    abort: AbortSignal,
    seq: Seq,
    outcome: Outcome,
) -> DispatchHandle {
    settle(inner, process, seq, outcome.clone());
    DispatchHandle {
        process,
        abort,
        state: HandleState::Ready(Some(Settlement { process, outcome })),
    }
}

/// Drive the routine and commit its transform. Returns the effects and the
/// revision of the optimistic commit, if anything changed.
fn first_pass(
    inner: &Inner,
    process: ProcessToken,
    action: &str,
    payload: &Value,
) -> Result<(Vec<Io>, Option<u64>)> {
    let model = lock(&inner.state).model.snapshot();
    let mut routine = inner.controller.routine(action, payload, &model)?;
    let mut ios = Vec::new();
    let transform = loop {
        match routine.resume(&model)? {
            Step::Suspended(io) => {
                if ios.len() >= inner.options.max_effects {
                    bail!(
                        "routine for {:?} suspended more than {} times",
                        action,
                        inner.options.max_effects
                    );
                }
                ios.push(io);
            }
            Step::Completed(transform) => break transform,
        }
    };
    debug!(effects = ios.len(), "first pass complete");
    let revision = commit(inner, process, transform, !ios.is_empty())?;
    Ok((ios, revision))
}

/// Apply `transform` to the current state and commit the result. When
/// `track` is set, the changes become pending records of `process`.
///
/// Returns the new revision, or `None` if nothing changed. On error nothing
/// has been written.
fn commit(inner: &Inner, process: ProcessToken, transform: Transform, track: bool) -> Result<Option<u64>> {
    let mut state = lock(&inner.state);
    let mut draft = Draft::new(state.model.value().clone());
    transform(&mut draft)?;
    let (value, annotations) = draft.into_parts();

    let next = state.model.retag(value);
    let options = DiffOptions {
        max_depth: inner.options.max_depth,
    };
    let delta = diff_with(options, &state.model, &next)?;
    if delta.is_none() && annotations.is_empty() {
        return Ok(None);
    }

    if let Some(delta) = &delta {
        trace!(delta = %delta.to_json(), "computed delta");
        let records = project(process, delta);
        // A change to an annotated path supersedes the annotation.
        state
            .annotations
            .retain(|a| !records.iter().any(|r| r.is_direct() && r.path.is_related(&a.path)));
        if track {
            state.records.extend(records);
        }
        state.model = next;
    }
    for (path, status) in annotations {
        let status = if status.target().is_empty() {
            status | Status::DIRECT
        } else {
            status
        };
        state.annotations.retain(|a| a.path != path);
        state.annotations.push(MutationRecord {
            path,
            status,
            value: None,
            process: ProcessToken::mint(),
        });
    }
    let revision = state.bump();
    debug!(revision, records = state.records.len(), "committed");
    Ok(Some(revision))
}

fn report(inner: &Inner, process: ProcessToken, e: &anyhow::Error) {
    error!("{:#}", e);
    inner.notify(Change::Failed {
        process,
        error: format!("{:#}", e),
    });
}

/// Retract the records of `process` and take it off the queue.
fn settle(inner: &Inner, process: ProcessToken, seq: Seq, outcome: Outcome) {
    let revision = {
        let mut state = lock(&inner.state);
        let before = state.records.len();
        state.records.retain(|r| r.process != process);
        state.queue.retire(seq);
        if state.records.len() != before {
            state.bump()
        } else {
            state.revision
        }
    };
    debug!(?outcome, "settled");
    inner.notify(Change::Settled {
        process,
        outcome,
        revision,
    });
}

/// Settles the invocation if the pipeline task is dropped or panics before
/// settling on its own.
struct SettleGuard {
    inner: Arc<Inner>,
    process: ProcessToken,
    seq: Seq,
    armed: bool,
}

impl SettleGuard {
    fn settle(mut self, outcome: Outcome) {
        self.armed = false;
        settle(&self.inner, self.process, self.seq, outcome);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("dispatch task ended before settling");
            settle(
                &self.inner,
                self.process,
                self.seq,
                Outcome::Failed("dispatch task ended before settling".to_owned()),
            );
        }
    }
}

/// Everything after the first pass.
struct Pipeline {
    guard: SettleGuard,
    abort: AbortSignal,
    errors: Vec<anyhow::Error>,
    faults: usize,
    aborted: bool,
}

impl Pipeline {
    async fn run(mut self, ios: Vec<Io>) -> Settlement {
        // The gate ran every earlier first pass to completion before this
        // one, so their flags are already up and this does not block.
        let predecessors = lock(&self.guard.inner.state).queue.predecessors(self.guard.seq);
        wait_raised(predecessors).await;

        let (effects, confirms): (Vec<Effect>, Vec<Confirm>) =
            ios.into_iter().map(|io| (io.effect, io.confirm)).unzip();
        let mut confirms: Vec<Option<Confirm>> = confirms.into_iter().map(Some).collect();

        if let Err(e) = self.abort.check_aborted() {
            debug!("{}, effects not started", e);
            self.aborted = true;
        } else {
            match self.guard.inner.options.confirm_order {
                ConfirmOrder::Settlement => {
                    let mut settling: FuturesUnordered<_> = effects
                        .iter()
                        .enumerate()
                        .map(|(index, effect)| async move { (index, effect.force().await.clone()) })
                        .collect();
                    while let Some((index, result)) = settling.next().await {
                        let confirm = confirms[index].take();
                        self.settle_effect(index, confirm, Maybe::from(&result));
                    }
                }
                ConfirmOrder::Declaration => {
                    let results = Effect::force_all(&effects).await;
                    for (index, result) in results.iter().enumerate() {
                        let confirm = confirms[index].take();
                        self.settle_effect(index, confirm, Maybe::from(result));
                    }
                }
            }
        }

        let outcome = if let Some(e) = self.errors.first() {
            Outcome::Failed(format!("{:#}", e))
        } else if self.aborted {
            Outcome::Aborted
        } else {
            Outcome::Completed {
                faults: self.faults,
            }
        };
        let process = self.guard.process;
        self.guard.settle(outcome.clone());
        Settlement { process, outcome }
    }

    fn settle_effect(&mut self, index: usize, confirm: Option<Confirm>, settled: Maybe<Value>) {
        if let Some(e) = settled.fault() {
            warn!(effect = index, "effect failed: {:#}", e);
            self.faults += 1;
        }
        if let Err(e) = self.confirm(index, confirm, settled) {
            if e.is::<AbortedError>() {
                debug!(effect = index, "{:#}, confirmation skipped", e);
                self.aborted = true;
            } else {
                report(&self.guard.inner, self.guard.process, &e);
                self.errors.push(e);
            }
        }
    }

    fn confirm(&self, index: usize, confirm: Option<Confirm>, settled: Maybe<Value>) -> Result<()> {
        self.abort.check_aborted()?;
        let Some(confirm) = confirm else {
            return Ok(());
        };
        let inner = &self.guard.inner;
        let process = self.guard.process;
        let transform: Transform = Box::new(move |draft: &mut Draft| confirm(settled, draft));
        let committed = commit(inner, process, transform, false)
            .with_context(|| format!("confirming effect {}", index))?;
        if let Some(revision) = committed {
            inner.notify(Change::Committed {
                process,
                phase: Phase::Confirmed { effect: index },
                revision,
            });
        }
        Ok(())
    }
}
