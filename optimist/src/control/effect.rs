//! Module for deferred effects, [`Effect`].
use anyhow::Result;
use futures_util::{future::BoxFuture, FutureExt as _};
use serde_json::Value;
use std::{error::Error, fmt::Display, future::Future, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{Mutex, OnceCell};

/// What an effect settled with. Cloneable so the outcome can be both logged
/// and handed to a confirmation.
pub type EffectResult = std::result::Result<Value, Fault>;

/// A rejected effect.
#[derive(Clone, Debug)]
pub struct Fault(Arc<anyhow::Error>);

impl Fault {
    pub fn new(error: anyhow::Error) -> Self {
        Fault(Arc::new(error))
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}
impl Error for Fault {}

type Start = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

/// An asynchronous effect that is not started until it is forced.
///
/// Routines hand effects to the pipeline during the first pass, long before
/// the pipeline decides to run them. Forcing runs the effect once and
/// remembers its outcome; a panicking effect settles as a [`Fault`].
pub struct Effect {
    state: Arc<EffectState>,
}
impl Effect {
    /// Create an effect that calls `start` when forced.
    pub fn new<F, Fut>(start: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let start: Start = Box::new(move || start().boxed());
        Effect {
            state: Arc::new(EffectState {
                cell: OnceCell::new(),
                start: Mutex::new(Some(start)),
            }),
        }
    }

    /// An effect that resolves immediately.
    pub fn ready(value: Value) -> Self {
        Effect::new(move || async move { Ok(value) })
    }

    /// An effect that rejects immediately.
    pub fn fail(error: anyhow::Error) -> Self {
        Effect::new(move || async move { Err(error) })
    }

    pub fn is_settled(&self) -> bool {
        self.state.cell.initialized()
    }

    /// Force the effect. It is started only on the first call; later calls
    /// return the remembered outcome.
    pub async fn force(&self) -> &EffectResult {
        self.state.force().await
    }

    /// Force all effects concurrently and wait for every one of them,
    /// regardless of rejections. Outcomes are in the order of `effects`.
    pub async fn force_all(effects: &[Effect]) -> Vec<EffectResult> {
        futures_util::future::join_all(effects.iter().map(|e| async move { e.force().await.clone() }))
            .await
    }
}
impl Clone for Effect {
    fn clone(&self) -> Self {
        Effect {
            state: self.state.clone(),
        }
    }
}

struct EffectState {
    /// The outcome, once the effect has settled
    cell: OnceCell<EffectResult>,
    /// Taken by whichever caller ends up running the effect
    start: Mutex<Option<Start>>,
}
impl EffectState {
    async fn force(&self) -> &EffectResult {
        self.cell
            .get_or_init(|| async {
                let start = self.start.lock().await.take();
                match start {
                    Some(start) => match AssertUnwindSafe(async move { start().await })
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result.map_err(Fault::new),
                        Err(_) => Err(Fault::new(anyhow::anyhow!("effect panicked"))),
                    },
                    None => Err(Fault::new(anyhow::anyhow!("effect was started twice"))),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// The effect runs only once, and later forces see the same outcome.
    #[tokio::test]
    async fn effect() {
        let has_run = Arc::new(AtomicBool::new(false));
        let e = Effect::new(move || async move {
            if has_run.swap(true, Ordering::SeqCst) {
                panic!("effect was forced twice");
            }
            Ok(json!(42))
        });

        let v1 = e.force().await.clone().unwrap();
        let v2 = e.force().await.clone().unwrap();
        assert_eq!(v1, v2);
    }

    /// Same, through a clone.
    #[tokio::test]
    async fn effect_cloned() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let e = Effect::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("x"))
        });

        let e2 = e.clone();
        e.force().await.as_ref().unwrap();
        e2.force().await.as_ref().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(e2.is_settled());
    }

    #[tokio::test]
    async fn effect_is_lazy() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let e = Effect::new(move || {
            flag.store(true, Ordering::SeqCst);
            async { Ok(Value::Null) }
        });
        tokio::task::yield_now().await;
        assert!(!started.load(Ordering::SeqCst));
        assert!(!e.is_settled());
        e.force().await.as_ref().unwrap();
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn effect_panic_is_fault() {
        let e = Effect::new(|| async {
            let missing: Option<Value> = None;
            Ok(missing.expect("boom"))
        });
        let err = e.force().await.clone().unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn force_all_waits_for_every_effect() {
        let slow = Effect::new(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!("slow"))
        });
        let failed = Effect::fail(anyhow::anyhow!("nope"));
        let outcomes = Effect::force_all(&[slow, failed, Effect::ready(json!(1))]).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].as_ref().unwrap(), &json!("slow"));
        assert_eq!(outcomes[1].as_ref().unwrap_err().to_string(), "nope");
        assert_eq!(outcomes[2].as_ref().unwrap(), &json!(1));
    }
}
