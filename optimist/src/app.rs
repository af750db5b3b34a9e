use crate::module::{lock, Module};
use anyhow::Context as _;
use pubsub_rs::Pubsub;
use serde_json::Value;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument as _};

/// App-wide bus for broadcast actions.
///
/// Every attached module receives the broadcast actions its controller
/// registered with [`crate::Controller::on_broadcast`]. Unicast actions are
/// never delivered through the bus.
pub struct App {
    bus: Pubsub<String, Value>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub fn new() -> Self {
        App {
            bus: Pubsub::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Start delivering broadcasts to `module`. Must be called from within a
    /// tokio runtime. Modules without broadcast actions are not subscribed.
    pub async fn attach(&self, module: &Module) {
        let actions = module.broadcast_actions();
        if actions.is_empty() {
            return;
        }
        let rx = self.bus.subscribe(actions).await;
        let module = module.clone();
        let span = info_span!("broadcast listener", module = %module.name());
        let listener = tokio::spawn(
            async move {
                while let Ok((action, payload)) = rx.recv().await.context("receiving broadcast") {
                    debug!(action = %action, "delivering broadcast");
                    // Settles on its own; nobody waits for it here.
                    module.dispatch(&action, payload);
                }
            }
            .instrument(span),
        );
        lock(&self.listeners).push(listener);
    }

    /// Dispatch `action` on every attached module that registered it.
    pub async fn broadcast(&self, action: &str, payload: Value) {
        self.bus.publish(action.to_owned(), payload).await;
    }
}

impl Default for App {
    fn default() -> Self {
        App::new()
    }
}

impl Drop for App {
    fn drop(&mut self) {
        for listener in lock(&self.listeners).drain(..) {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{controller::Controller, module::ModuleOptions, routine::Script};
    use serde_json::json;
    use std::time::Duration;

    fn counter(name: &str) -> Module {
        let controller = Controller::new()
            .on_broadcast("tick", |payload, _| {
                let by = payload.as_i64().unwrap_or(1);
                Ok(Script::new().produce(move |draft| {
                    let n = draft["n"].as_i64().unwrap_or(0);
                    draft["n"] = json!(n + by);
                    Ok(())
                }))
            })
            .on("reset", |_, _| {
                Ok(Script::new().produce(|draft| {
                    draft["n"] = json!(0);
                    Ok(())
                }))
            });
        let options = ModuleOptions {
            name: name.to_owned(),
            ..Default::default()
        };
        Module::new(options, controller, json!({"n": 0}))
    }

    #[tokio::test]
    async fn broadcast_reaches_every_attached_module() {
        let app = App::new();
        let (a, b) = (counter("a"), counter("b"));
        app.attach(&a).await;
        app.attach(&b).await;
        let (mut ra, mut rb) = (a.revision(), b.revision());

        app.broadcast("tick", json!(2)).await;
        tokio::time::timeout(Duration::from_secs(5), ra.changed())
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rb.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.current_state()["n"], json!(2));
        assert_eq!(b.current_state()["n"], json!(2));
    }

    #[tokio::test]
    async fn unicast_actions_stay_local() {
        let app = App::new();
        let a = counter("a");
        app.attach(&a).await;
        a.dispatch("tick", json!(5)).await;
        let mut revision = a.revision();
        revision.borrow_and_update();

        app.broadcast("reset", Value::Null).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!revision.has_changed().unwrap());
        assert_eq!(a.current_state()["n"], json!(5));
    }
}
