use crate::routine::Routine;
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Dispatched by [`crate::Module::mount`].
pub const MOUNT: &str = "mount";
/// Dispatched by [`crate::Module::unmount`].
pub const UNMOUNT: &str = "unmount";

type Factory = Box<dyn Fn(&Value, &Value) -> Result<Box<dyn Routine>> + Send + Sync>;

struct Handler {
    factory: Factory,
    broadcast: bool,
}

/// Registry of transition routines, by action name.
///
/// A factory receives the action payload and the current state and returns
/// a fresh routine for one invocation.
#[derive(Default)]
pub struct Controller {
    handlers: BTreeMap<String, Handler>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unicast action: only dispatches on the owning module
    /// reach it.
    pub fn on<R, F>(self, action: &str, factory: F) -> Self
    where
        R: Routine + 'static,
        F: Fn(&Value, &Value) -> Result<R> + Send + Sync + 'static,
    {
        self.register(action, factory, false)
    }

    /// Register a broadcast action: an [`crate::App`] delivers it to every
    /// attached module that registered it.
    pub fn on_broadcast<R, F>(self, action: &str, factory: F) -> Self
    where
        R: Routine + 'static,
        F: Fn(&Value, &Value) -> Result<R> + Send + Sync + 'static,
    {
        self.register(action, factory, true)
    }

    fn register<R, F>(mut self, action: &str, factory: F, broadcast: bool) -> Self
    where
        R: Routine + 'static,
        F: Fn(&Value, &Value) -> Result<R> + Send + Sync + 'static,
    {
        let factory: Factory = Box::new(move |payload, model| {
            let routine: Box<dyn Routine> = Box::new(factory(payload, model)?);
            Ok(routine)
        });
        self.handlers
            .insert(action.to_owned(), Handler { factory, broadcast });
        self
    }

    pub fn has(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn broadcast_actions(&self) -> Vec<String> {
        self.handlers
            .iter()
            .filter(|(_, h)| h.broadcast)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// A routine for one invocation of `action`.
    pub fn routine(&self, action: &str, payload: &Value, model: &Value) -> Result<Box<dyn Routine>> {
        match self.handlers.get(action) {
            Some(handler) => (handler.factory)(payload, model),
            None => bail!("no routine registered for action {:?}", action),
        }
    }
}
