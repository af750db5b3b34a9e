use serde::Serialize;
use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_PROCESS: AtomicU64 = AtomicU64::new(1);

/// Identifies one dispatched action invocation, and with it every mutation
/// record that invocation produced, so they can be retracted as a unit.
///
/// Tokens are only obtained from [`ProcessToken::mint`]; there is no way to
/// construct one from a number, so records cannot be claimed by accident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ProcessToken {
    id: u64,
}

impl ProcessToken {
    pub fn mint() -> Self {
        ProcessToken {
            id: NEXT_PROCESS.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn num(&self) -> u64 {
        self.id
    }
}

impl Display for ProcessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "process#{}", self.id)
    }
}
