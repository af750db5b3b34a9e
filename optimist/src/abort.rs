use std::{
    error::Error,
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Per-invocation abort flag. Cloning shares the flag.
///
/// Aborting does not cancel effects that are already running; the pipeline
/// checks the flag before starting effects and before each confirmation.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

/// Returned by [`AbortSignal::check_aborted`]. The pipeline tells an abort
/// apart from a failed confirmation by downcasting to this.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbortedError;

impl Display for AbortedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invocation aborted")
    }
}

impl Error for AbortedError {}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn check_aborted(&self) -> anyhow::Result<()> {
        if self.is_aborted() {
            Err(AbortedError.into())
        } else {
            Ok(())
        }
    }
}
