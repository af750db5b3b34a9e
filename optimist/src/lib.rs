//! Optimistic state synchronization.
//!
//! A [`Module`] owns a JSON state tree. Dispatching an action runs a
//! [`Routine`] whose state change is committed immediately, before any of
//! its effects have run. The change is projected into mutation records
//! ([`MutationRecord`]) that describe what is still pending, so a renderer
//! can show "adding", "removing" and friends for every path of the tree.
//! Once the effects settle, their confirmations replace the optimistic
//! guesses and the records are retracted.
//!
//! The pure parts (identity tagging, diffing, projection and status
//! queries) live in `optimist-core` and are re-exported here.

pub mod abort;
pub mod app;
pub mod control;
pub mod controller;
pub mod dispatch;
pub mod maybe;
pub mod module;
pub mod routine;

pub use abort::{AbortSignal, AbortedError};
pub use app::App;
pub use control::effect::{Effect, EffectResult, Fault};
pub use controller::{Controller, MOUNT, UNMOUNT};
pub use dispatch::{DispatchHandle, Outcome, Settlement};
pub use maybe::Maybe;
pub use module::{Change, ConfirmOrder, ListenerId, Module, ModuleOptions, Phase};
pub use routine::{from_fn, Confirm, Draft, Io, Routine, Step, Script, Transform};

pub use optimist_core::{
    diff, diff_with, is, path, project, tag, to_patch, Cursor, Delta, DiffOptions, MutationRecord,
    Path, ProcessToken, Segment, Status, Tagged, View,
};
