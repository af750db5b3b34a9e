//! Pure parts of the optimist engine.
//!
//! Nothing in this crate suspends or performs I/O. The runtime in the
//! `optimist` crate drives these pieces from its dispatch pipeline:
//!
//! - [`tag`]: stable identity for object and array nodes of a state tree
//! - [`diff`]: structural deltas between two tagged snapshots
//! - [`project`]: flattening a delta into [`project::MutationRecord`]s
//! - [`query`]: answering "is this path pending/adding/..." for a view

pub mod diff;
pub mod path;
pub mod process;
pub mod project;
pub mod query;
pub mod status;
pub mod tag;

pub use diff::{diff, diff_with, ArrayEntry, DeltaFormatError, DepthExceeded, Delta, DiffOptions};
pub use path::{Path, Segment};
pub use process::ProcessToken;
pub use project::{project, to_patch, MutationRecord};
pub use query::{is, Cursor, View};
pub use status::Status;
pub use tag::{tag, Tagged, Tags, Token};
