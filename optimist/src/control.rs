//! Building blocks the dispatch pipeline is driven by.
//!
//! [`effect::Effect`] is a deferred asynchronous computation, started at
//! most once. [`queue::DispatchQueue`] orders the invocations of one module.

pub mod effect;
pub(crate) mod queue;
