//! Cooperative cancellation.
//!
//! A single [`CancellationToken`] is threaded through each pipeline run.
//! Stage executors check it before contacting nodes and race it against
//! in-flight node calls and backoff sleeps.

mod token;

pub use token::{CancelCallback, CancellationToken};
