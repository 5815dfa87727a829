//! Cancellable tasks for Kavsak.
//!
//! ## Features
//!
//! - `Task`: a one-shot future cell around a fallible computation, with
//!   at-most-once execution, cancellation (optionally interrupting the
//!   running thread), and blocking or timed result retrieval from any
//!   number of threads.
//! - `CompletionService`: runs submitted jobs on a pluggable [`Executor`]
//!   and hands back finished tasks in completion order.
//!
//! ## Usage
//!
//! ```rust
//! use kavsak_task::Task;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let task = Arc::new(Task::new(|| Ok(6 * 7)));
//! let runner = task.clone();
//! thread::spawn(move || runner.run());
//! assert_eq!(task.get().unwrap(), 42);
//! ```

#![warn(missing_docs)]

pub mod completion;
pub mod executor;
pub mod task;

pub use completion::CompletionService;
pub use executor::{DirectExecutor, Executor, ThreadExecutor};
pub use task::{BoxError, Task, TaskError};
