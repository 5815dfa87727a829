//! Pluggable job execution.

use std::thread;

/// Runs submitted jobs. Implementations decide where and when: dedicated
/// threads, a pool, or inline on the caller.
pub trait Executor: Send + Sync {
    /// Accepts a job for execution. Must not drop it silently.
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Spawns one thread per job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        thread::spawn(job);
    }
}

/// Runs the job on the submitting thread, before `execute` returns.
///
/// Useful in tests and wherever submission-order completion matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        job();
    }
}
