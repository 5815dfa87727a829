//! Completion-ordered task collection.
//!
//! Wraps an [`Executor`] so that finished tasks surface in the order they
//! complete, not the order they were submitted. Each submitted job becomes
//! a [`Task`]; when its run finishes (normally, exceptionally, or
//! cancelled), the executing thread pushes the task onto a lock-free
//! completion queue and wakes one registered receiver.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kavsak_queue::LinkedQueue;
use kavsak_sync::{Interrupted, InterruptHandle, Signal};

use crate::executor::Executor;
use crate::task::{BoxError, Task};

struct Shared<T: 'static> {
    completed: LinkedQueue<Arc<Task<T>>>,
    /// Threads blocked in `take`, woken one per completion.
    receivers: Mutex<VecDeque<Arc<Signal>>>,
}

/// Decouples producing tasks from consuming their results.
pub struct CompletionService<T: 'static, E> {
    executor: E,
    shared: Arc<Shared<T>>,
}

impl<T, E> CompletionService<T, E>
where
    T: Send + Sync + 'static,
    E: Executor,
{
    /// Creates a service running its jobs on `executor`.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            shared: Arc::new(Shared {
                completed: LinkedQueue::new(),
                receivers: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Submits a job and returns a handle to its future outcome.
    ///
    /// The handle supports `get`, `cancel`, and friends directly; the same
    /// handle will also come back out of [`take`](Self::take) once the run
    /// finishes.
    pub fn submit<F>(&self, job: F) -> Arc<Task<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        let task = Arc::new(Task::new(job));
        let handle = task.clone();
        let shared = self.shared.clone();
        self.executor.execute(Box::new(move || {
            handle.run();
            shared.completed.push(handle);
            let receiver = shared.receivers.lock().unwrap().pop_front();
            if let Some(receiver) = receiver {
                receiver.notify();
            }
        }));
        task
    }

    /// Removes the next completed task without blocking.
    pub fn poll(&self) -> Option<Arc<Task<T>>> {
        self.shared.completed.pop()
    }

    /// Blocks until some task completes and returns it.
    pub fn take(&self) -> Result<Arc<Task<T>>, Interrupted> {
        self.await_completed(None).map(|t| t.unwrap())
    }

    /// Bounded [`take`](Self::take): `Ok(None)` if nothing completes
    /// within `timeout`.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<Arc<Task<T>>>, Interrupted> {
        self.await_completed(Some(Instant::now() + timeout))
    }

    fn await_completed(
        &self,
        give_up: Option<Instant>,
    ) -> Result<Option<Arc<Task<T>>>, Interrupted> {
        let interrupt = InterruptHandle::current();
        loop {
            if let Some(task) = self.shared.completed.pop() {
                return Ok(Some(task));
            }
            if interrupt.take_interrupted() {
                return Err(Interrupted);
            }

            let signal = Arc::new(Signal::new());
            self.shared.receivers.lock().unwrap().push_back(signal.clone());
            // A completion may have slipped in before we registered.
            if let Some(task) = self.shared.completed.pop() {
                self.withdraw(&signal);
                return Ok(Some(task));
            }

            let notified = loop {
                if signal.is_notified() {
                    break true;
                }
                if interrupt.is_interrupted() {
                    break false;
                }
                match give_up {
                    None => thread::park(),
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            break false;
                        }
                        thread::park_timeout(d - now);
                    }
                }
            };
            if !notified {
                self.withdraw(&signal);
                if !interrupt.is_interrupted() {
                    // Timed out; one last look before giving up.
                    return Ok(self.shared.completed.pop());
                }
            }
        }
    }

    /// Deregisters `signal`; if a completion already consumed it, passes
    /// the wakeup to the next receiver so it is not lost.
    fn withdraw(&self, signal: &Arc<Signal>) {
        let mut receivers = self.shared.receivers.lock().unwrap();
        if let Some(pos) = receivers.iter().position(|s| Arc::ptr_eq(s, signal)) {
            receivers.remove(pos);
        } else if signal.is_notified() {
            if let Some(next) = receivers.pop_front() {
                next.notify();
            }
        }
    }
}
