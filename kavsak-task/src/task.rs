//! Cancellable future cell.
//!
//! A [`Task`] holds one asynchronous computation and its eventual outcome.
//! The state machine moves `NEW → COMPLETING → {NORMAL | EXCEPTIONAL}`,
//! or `NEW → CANCELLED`, or `NEW → INTERRUPTING → INTERRUPTED`, exactly
//! once; `COMPLETING` and `INTERRUPTING` are transient and readers spin
//! through them. The outcome slot is written strictly before the terminal
//! state is release-published, so a reader that observes a terminal state
//! also observes the outcome.
//!
//! Blocked `get` callers push waiter records onto a lock-free stack; the
//! completing thread detaches the whole stack with one swap and walks it
//! privately, waking each thread, so wakeup never contends with new
//! arrivals.

use std::cell::UnsafeCell;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use kavsak_sync::InterruptHandle;

const NEW: u8 = 0;
const COMPLETING: u8 = 1;
const NORMAL: u8 = 2;
const EXCEPTIONAL: u8 = 3;
const CANCELLED: u8 = 4;
const INTERRUPTING: u8 = 5;
const INTERRUPTED: u8 = 6;

/// Boxed failure cause produced by a task computation.
pub type BoxError = Box<dyn Error + Send + Sync>;

type Failure = Arc<dyn Error + Send + Sync>;
type Job<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send>;

/// Why `get` did not return a value.
///
/// The four kinds are distinguishable by variant, never by message:
/// cancellation is not computation failure, and a timeout is recoverable.
#[derive(Clone)]
pub enum TaskError {
    /// The task was cancelled before a result was produced.
    Cancelled,
    /// The computation itself failed; every `get` caller receives the same
    /// cause.
    Failed(Failure),
    /// The bounded wait elapsed first; the caller may retry.
    Timeout,
    /// The waiting thread was interrupted.
    Interrupted,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Cancelled => write!(f, "task was cancelled"),
            TaskError::Failed(cause) => write!(f, "task computation failed: {}", cause),
            TaskError::Timeout => write!(f, "timed out awaiting task completion"),
            TaskError::Interrupted => write!(f, "interrupted awaiting task completion"),
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Cancelled => write!(f, "Cancelled"),
            TaskError::Failed(cause) => write!(f, "Failed({:?})", cause),
            TaskError::Timeout => write!(f, "Timeout"),
            TaskError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TaskError::Failed(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Failure cause recorded when the computation panicked.
struct PanicFailure(String);

impl PanicFailure {
    fn new(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "opaque panic payload".to_string()
        };
        Self(message)
    }
}

impl fmt::Debug for PanicFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PanicFailure({:?})", self.0)
    }
}

impl fmt::Display for PanicFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task panicked: {}", self.0)
    }
}

impl Error for PanicFailure {}

/// One blocked `get` caller.
///
/// Freed by whichever of owner and completer claims it second, so neither
/// side can ever dereference a freed record.
struct Waiter {
    thread: Thread,
    claimed: AtomicBool,
    next: *mut Waiter,
}

/// A one-shot asynchronous result cell wrapping a computation.
pub struct Task<T> {
    state: AtomicU8,
    job: UnsafeCell<Option<Job<T>>>,
    outcome: UnsafeCell<Option<Result<T, Failure>>>,
    /// Interrupt handle of the thread executing the job, claimed by CAS.
    runner: AtomicPtr<InterruptHandle>,
    /// Set by `cancel(true)` only when it actually invoked `interrupt()`
    /// on a claimed runner; distinguishes a delivered interrupt from an
    /// INTERRUPTED state reached while the runner slot was still empty.
    interrupt_delivered: AtomicBool,
    /// Treiber stack of blocked `get` callers.
    waiters: AtomicPtr<Waiter>,
}

unsafe impl<T: Send> Send for Task<T> {}
unsafe impl<T: Send + Sync> Sync for Task<T> {}

impl<T> Task<T> {
    /// Wraps a computation; nothing runs until [`run`](Self::run).
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        Self {
            state: AtomicU8::new(NEW),
            job: UnsafeCell::new(Some(Box::new(job))),
            outcome: UnsafeCell::new(None),
            runner: AtomicPtr::new(ptr::null_mut()),
            interrupt_delivered: AtomicBool::new(false),
            waiters: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Executes the wrapped computation, unless the task is already
    /// decided or another thread holds the runner claim.
    pub fn run(&self) {
        if self.state.load(Ordering::Acquire) != NEW {
            return;
        }
        let claimed = Arc::into_raw(InterruptHandle::current()) as *mut InterruptHandle;
        if self
            .runner
            .compare_exchange(ptr::null_mut(), claimed, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: never published
            unsafe { drop(Arc::from_raw(claimed)) };
            return;
        }

        if self.state.load(Ordering::Acquire) == NEW {
            // SAFETY: the runner claim makes job access exclusive
            if let Some(job) = unsafe { (*self.job.get()).take() } {
                match panic::catch_unwind(AssertUnwindSafe(job)) {
                    Ok(Ok(value)) => self.complete(Ok(value)),
                    Ok(Err(cause)) => self.complete(Err(cause.into())),
                    Err(payload) => self.complete(Err(Arc::new(PanicFailure::new(payload)))),
                }
            }
        }

        self.finish_run();
    }

    /// A cancel(true) in flight must land its interrupt inside this run:
    /// wait out INTERRUPTING, then consume the flag it delivered so it
    /// cannot leak into whatever this thread does next. A flag the cancel
    /// never delivered (it read the runner slot before our claim became
    /// visible) belongs to someone else and is left alone.
    fn finish_run(&self) {
        let mut state = self.state.load(Ordering::Acquire);
        while state == INTERRUPTING {
            thread::yield_now();
            state = self.state.load(Ordering::Acquire);
        }
        if state == INTERRUPTED && self.interrupt_delivered.load(Ordering::Acquire) {
            InterruptHandle::current().take_interrupted();
        }

        let old = self.runner.swap(ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            // SAFETY: run() installed this pointer
            unsafe { drop(Arc::from_raw(old)) };
        }
    }

    /// Cancels the task. Returns false if it was already decided.
    ///
    /// With `may_interrupt`, the executing thread (if any) is interrupted;
    /// the interrupt is guaranteed to be delivered within the scope of
    /// that execution.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let target = if may_interrupt { INTERRUPTING } else { CANCELLED };
        if self
            .state
            .compare_exchange(NEW, target, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if may_interrupt {
            let runner = self.runner.load(Ordering::Acquire);
            if !runner.is_null() {
                // SAFETY: run() cannot release the handle until it observes
                // INTERRUPTED, which is stored only after this call.
                unsafe { (*runner).interrupt() };
                self.interrupt_delivered.store(true, Ordering::Release);
            }
            self.state.store(INTERRUPTED, Ordering::Release);
        }
        self.finish_completion();
        true
    }

    /// Blocks until the task is decided and reports its outcome.
    pub fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let state = self.await_done(None)?;
        self.report(state)
    }

    /// Bounded [`get`](Self::get); [`TaskError::Timeout`] if the deadline
    /// elapses first.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let state = self.await_done(Some(Instant::now() + timeout))?;
        self.report(state)
    }

    /// Returns true once the task is decided (including cancellation).
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != NEW
    }

    /// Returns true if the task was cancelled before completing.
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) >= CANCELLED
    }

    /// Records the outcome and publishes the terminal state, then wakes
    /// every waiter. Loses to an earlier decision silently.
    fn complete(&self, outcome: Result<T, Failure>) {
        if self
            .state
            .compare_exchange(NEW, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let terminal = if outcome.is_ok() { NORMAL } else { EXCEPTIONAL };
            // SAFETY: the COMPLETING claim makes outcome access exclusive;
            // readers load it only after the release store below.
            unsafe { *self.outcome.get() = Some(outcome) };
            self.state.store(terminal, Ordering::Release);
            self.finish_completion();
        }
    }

    /// Detaches the whole waiter stack with one swap and walks it
    /// privately, waking each thread.
    fn finish_completion(&self) {
        let mut node = self.waiters.swap(ptr::null_mut(), Ordering::AcqRel);
        while !node.is_null() {
            // SAFETY: next and thread are read before the claim swap; the
            // owner frees only after winning the second swap.
            unsafe {
                let next = (*node).next;
                (*node).thread.unpark();
                if (*node).claimed.swap(true, Ordering::AcqRel) {
                    drop(Box::from_raw(node));
                }
                node = next;
            }
        }
    }

    fn await_done(&self, deadline: Option<Instant>) -> Result<u8, TaskError> {
        let interrupt = InterruptHandle::current();
        let mut node: *mut Waiter = ptr::null_mut();
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state > COMPLETING {
                self.release_waiter(node);
                return Ok(state);
            }
            if state == COMPLETING {
                // Outcome write in flight; never treat as final.
                thread::yield_now();
                continue;
            }
            if interrupt.take_interrupted() {
                self.release_waiter(node);
                return Err(TaskError::Interrupted);
            }
            if node.is_null() {
                node = Box::into_raw(Box::new(Waiter {
                    thread: thread::current(),
                    claimed: AtomicBool::new(false),
                    next: ptr::null_mut(),
                }));
                loop {
                    let head = self.waiters.load(Ordering::Acquire);
                    // SAFETY: not yet published
                    unsafe { (*node).next = head };
                    if self
                        .waiters
                        .compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        break;
                    }
                }
                // Re-check before parking: the push may have raced with
                // completion detaching the stack.
                continue;
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        self.release_waiter(node);
                        return Err(TaskError::Timeout);
                    }
                    thread::park_timeout(d - now);
                }
                None => thread::park(),
            }
        }
    }

    /// Owner-side exit from the waiter stack.
    ///
    /// First tries to unlink the record outright: a winning head CAS means
    /// no completion walk can reach it, so it is freed on the spot and a
    /// timed-out caller leaves nothing behind. Mid-stack records fall back
    /// to the claim protocol and stay linked until completion frees them.
    fn release_waiter(&self, node: *mut Waiter) {
        if node.is_null() {
            return;
        }
        // SAFETY: the record cannot be freed before our claim swap, and
        // the unlink attempt happens before that swap.
        unsafe {
            let next = (*node).next;
            if self
                .waiters
                .compare_exchange(node, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                drop(Box::from_raw(node));
                return;
            }
            if (*node).claimed.swap(true, Ordering::AcqRel) {
                drop(Box::from_raw(node));
            }
        }
    }

    fn report(&self, state: u8) -> Result<T, TaskError>
    where
        T: Clone,
    {
        match state {
            // SAFETY: terminal state was acquire-loaded, so the outcome
            // write is visible and the cell is immutable from here on.
            NORMAL => match unsafe { &*self.outcome.get() } {
                Some(Ok(value)) => Ok(value.clone()),
                _ => unreachable!("NORMAL state without success outcome"),
            },
            EXCEPTIONAL => match unsafe { &*self.outcome.get() } {
                Some(Err(cause)) => Err(TaskError::Failed(cause.clone())),
                _ => unreachable!("EXCEPTIONAL state without failure outcome"),
            },
            _ => Err(TaskError::Cancelled),
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        let runner = self.runner.swap(ptr::null_mut(), Ordering::Relaxed);
        if !runner.is_null() {
            // SAFETY: installed by run(), never released
            unsafe { drop(Arc::from_raw(runner)) };
        }
        // Residual waiter records: pushes that raced with the completion
        // detach. Their owners have exited (a blocked owner would hold a
        // borrow of this task).
        let mut node = *self.waiters.get_mut();
        while !node.is_null() {
            // SAFETY: exclusive access
            unsafe {
                let next = (*node).next;
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_runner<T>(task: &Task<T>) {
        let claimed = Arc::into_raw(InterruptHandle::current()) as *mut InterruptHandle;
        task.runner.store(claimed, Ordering::Release);
    }

    #[test]
    fn undelivered_interrupt_survives_finish_run() {
        let task: Task<u32> = Task::new(|| Ok(1));
        // A cancel(true) that read the runner slot before this claim became
        // visible: terminal INTERRUPTED, but nothing was delivered here.
        claim_runner(&task);
        task.state.store(INTERRUPTED, Ordering::Release);

        let handle = InterruptHandle::current();
        handle.interrupt();
        task.finish_run();
        // The pre-existing interrupt belongs to whatever this thread does
        // next, not to the finished run.
        assert!(handle.take_interrupted());
    }

    #[test]
    fn delivered_interrupt_consumed_by_finish_run() {
        let task: Task<u32> = Task::new(|| Ok(1));
        claim_runner(&task);

        let handle = InterruptHandle::current();
        handle.interrupt();
        task.interrupt_delivered.store(true, Ordering::Release);
        task.state.store(INTERRUPTED, Ordering::Release);

        task.finish_run();
        assert!(!handle.is_interrupted());
    }
}
