//! Park/unpark signal for thread synchronization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, Thread};
use std::time::Instant;

/// Anything that can be woken.
///
/// Blocking structures keep lists of `Arc<dyn Notifier>` and wake them as
/// conditions change; the interrupt machinery uses the same hook to kick
/// waiters out of condition-variable waits.
pub trait Notifier: Send + Sync {
    /// Wakes the waiter. Must be safe to call more than once and after the
    /// waiter already returned.
    fn notify(&self);
}

/// A one-shot wakeup flag bound to the thread that created it.
pub struct Signal {
    state: AtomicUsize,
    thread: Thread,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Creates a signal owned by the current thread.
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            thread: thread::current(),
        }
    }

    /// Blocks the owning thread until notified.
    pub fn wait(&self) {
        while self.state.load(Ordering::Acquire) == 0 {
            thread::park();
        }
    }

    /// Blocks the owning thread until notified or `deadline` passes.
    ///
    /// Returns true if the signal was notified.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        loop {
            if self.state.load(Ordering::Acquire) != 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.state.load(Ordering::Acquire) != 0;
            }
            thread::park_timeout(deadline - now);
        }
    }

    /// Notifies the signal, waking the owning thread.
    pub fn notify(&self) {
        self.state.store(1, Ordering::Release);
        self.thread.unpark();
    }

    /// Returns true if the signal has been notified.
    pub fn is_notified(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }
}

impl Notifier for Signal {
    fn notify(&self) {
        Signal::notify(self)
    }
}
