//! Explicit thread interruption.
//!
//! Rust threads have no native interrupt, so interruption is a first-class
//! handle: a per-thread flag plus the machinery to wake whatever the thread
//! is currently blocked on. Every blocking operation in this workspace
//! checks the current thread's handle at its wait points and reports
//! [`Interrupted`] instead of swallowing the request.

use crate::signal::Notifier;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};

/// A blocking wait was abandoned because the thread was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread interrupted while blocked")
    }
}

impl std::error::Error for Interrupted {}

/// Interruption status of one thread.
///
/// `interrupt` sets the flag, unparks the thread, and wakes any registered
/// waiter, so parked threads and condition-variable waiters both observe
/// the request promptly. The flag is consumed exactly once, by the blocking
/// operation that reports [`Interrupted`].
pub struct InterruptHandle {
    flag: AtomicBool,
    thread: Thread,
    waiter: Mutex<Option<Arc<dyn Notifier>>>,
}

impl InterruptHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            thread: thread::current(),
            waiter: Mutex::new(None),
        })
    }

    /// Returns the calling thread's handle.
    pub fn current() -> Arc<Self> {
        CURRENT.with(|handle| handle.clone())
    }

    /// Requests interruption of the owning thread.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
        if let Some(waiter) = self.waiter.lock().unwrap().clone() {
            waiter.notify();
        }
        self.thread.unpark();
    }

    /// Returns the flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Tests and clears the flag.
    pub fn take_interrupted(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// Registers the waiter to wake on interruption, for the duration of
    /// the returned registration.
    ///
    /// Used by condition-variable based waits, which `unpark` alone cannot
    /// wake.
    pub fn register_waiter(&self, waiter: Arc<dyn Notifier>) -> WaiterRegistration<'_> {
        *self.waiter.lock().unwrap() = Some(waiter);
        WaiterRegistration { handle: self }
    }
}

/// Clears the registered waiter on drop.
pub struct WaiterRegistration<'a> {
    handle: &'a InterruptHandle,
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        *self.handle.waiter.lock().unwrap() = None;
    }
}

std::thread_local! {
    static CURRENT: Arc<InterruptHandle> = InterruptHandle::new();
}
