//! Guard and thread-local handle for critical section management

use crate::deferred::Deferred;
use crate::epoch::{global, Participant, GRACE};
use core::cell::{Cell, RefCell};

/// Collect local garbage once this many retirements accumulate.
const COLLECT_THRESHOLD: usize = 64;

/// Attempt an epoch advance every this many pins.
const PINS_BETWEEN_ADVANCE: usize = 128;

/// RAII guard representing an active critical section.
///
/// While a `Guard` exists the thread is pinned: every `Shared<'g, T>`
/// loaded with it stays valid, and no memory retired after the pin can be
/// freed. Pinning is reentrant; only the outermost guard unpins.
pub struct Guard {
    // Tied to the thread-local handle; !Send by construction.
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        HANDLE.with(|handle| handle.unpin());
    }
}

/// Thread-local epoch participant plus its pending garbage.
struct Handle {
    participant: &'static Participant,
    guard_count: Cell<usize>,
    pin_count: Cell<usize>,
    /// Retired allocations tagged with the epoch at retirement.
    garbage: RefCell<Vec<(usize, Deferred)>>,
}

impl Handle {
    fn new() -> Self {
        Self {
            participant: global().register(),
            guard_count: Cell::new(0),
            pin_count: Cell::new(0),
            garbage: RefCell::new(Vec::with_capacity(COLLECT_THRESHOLD)),
        }
    }

    fn pin(&self) -> Guard {
        let count = self.guard_count.get();
        self.guard_count.set(count + 1);
        if count == 0 {
            global().pin_participant(self.participant);

            let pins = self.pin_count.get().wrapping_add(1);
            self.pin_count.set(pins);
            // Sub-threshold garbage must still drain on an otherwise idle
            // thread, so sweep it on a pin cadence too.
            if pins % PINS_BETWEEN_ADVANCE == 0 && !self.garbage.borrow().is_empty() {
                self.collect();
            }
        }
        Guard {
            _not_send: core::marker::PhantomData,
        }
    }

    fn unpin(&self) {
        let count = self.guard_count.get();
        self.guard_count.set(count - 1);
        if count == 1 {
            global().unpin_participant(self.participant);
        }
    }

    fn retire(&self, deferred: Deferred) {
        let epoch = global().current_epoch();
        let mut garbage = self.garbage.borrow_mut();
        garbage.push((epoch, deferred));
        if garbage.len() >= COLLECT_THRESHOLD {
            drop(garbage);
            self.collect();
        }
    }

    /// Frees every local retirement whose grace period has elapsed.
    fn collect(&self) {
        let current = global().try_advance();
        let mut garbage = self.garbage.borrow_mut();
        let mut index = 0;
        while index < garbage.len() {
            if garbage[index].0 + GRACE <= current {
                let (_, deferred) = garbage.swap_remove(index);
                // SAFETY: two advances have passed since retirement
                unsafe { deferred.execute() };
            } else {
                index += 1;
            }
        }
        drop(garbage);
        global().collect_orphans(current);
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // Hand pending garbage to the global orphan list; another thread's
        // collect will free it once safe.
        let garbage = core::mem::take(&mut *self.garbage.borrow_mut());
        global().adopt_orphans(garbage);
        global().unpin_participant(self.participant);
        self.participant.release();
    }
}

std::thread_local! {
    static HANDLE: Handle = Handle::new();
}

/// Enters a critical section.
///
/// Returns a [`Guard`]; while it lives, pointers loaded from [`Atomic`]
/// cells are protected from reclamation.
///
/// [`Atomic`]: crate::Atomic
#[inline]
pub fn pin() -> Guard {
    HANDLE.with(|handle| handle.pin())
}

/// Retires an unlinked allocation for deferred reclamation.
///
/// The allocation is freed (via `Box::from_raw`) once no guard taken
/// before this call is still alive.
///
/// # Safety
///
/// This is safe to call, but the caller must guarantee `ptr` came from
/// `Box::into_raw`, is no longer reachable from any shared structure, and
/// is retired exactly once.
#[inline]
pub fn retire<T: 'static>(ptr: *mut T) {
    HANDLE.with(|handle| handle.retire(Deferred::new(ptr)));
}
