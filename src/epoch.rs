//! Global epoch clock and participant registry
//!
//! The global epoch advances in steps of [`EPOCH_STEP`] and only when every
//! pinned participant has announced the current epoch. A node retired at
//! epoch `e` is safe to free once the global epoch has advanced twice past
//! `e`: any thread still holding a pre-retirement pointer was pinned at an
//! epoch `<= e` and would have blocked the second advance.

use crate::deferred::Deferred;
use core::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::ptr;
use std::sync::{Mutex, OnceLock};

/// Low bit of a participant's epoch word: set while the thread is pinned.
pub(crate) const ACTIVE: usize = 1;

/// Epoch increment; keeps the `ACTIVE` bit clear in epoch values.
pub(crate) const EPOCH_STEP: usize = 2;

/// Two full advances must pass before retired memory is freed.
pub(crate) const GRACE: usize = 2 * EPOCH_STEP;

/// Per-thread participant record.
///
/// Records are pushed onto the registry once and never freed; a record
/// whose owning thread exited is marked free and handed to the next thread
/// that registers.
pub(crate) struct Participant {
    /// Epoch snapshot | `ACTIVE` while pinned, 0 while quiescent.
    pub(crate) epoch: AtomicUsize,
    /// Registry link (push-only Treiber list).
    next: AtomicPtr<Participant>,
    /// Claimed by a live thread.
    in_use: AtomicBool,
}

impl Participant {
    /// Returns the record to the free pool for a future thread to claim.
    pub(crate) fn release(&self) {
        self.in_use.store(false, Ordering::Release);
    }
}

pub(crate) struct Global {
    epoch: AtomicUsize,
    registry: AtomicPtr<Participant>,
    /// Garbage abandoned by exited threads, tagged with its retirement epoch.
    orphans: Mutex<Vec<(usize, Deferred)>>,
}

static GLOBAL: OnceLock<Global> = OnceLock::new();

pub(crate) fn global() -> &'static Global {
    GLOBAL.get_or_init(|| Global {
        epoch: AtomicUsize::new(GRACE),
        registry: AtomicPtr::new(ptr::null_mut()),
        orphans: Mutex::new(Vec::new()),
    })
}

impl Global {
    #[inline]
    pub(crate) fn current_epoch(&self) -> usize {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Claims a free participant record, or registers a fresh one.
    pub(crate) fn register(&self) -> &'static Participant {
        let mut cursor = self.registry.load(Ordering::Acquire);
        while !cursor.is_null() {
            // SAFETY: registry records are never freed
            let record = unsafe { &*cursor };
            if !record.in_use.load(Ordering::Relaxed)
                && record
                    .in_use
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return record;
            }
            cursor = record.next.load(Ordering::Acquire);
        }

        let record = Box::into_raw(Box::new(Participant {
            epoch: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
            in_use: AtomicBool::new(true),
        }));
        loop {
            let head = self.registry.load(Ordering::Acquire);
            // SAFETY: `record` is ours until the CAS publishes it
            unsafe { (*record).next.store(head, Ordering::Relaxed) };
            if self
                .registry
                .compare_exchange(head, record, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: published registry records live forever
                return unsafe { &*record };
            }
        }
    }

    /// Announces the current epoch for `participant` and returns it.
    #[inline]
    pub(crate) fn pin_participant(&self, participant: &Participant) -> usize {
        let epoch = self.epoch.load(Ordering::Relaxed);
        participant.epoch.store(epoch | ACTIVE, Ordering::Relaxed);
        // The announcement must be globally visible before any subsequent
        // load of shared structures.
        fence(Ordering::SeqCst);
        epoch
    }

    #[inline]
    pub(crate) fn unpin_participant(&self, participant: &Participant) {
        participant.epoch.store(0, Ordering::Release);
    }

    /// Tries to move the global epoch one step forward.
    ///
    /// Succeeds only if every pinned participant has announced the current
    /// epoch. Returns the epoch value observed (post-advance if it won).
    pub(crate) fn try_advance(&self) -> usize {
        let epoch = self.epoch.load(Ordering::SeqCst);

        let mut cursor = self.registry.load(Ordering::Acquire);
        while !cursor.is_null() {
            // SAFETY: registry records are never freed
            let record = unsafe { &*cursor };
            let announced = record.epoch.load(Ordering::SeqCst);
            if announced & ACTIVE != 0 && announced & !ACTIVE != epoch {
                // A straggler is still pinned in an older epoch.
                return epoch;
            }
            cursor = record.next.load(Ordering::Acquire);
        }

        match self.epoch.compare_exchange(
            epoch,
            epoch + EPOCH_STEP,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => epoch + EPOCH_STEP,
            Err(current) => current,
        }
    }

    /// Parks garbage from an exiting thread for later collection.
    pub(crate) fn adopt_orphans(&self, garbage: Vec<(usize, Deferred)>) {
        if garbage.is_empty() {
            return;
        }
        let mut orphans = self.orphans.lock().unwrap();
        orphans.extend(garbage);
    }

    /// Frees adopted garbage whose grace period elapsed.
    ///
    /// Skipped entirely when another thread holds the orphan lock; orphan
    /// collection is best-effort and must not stall hot paths.
    pub(crate) fn collect_orphans(&self, safe_before: usize) {
        let Ok(mut orphans) = self.orphans.try_lock() else {
            return;
        };
        let mut index = 0;
        while index < orphans.len() {
            if orphans[index].0 + GRACE <= safe_before {
                let (_, deferred) = orphans.swap_remove(index);
                // SAFETY: grace period elapsed for this entry
                unsafe { deferred.execute() };
            } else {
                index += 1;
            }
        }
    }
}
