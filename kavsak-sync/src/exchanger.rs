//! Rendezvous exchanger.
//!
//! Pairs exactly two threads to swap values. A thread finding a slot empty
//! publishes its own offer node there and waits; a thread finding the slot
//! occupied claims the node with one CAS (the pairing linearization point
//! for both parties), hands its value over through the node's match field,
//! and wakes the waiter. Two claimers racing for one slot is a collision
//! and escalates to a striped arena of slots whose usable bound grows under
//! sustained collisions and shrinks as arena waits expire.
//!
//! Waits are a bounded spin with xorshift-thinned yields before any real
//! park: exchanges usually resolve within microseconds, and parking costs
//! far more than the typical wait.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_utils::Backoff;
use kavsak::{pin, retire, Atomic, CacheAligned, Shared};

use crate::interrupt::InterruptHandle;

/// Arena slot count; the usable bound never exceeds this.
const ARENA_CAPACITY: usize = 32;

/// Spin iterations before parking (slot 0) or giving the slot up (arena).
const SPIN_BUDGET: u32 = 1 << 10;

/// Claim collisions at the top slot before the bound grows.
const GROW_COLLISIONS: u32 = 2;

/// A failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    /// No partner arrived before the deadline.
    Timeout,
    /// The waiting thread was interrupted.
    Interrupted,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Timeout => write!(f, "no exchange partner arrived in time"),
            ExchangeError::Interrupted => write!(f, "interrupted while awaiting exchange partner"),
        }
    }
}

impl std::error::Error for ExchangeError {}

/// One outstanding offer.
///
/// `item` is written before the node is published and moved out by
/// whichever side wins the `mate` CAS. `mate` is owned by std atomics (not
/// the reclamation layer) because its box hands off uniquely; the node
/// itself is reclaimed through `retire` since a claimer may still be
/// reading it when the waiter returns.
struct ExNode<T> {
    item: UnsafeCell<Option<T>>,
    mate: AtomicPtr<T>,
    parked: Thread,
}

/// Reserved `mate` value meaning the waiter gave up. Never dereferenced.
fn cancel_sentinel<T>() -> *mut T {
    static CANCELLED: u8 = 0;
    &CANCELLED as *const u8 as *mut T
}

enum Waited {
    Matched(*mut ()),
    /// Spin budget exhausted on an arena slot.
    GaveUp,
    Deadline,
    Interrupted,
}

/// A rendezvous point at which two threads swap values.
pub struct Exchanger<T: 'static> {
    arena: Box<[CacheAligned<Atomic<ExNode<T>>>]>,
    /// Highest usable arena index; 0 is single-slot mode.
    bound: CacheAligned<AtomicUsize>,
}

unsafe impl<T: 'static + Send> Send for Exchanger<T> {}
unsafe impl<T: 'static + Send> Sync for Exchanger<T> {}

impl<T: 'static> Default for Exchanger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Exchanger<T> {
    /// Creates an exchanger.
    pub fn new() -> Self {
        let arena = (0..ARENA_CAPACITY)
            .map(|_| CacheAligned::new(Atomic::null()))
            .collect();
        Self {
            arena,
            bound: CacheAligned::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for another thread to arrive, then swaps values with it.
    pub fn exchange(&self, item: T) -> Result<T, ExchangeError> {
        self.do_exchange(item, None)
    }

    /// Like [`exchange`](Self::exchange), but gives up after `timeout`.
    pub fn exchange_timeout(&self, item: T, timeout: Duration) -> Result<T, ExchangeError> {
        self.do_exchange(item, Some(Instant::now() + timeout))
    }

    fn do_exchange(&self, item: T, deadline: Option<Instant>) -> Result<T, ExchangeError> {
        let interrupt = InterruptHandle::current();
        let mut rng = seed();
        let mut item = Some(item);
        let mut index = 0usize;
        let mut collisions = 0u32;
        let backoff = Backoff::new();

        loop {
            if interrupt.take_interrupted() {
                return Err(ExchangeError::Interrupted);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(ExchangeError::Timeout);
                }
            }

            let bound = self.bound.load(Ordering::Relaxed).min(ARENA_CAPACITY - 1);
            index = index.min(bound);
            let slot = &self.arena[index];

            let guard = pin();
            let existing = slot.load(Ordering::Acquire, &guard);

            if existing.is_null() {
                // Offer: publish our node and wait for a partner.
                let me = Box::into_raw(Box::new(ExNode {
                    item: UnsafeCell::new(item.take()),
                    mate: AtomicPtr::new(ptr::null_mut()),
                    parked: thread::current(),
                }));
                // SAFETY: freshly allocated, published below
                let me_shared = unsafe { Shared::from_raw(me) };
                if slot
                    .compare_exchange(
                        existing,
                        me_shared,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                        &guard,
                    )
                    .is_err()
                {
                    // Lost the publish race; reclaim the offer and collide.
                    // SAFETY: never published
                    item = unsafe { (*(*me).item.get()).take() };
                    // SAFETY: never published
                    unsafe { drop(Box::from_raw(me)) };
                    collisions += 1;
                    self.on_collision(&mut index, &mut collisions, &mut rng, bound);
                    backoff.spin();
                    continue;
                }
                drop(guard);

                // Arena slots never park: a parked waiter off slot 0 could
                // miss partners probing other indices forever.
                let spin_only = index > 0;
                match self.await_mate(me, spin_only, deadline, &interrupt, &mut rng) {
                    Waited::Matched(mate) => {
                        retire(me);
                        // SAFETY: the claimer boxed this value for us
                        return Ok(*unsafe { Box::from_raw(mate as *mut T) });
                    }
                    outcome => {
                        match self.try_cancel(me, index) {
                            Some(got) => return Ok(got),
                            None => {
                                item = self.reclaim_offer(me);
                                match outcome {
                                    Waited::Deadline => return Err(ExchangeError::Timeout),
                                    Waited::Interrupted => {
                                        interrupt.take_interrupted();
                                        return Err(ExchangeError::Interrupted);
                                    }
                                    Waited::GaveUp => {
                                        // Drift back towards slot 0 and let
                                        // the bound decay.
                                        let b = self.bound.load(Ordering::Relaxed);
                                        if b > 0 {
                                            let _ = self.bound.compare_exchange(
                                                b,
                                                b - 1,
                                                Ordering::Relaxed,
                                                Ordering::Relaxed,
                                            );
                                        }
                                        index = index.saturating_sub(1);
                                        continue;
                                    }
                                    Waited::Matched(_) => unreachable!(),
                                }
                            }
                        }
                    }
                }
            } else {
                // Release: claim the published offer.
                match slot.compare_exchange(
                    existing,
                    Shared::null(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    &guard,
                ) {
                    Ok(_) => {
                        // SAFETY: guard-protected until we are done
                        let node = unsafe { existing.deref() };
                        let mine = Box::into_raw(Box::new(item.take().unwrap()));
                        match node.mate.compare_exchange(
                            ptr::null_mut(),
                            mine,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                // Hand-off complete; the offer is ours.
                                // SAFETY: mate CAS won us sole ownership
                                let theirs = unsafe { (*node.item.get()).take() };
                                node.parked.unpark();
                                return Ok(theirs.unwrap());
                            }
                            Err(_) => {
                                // The waiter cancelled first; take our value
                                // back and look for another partner.
                                // SAFETY: never published
                                item = Some(*unsafe { Box::from_raw(mine) });
                                continue;
                            }
                        }
                    }
                    Err(_) => {
                        // Two releasers raced for one offer: a collision.
                        collisions += 1;
                        self.on_collision(&mut index, &mut collisions, &mut rng, bound);
                        backoff.spin();
                        continue;
                    }
                }
            }
        }
    }

    /// Picks the next slot after a collision, growing the usable bound when
    /// collisions persist at the top index.
    fn on_collision(&self, index: &mut usize, collisions: &mut u32, rng: &mut u64, bound: usize) {
        if *collisions >= GROW_COLLISIONS && *index == bound && bound + 1 < ARENA_CAPACITY {
            let _ = self.bound.compare_exchange(
                bound,
                bound + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
            *collisions = 0;
            *index = (xorshift64(rng) as usize) % (bound + 2);
        } else {
            // Cyclic traversal reduces the odds of re-colliding with the
            // same partner.
            *index = (*index + 1) % (bound + 1);
        }
    }

    /// Waits for a partner to fill our node's match field.
    fn await_mate(
        &self,
        me: *mut ExNode<T>,
        spin_only: bool,
        deadline: Option<Instant>,
        interrupt: &InterruptHandle,
        rng: &mut u64,
    ) -> Waited {
        let mut spins = SPIN_BUDGET;
        loop {
            // SAFETY: we own the allocation until retire
            let mate = unsafe { &(*me).mate }.load(Ordering::Acquire);
            if !mate.is_null() {
                return Waited::Matched(mate as *mut ());
            }
            if interrupt.is_interrupted() {
                return Waited::Interrupted;
            }
            if spins > 0 {
                spins -= 1;
                if spins & 0x3f == 0 {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return Waited::Deadline;
                        }
                    }
                }
                if xorshift64(rng) & 0x7 == 0 {
                    thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            } else if spin_only {
                return Waited::GaveUp;
            } else {
                match deadline {
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return Waited::Deadline;
                        }
                        thread::park_timeout(d - now);
                    }
                    None => thread::park(),
                }
            }
        }
    }

    /// Tries to withdraw our published offer.
    ///
    /// Returns `Some(value)` if a partner won the race after all, `None`
    /// if the cancellation stuck (the node is then fully ours again).
    fn try_cancel(&self, me: *mut ExNode<T>, index: usize) -> Option<T> {
        // SAFETY: we own the allocation until retire
        let node = unsafe { &*me };
        match node.mate.compare_exchange(
            ptr::null_mut(),
            cancel_sentinel::<T>(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // Unpublish so later releasers stop probing a dead offer.
                let guard = pin();
                // SAFETY: pointer identity only
                let me_shared = unsafe { Shared::from_raw(me) };
                let _ = self.arena[index].compare_exchange(
                    me_shared,
                    Shared::null(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    &guard,
                );
                None
            }
            Err(mate) => {
                retire(me);
                // SAFETY: the claimer boxed this value for us
                Some(*unsafe { Box::from_raw(mate) })
            }
        }
    }

    /// Takes the value back out of a cancelled offer and retires the node.
    fn reclaim_offer(&self, me: *mut ExNode<T>) -> Option<T> {
        // SAFETY: cancellation won; no claimer will touch `item`
        let item = unsafe { (*(*me).item.get()).take() };
        retire(me);
        item
    }
}

impl<T: 'static> Drop for Exchanger<T> {
    fn drop(&mut self) {
        // No waiter can be parked here (it would hold a borrow), so any
        // remaining published node is an abandoned offer.
        let guard = pin();
        for slot in self.arena.iter() {
            let node = slot.load(Ordering::Relaxed, &guard);
            if !node.is_null() {
                // SAFETY: exclusive access
                unsafe { drop(Box::from_raw(node.as_raw())) };
            }
        }
    }
}

fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn seed() -> u64 {
    let probe = 0u8;
    let addr = &probe as *const u8 as u64;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    (addr.rotate_left(17) ^ nanos) | 1
}
