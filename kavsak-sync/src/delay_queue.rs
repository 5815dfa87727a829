//! Delay-ordered blocking queue.
//!
//! A binary min-heap keyed by expiry instant (insertion sequence breaks
//! ties, keeping equal deadlines FIFO) behind one mutex and one condvar.
//! Only one waiter, the leader, performs the timed wait for the head's
//! remaining delay; followers wait unconditionally until signalled. Any
//! change of head invalidates the leader's planned wake time, so the claim
//! is cleared and a signal issued.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::interrupt::{Interrupted, InterruptHandle};
use crate::signal::Notifier;

struct Entry<T> {
    deadline: Instant,
    seq: u64,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap and we want the earliest
        // deadline (then lowest sequence) on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State<T> {
    heap: BinaryHeap<Entry<T>>,
    /// The one thread allowed a delay-bounded wait.
    leader: Option<ThreadId>,
    seq: u64,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

/// Wakes all condvar waiters; registered with [`InterruptHandle`] so an
/// interrupt reaches threads blocked on the condvar.
struct WakeAll<T> {
    inner: Weak<Inner<T>>,
}

impl<T: Send + 'static> Notifier for WakeAll<T> {
    fn notify(&self) {
        if let Some(inner) = self.inner.upgrade() {
            // Taking the lock closes the gap between a waiter's flag check
            // and its wait; without it the notification could fall between
            // the two and be lost.
            let _state = inner.state.lock().unwrap();
            inner.available.notify_all();
        }
    }
}

/// An unbounded blocking queue whose elements become takeable only once
/// their delay has elapsed.
pub struct DelayQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> DelayQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    heap: BinaryHeap::new(),
                    leader: None,
                    seq: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Inserts `value`, takeable once `delay` has elapsed. Never blocks.
    pub fn offer(&self, value: T, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut state = self.inner.state.lock().unwrap();
        state.seq += 1;
        let seq = state.seq;
        state.heap.push(Entry {
            deadline,
            seq,
            value,
        });
        if state.heap.peek().map(|e| e.seq) == Some(seq) {
            // New head: the old leader's planned wake time is stale.
            state.leader = None;
            self.inner.available.notify_one();
        }
    }

    /// Removes and returns the earliest-expiring element whose delay has
    /// elapsed, without blocking.
    ///
    /// Never touches the leader claim.
    pub fn poll(&self) -> Option<T> {
        let mut state = self.inner.state.lock().unwrap();
        match state.heap.peek() {
            Some(head) if head.deadline <= Instant::now() => {
                Some(state.heap.pop().unwrap().value)
            }
            _ => None,
        }
    }

    /// Blocks until the earliest-expiring element's delay elapses, then
    /// removes and returns it.
    pub fn take(&self) -> Result<T, Interrupted> {
        self.await_expired(None).map(|v| v.unwrap())
    }

    /// Bounded [`take`](Self::take): returns `Ok(None)` if nothing expires
    /// within `timeout`.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        self.await_expired(Some(Instant::now() + timeout))
    }

    fn await_expired(&self, give_up: Option<Instant>) -> Result<Option<T>, Interrupted> {
        let interrupt = InterruptHandle::current();
        let _registration = interrupt.register_waiter(Arc::new(WakeAll {
            inner: Arc::downgrade(&self.inner),
        }));
        let me = thread::current().id();

        let mut state = self.inner.state.lock().unwrap();
        loop {
            if interrupt.take_interrupted() {
                self.exit_signal(&mut state);
                return Err(Interrupted);
            }
            let now = Instant::now();
            let head_wait = match state.heap.peek() {
                Some(head) if head.deadline <= now => {
                    let value = state.heap.pop().unwrap().value;
                    self.exit_signal(&mut state);
                    return Ok(Some(value));
                }
                Some(head) => Some(head.deadline - now),
                None => None,
            };
            let remaining = match give_up {
                Some(d) if d <= now => {
                    self.exit_signal(&mut state);
                    return Ok(None);
                }
                Some(d) => Some(d - now),
                None => None,
            };

            match head_wait {
                None => {
                    // Empty: wait for data (bounded by the caller deadline).
                    state = match remaining {
                        None => self.inner.available.wait(state).unwrap(),
                        Some(r) => self.inner.available.wait_timeout(state, r).unwrap().0,
                    };
                }
                Some(delay) => {
                    let capped = remaining.map_or(delay, |r| r.min(delay));
                    if state.leader.is_some() || remaining.map_or(false, |r| r < delay) {
                        // A leader already covers the head's wake time, or
                        // our own deadline lands first; wait without
                        // claiming.
                        state = match remaining {
                            None => self.inner.available.wait(state).unwrap(),
                            Some(r) => self.inner.available.wait_timeout(state, r).unwrap().0,
                        };
                    } else {
                        state.leader = Some(me);
                        state = self
                            .inner
                            .available
                            .wait_timeout(state, capped)
                            .unwrap()
                            .0;
                        if state.leader == Some(me) {
                            state.leader = None;
                        }
                    }
                }
            }
        }
    }

    /// Signals a successor if no leader holds a claim and data remains.
    fn exit_signal(&self, state: &mut State<T>) {
        if state.leader.is_none() && !state.heap.is_empty() {
            self.inner.available.notify_one();
        }
    }

    /// Returns a copy of the earliest-expiring element, expired or not.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let state = self.inner.state.lock().unwrap();
        state.heap.peek().map(|e| e.value.clone())
    }

    /// Removes the first element equal to `value`, expired or not.
    ///
    /// Removing the current head invalidates any leader claim, since the
    /// leader's planned wake time no longer matches the new head.
    pub fn remove(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let mut state = self.inner.state.lock().unwrap();
        let head_seq = state.heap.peek().map(|e| e.seq);
        let mut entries = std::mem::take(&mut state.heap).into_vec();
        let Some(pos) = entries.iter().position(|e| &e.value == value) else {
            state.heap = entries.into();
            return false;
        };
        let removed = entries.swap_remove(pos);
        state.heap = entries.into();
        if Some(removed.seq) == head_seq {
            state.leader = None;
            self.inner.available.notify_one();
        }
        true
    }

    /// Number of elements, expired or not.
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().heap.len()
    }

    /// Returns true if the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().unwrap().heap.is_empty()
    }
}

impl<T> Clone for DelayQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
