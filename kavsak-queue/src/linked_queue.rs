//! Unbounded lock-free FIFO queue over linked nodes.

use std::sync::atomic::Ordering;

use kavsak::{pin, retire, Atomic, CacheAligned, Guard, Shared};

/// A node in the queue.
///
/// `item` is null once the element has been claimed by a pop or remove; a
/// node whose `next` points at itself is a tombstone, meaning the node was
/// passed by `head` and any traversal standing on it must restart from the
/// queue's current head.
struct Node<T> {
    item: Atomic<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn new(item: *mut T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            item: Atomic::new(item),
            next: Atomic::null(),
        }))
    }
}

/// An unbounded lock-free FIFO queue.
///
/// Linked nodes with lazy head/tail: both pointers are optimizations and
/// may lag the true first/last node by a bounded number of hops; the truth
/// is always reachable by following `next` links. A push linearizes on the
/// CAS that links its node; a pop linearizes on the CAS that nulls an item
/// slot. Neither operation ever blocks.
///
/// Claimed values are handed out by clone and the original is retired, so
/// concurrent `peek`/`iter` observers holding a guard never read freed
/// memory.
pub struct LinkedQueue<T: 'static> {
    head: CacheAligned<Atomic<Node<T>>>,
    tail: CacheAligned<Atomic<Node<T>>>,
}

unsafe impl<T: 'static + Send> Send for LinkedQueue<T> {}
unsafe impl<T: 'static + Send + Sync> Sync for LinkedQueue<T> {}

impl<T: 'static> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> LinkedQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let sentinel = Node::new(std::ptr::null_mut());
        Self {
            head: CacheAligned::new(Atomic::new(sentinel)),
            tail: CacheAligned::new(Atomic::new(sentinel)),
        }
    }

    /// Appends a value at the tail. Never blocks, never fails.
    pub fn push(&self, value: T) {
        let item = Box::into_raw(Box::new(value));
        let node = Node::new(item);
        let guard = pin();
        // SAFETY: freshly allocated, published below
        let new = unsafe { Shared::from_raw(node) };

        let mut t = self.tail.load(Ordering::Acquire, &guard);
        let mut p = t;
        loop {
            // SAFETY: chained nodes are guard-protected
            let q = unsafe { p.deref() }.next.load(Ordering::Acquire, &guard);
            if q.is_null() {
                // p believes it is the last node; try to link after it.
                match unsafe { p.deref() }.next.compare_exchange(
                    q,
                    new,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                ) {
                    Ok(_) => {
                        if p != t {
                            // Lagged at least one hop; a failed swing just
                            // means someone else advanced it further.
                            let _ = self.tail.compare_exchange(
                                t,
                                new,
                                Ordering::Release,
                                Ordering::Relaxed,
                                &guard,
                            );
                        }
                        return;
                    }
                    Err(_) => continue,
                }
            } else if q == p {
                // Tombstone: p fell off the chain. Restart from the tail if
                // it moved, otherwise from head.
                let t2 = self.tail.load(Ordering::Acquire, &guard);
                p = if t2 != t {
                    t = t2;
                    t2
                } else {
                    self.head.load(Ordering::Acquire, &guard)
                };
            } else {
                // Step towards the last node; jump to the tail if it moved
                // while we were off it.
                if p != t {
                    let t2 = self.tail.load(Ordering::Acquire, &guard);
                    if t2 != t {
                        t = t2;
                        p = t2;
                        continue;
                    }
                }
                p = q;
            }
        }
    }

    /// Removes and returns the oldest live value, or `None` if the queue
    /// is empty. Never blocks.
    pub fn pop(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = pin();
        'restart: loop {
            let h = self.head.load(Ordering::Acquire, &guard);
            let mut p = h;
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                let item = node.item.load(Ordering::Acquire, &guard);
                if !item.is_null() {
                    if node
                        .item
                        .compare_exchange(
                            item,
                            Shared::null(),
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                            &guard,
                        )
                        .is_ok()
                    {
                        // Linearization point: the item is ours.
                        // SAFETY: the box stays valid until grace end
                        let value = unsafe { item.deref() }.clone();
                        retire(item.as_raw());
                        if p != h {
                            let q = node.next.load(Ordering::Acquire, &guard);
                            self.update_head(h, if q.is_null() { p } else { q }, &guard);
                        }
                        return Some(value);
                    }
                    // Lost the claim; re-read this slot.
                    continue;
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    // No live item and p is the last node: empty.
                    self.update_head(h, p, &guard);
                    return None;
                }
                if q == p {
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Removes and returns the oldest live value through exclusive access.
    ///
    /// Unlike [`pop`](Self::pop) this moves the value out instead of
    /// cloning it, so it works for any `T`. With `&mut self` no concurrent
    /// `peek` or `iter` can be reading the item box, which is what makes
    /// the move sound; use it to drain a queue once it is no longer shared.
    pub fn pop_unique(&mut self) -> Option<T> {
        let guard = pin();
        let mut p = self.head.load(Ordering::Relaxed, &guard);
        loop {
            // SAFETY: exclusive access keeps the chain stable; no
            // tombstones are reachable from head.
            let node = unsafe { p.deref() };
            let item = node.item.load(Ordering::Relaxed, &guard);
            if !item.is_null() {
                node.item.store(Shared::null(), Ordering::Relaxed);
                // SAFETY: the slot was just claimed and no other reference
                // to the box can exist without a shared queue handle.
                return Some(*unsafe { Box::from_raw(item.as_raw()) });
            }
            let q = node.next.load(Ordering::Relaxed, &guard);
            if q.is_null() {
                return None;
            }
            p = q;
        }
    }

    /// Returns a copy of the oldest live value without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = pin();
        'restart: loop {
            let h = self.head.load(Ordering::Acquire, &guard);
            let mut p = h;
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                let item = node.item.load(Ordering::Acquire, &guard);
                // SAFETY: a loaded item box stays valid until grace end
                if let Some(value) = unsafe { item.as_ref() } {
                    let value = value.clone();
                    self.update_head(h, p, &guard);
                    return Some(value);
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    self.update_head(h, p, &guard);
                    return None;
                }
                if q == p {
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Returns true if no live item is present.
    pub fn is_empty(&self) -> bool {
        let guard = pin();
        'restart: loop {
            let mut p = self.head.load(Ordering::Acquire, &guard);
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                if !node.item.load(Ordering::Acquire, &guard).is_null() {
                    return false;
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    return true;
                }
                if q == p {
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Counts live items by traversal.
    ///
    /// O(n), and a snapshot at best under concurrency: the lazy head/tail
    /// design has no counter field that could be kept truthful.
    pub fn len(&self) -> usize {
        let guard = pin();
        'restart: loop {
            let mut count = 0usize;
            let mut p = self.head.load(Ordering::Acquire, &guard);
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                if !node.item.load(Ordering::Acquire, &guard).is_null() {
                    count += 1;
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    return count;
                }
                if q == p {
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Returns true if some live item equals `value`.
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let guard = pin();
        'restart: loop {
            let mut p = self.head.load(Ordering::Acquire, &guard);
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                let item = node.item.load(Ordering::Acquire, &guard);
                // SAFETY: a loaded item box stays valid until grace end
                if let Some(it) = unsafe { item.as_ref() } {
                    if it == value {
                        return true;
                    }
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    return false;
                }
                if q == p {
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Removes the first live item equal to `value`.
    ///
    /// Removal is logical: the item slot is nulled (the linearization
    /// point) and the emptied node is reclaimed once `head` passes it.
    pub fn remove(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let guard = pin();
        'restart: loop {
            let mut p = self.head.load(Ordering::Acquire, &guard);
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                let item = node.item.load(Ordering::Acquire, &guard);
                // SAFETY: a loaded item box stays valid until grace end
                if let Some(it) = unsafe { item.as_ref() } {
                    if it == value
                        && node
                            .item
                            .compare_exchange(
                                item,
                                Shared::null(),
                                Ordering::AcqRel,
                                Ordering::Relaxed,
                                &guard,
                            )
                            .is_ok()
                    {
                        retire(item.as_raw());
                        return true;
                    }
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    return false;
                }
                if q == p {
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Removes every live item for which `pred` returns false, returning
    /// how many were removed.
    pub fn retain<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let guard = pin();
        let mut removed = 0usize;
        'restart: loop {
            let mut p = self.head.load(Ordering::Acquire, &guard);
            loop {
                // SAFETY: chained nodes are guard-protected
                let node = unsafe { p.deref() };
                let item = node.item.load(Ordering::Acquire, &guard);
                // SAFETY: a loaded item box stays valid until grace end
                if let Some(it) = unsafe { item.as_ref() } {
                    if !pred(it)
                        && node
                            .item
                            .compare_exchange(
                                item,
                                Shared::null(),
                                Ordering::AcqRel,
                                Ordering::Relaxed,
                                &guard,
                            )
                            .is_ok()
                    {
                        retire(item.as_raw());
                        removed += 1;
                    }
                }
                let q = node.next.load(Ordering::Acquire, &guard);
                if q.is_null() {
                    return removed;
                }
                if q == p {
                    // Keep the count: every removal already happened.
                    continue 'restart;
                }
                p = q;
            }
        }
    }

    /// Returns a weakly consistent iterator over copies of the live items.
    ///
    /// The iterator never fails on concurrent structural change; items
    /// removed mid-iteration are skipped, items pushed mid-iteration may or
    /// may not be observed.
    pub fn iter(&self) -> Iter<'_, T>
    where
        T: Clone,
    {
        let guard = pin();
        let current = self.head.load(Ordering::Acquire, &guard).as_raw();
        Iter {
            queue: self,
            guard,
            current,
        }
    }

    /// Swings `head` from `h` to `p` and retires every node in between,
    /// self-linking each so stale traversals restart.
    ///
    /// Only the winning CAS walks the segment, so each node is retired
    /// exactly once. Passed nodes always carry a null item slot.
    fn update_head<'g>(&self, h: Shared<'g, Node<T>>, p: Shared<'g, Node<T>>, guard: &'g Guard) {
        if h == p {
            return;
        }
        if self
            .head
            .compare_exchange(h, p, Ordering::Release, Ordering::Relaxed, guard)
            .is_ok()
        {
            let mut n = h;
            while n != p {
                // SAFETY: segment nodes are guard-protected
                let node = unsafe { n.deref() };
                let next = node.next.load(Ordering::Acquire, guard);
                node.next.store(n, Ordering::Release);
                retire(n.as_raw());
                n = next;
            }
        }
    }
}

impl<T: 'static> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: free the remaining chain directly. Nodes already
        // retired are no longer reachable from head and are handled by the
        // reclamation layer.
        let guard = pin();
        let mut p = self.head.load(Ordering::Relaxed, &guard).as_raw();
        while !p.is_null() {
            // SAFETY: exclusive access to the remaining chain
            unsafe {
                let next = (*p).next.load(Ordering::Relaxed, &guard).as_raw();
                let item = (*p).item.load(Ordering::Relaxed, &guard).as_raw();
                if !item.is_null() {
                    drop(Box::from_raw(item));
                }
                drop(Box::from_raw(p));
                p = next;
            }
        }
    }
}

/// Weakly consistent iterator over a [`LinkedQueue`].
///
/// Holds a reclamation guard for its whole lifetime; drop it promptly.
pub struct Iter<'a, T: 'static> {
    queue: &'a LinkedQueue<T>,
    guard: Guard,
    current: *mut Node<T>,
}

impl<'a, T: 'static + Clone> Iterator for Iter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if self.current.is_null() {
                return None;
            }
            // SAFETY: protected by the iterator's guard
            let node = unsafe { &*self.current };
            let item = node.item.load(Ordering::Acquire, &self.guard);
            let q = node.next.load(Ordering::Acquire, &self.guard);
            let next = if q.as_raw() == self.current {
                // Tombstone: resume from the current head, which is always
                // at or past this node's position.
                self.queue.head.load(Ordering::Acquire, &self.guard).as_raw()
            } else {
                q.as_raw()
            };
            // SAFETY: a loaded item box stays valid until grace end
            let value = unsafe { item.as_ref() }.cloned();
            self.current = next;
            if value.is_some() {
                return value;
            }
        }
    }
}
