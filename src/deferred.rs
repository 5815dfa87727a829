//! Type-erased deferred destruction of retired allocations

/// A retired allocation waiting for its grace period to elapse.
///
/// Captures the raw pointer together with a monomorphized drop shim so the
/// epoch machinery can free nodes of any type without knowing `T`.
pub(crate) struct Deferred {
    ptr: *mut u8,
    drop_fn: unsafe fn(*mut u8),
}

// SAFETY: the pointee is exclusively owned once retired; the record only
// travels between threads through the orphan list, never aliased.
unsafe impl Send for Deferred {}

impl Deferred {
    pub(crate) fn new<T>(ptr: *mut T) -> Self {
        unsafe fn drop_box<T>(ptr: *mut u8) {
            // SAFETY: `ptr` was produced by `Box::into_raw` for a `T` and
            // this shim runs exactly once.
            unsafe {
                drop(Box::from_raw(ptr as *mut T));
            }
        }
        Self {
            ptr: ptr as *mut u8,
            drop_fn: drop_box::<T>,
        }
    }

    /// Frees the allocation.
    ///
    /// # Safety
    ///
    /// The grace period must have elapsed: no thread pinned before the
    /// retirement may still be pinned.
    pub(crate) unsafe fn execute(self) {
        // SAFETY: forwarded to the caller
        unsafe { (self.drop_fn)(self.ptr) }
    }
}
