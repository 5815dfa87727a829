//! Cache-line alignment wrapper
//!
//! Line sizes per architecture: x86_64 64B, aarch64 128B (Apple M-series /
//! Neoverse fetch pairs), s390x 256B. Fallback is 64B.

use core::ops::{Deref, DerefMut};

/// Pads and aligns `T` to a cache line to keep hot fields off shared lines.
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(target_arch = "aarch64", repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "s390x", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Default, Debug)]
pub struct CacheAligned<T> {
    data: T,
}

impl<T> CacheAligned<T> {
    /// Wraps a value.
    pub const fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
