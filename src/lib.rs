//! Kavsak: epoch-based memory reclamation for lock-free data structures
//!
//! Kavsak lets lock-free structures unlink nodes while other threads may
//! still be traversing them. A thread enters a critical section with
//! [`pin`], which returns a [`Guard`]; any pointer loaded through an
//! [`Atomic`] while the guard is alive stays valid until the guard drops.
//! Unlinked nodes are handed to [`retire`] and freed only after a full
//! grace period, once every thread that was pinned at retirement time has
//! unpinned.
//!
//! # Key Properties
//!
//! - **Cheap reads**: a pinned load is a single atomic load
//! - **Lock-free progress**: epoch advancement never blocks writers
//! - **No ABA**: a node cannot be freed (hence not reused) while any
//!   guard from before its retirement is still alive
//! - **Batch reclamation**: garbage is collected in amortized batches
//!
//! # Example
//!
//! ```rust,ignore
//! use kavsak::{pin, Atomic};
//! use std::sync::atomic::Ordering;
//!
//! let cell = Atomic::new(Box::into_raw(Box::new(42)));
//!
//! let guard = pin();
//! let shared = cell.load(Ordering::Acquire, &guard);
//! if let Some(value) = unsafe { shared.as_ref() } {
//!     assert_eq!(*value, 42);
//! }
//! drop(guard);
//! ```

#![warn(missing_docs)]

mod align;
mod atomic;
mod deferred;
mod epoch;
mod guard;

pub use align::CacheAligned;
pub use atomic::{Atomic, Shared};
pub use guard::{pin, retire, Guard};

// Re-export for convenience
pub use core::sync::atomic::Ordering;
