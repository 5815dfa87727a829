//! Lock-free queue primitives for Kavsak.
//!
//! ## Features
//!
//! - `LinkedQueue`: Unbounded MPMC FIFO over linked nodes with lazy
//!   head/tail pointers and deferred node reclamation.
//!
//! ## Usage
//!
//! ```rust
//! use kavsak_queue::LinkedQueue;
//!
//! let q = LinkedQueue::new();
//! q.push(1);
//! q.push(2);
//! assert_eq!(q.pop(), Some(1));
//! assert_eq!(q.peek(), Some(2));
//! assert_eq!(q.pop(), Some(2));
//! assert_eq!(q.pop(), None);
//! ```

#![warn(missing_docs)]

pub mod linked_queue;

pub use linked_queue::{Iter, LinkedQueue};
