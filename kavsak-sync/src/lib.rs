//! Blocking coordination primitives for Kavsak.
//!
//! ## Features
//!
//! - `Exchanger`: pairs exactly two threads to swap values, escalating
//!   from a single slot to a striped arena under contention.
//! - `DelayQueue`: blocking queue releasing elements only once their delay
//!   elapses, with leader/follower timed waiting.
//! - `Signal` / `Notifier`: park/unpark building blocks.
//! - `InterruptHandle`: explicit, promptly-delivered thread interruption
//!   honoured by every blocking operation in this workspace.
//!
//! ## Usage
//!
//! ```rust
//! use kavsak_sync::Exchanger;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let ex = Arc::new(Exchanger::new());
//! let ex2 = ex.clone();
//! let partner = thread::spawn(move || ex2.exchange(2).unwrap());
//! assert_eq!(ex.exchange(1).unwrap(), 2);
//! assert_eq!(partner.join().unwrap(), 1);
//! ```

#![warn(missing_docs)]

pub mod delay_queue;
pub mod exchanger;
pub mod interrupt;
pub mod signal;

pub use delay_queue::DelayQueue;
pub use exchanger::{ExchangeError, Exchanger};
pub use interrupt::{Interrupted, InterruptHandle};
pub use signal::{Notifier, Signal};
