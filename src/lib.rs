//! # Amity Atomic
//!
//! Lock-free atomic cell for values of any type.
//!
//! `AtomicCell<T>` holds single value that can be read, replaced and updated
//! from many threads or tasks at once.
//! Updates are driven by compare-and-swap, so no update is lost
//! and no caller ever waits for a lock.
//!
//! ## Available Algorithms
//!
//! ### ⚛️ Atomic Cell
//! Holds a value of arbitrary type and exposes read, write and function-based update operations.
//! **Feature:** `alloc`
//!
//! #### Examples
//!
//! Here is an example of sharing `AtomicCell` between threads that all append to the same string:
//!
//! ```rust
//! use amity_atomic::atomic::AtomicCell;
//!
//! let cell = AtomicCell::new(String::new());
//!
//! std::thread::scope(|scope| {
//!     for _ in 0..4 {
//!         scope.spawn(|| {
//!             for _ in 0..100 {
//!                 // Closure may run more than once when other threads win the race.
//!                 cell.update(|value| format!("{value}a"));
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(cell.get(), "a".repeat(400));
//! ```
//!
//! Update functions come in several flavors that differ in what they return:
//!
//! ```rust
//! use amity_atomic::atomic::AtomicCell;
//!
//! let cell = AtomicCell::new(1u32);
//!
//! assert_eq!(cell.get_and_set(2), 1);
//! assert_eq!(cell.get_and_update(|v| v * 10), 2);
//! assert_eq!(cell.update_and_get(|v| v + 1), 21);
//!
//! // Transformation may decline and leave the cell as it is.
//! assert_eq!(cell.fetch_update(|v| v.checked_sub(100)), Err(21));
//!
//! // Snapshot keeps the value it was taken from, without cloning it.
//! let snapshot = cell.load();
//! cell.set(0);
//! assert_eq!(*snapshot, 21);
//! ```
//!
//! `try_update` makes exactly one attempt. It reports failure when the cell
//! was written after the value was read, even from within the transformation itself:
//!
//! ```rust
//! use amity_atomic::atomic::AtomicCell;
//!
//! let cell = AtomicCell::new(String::from("x"));
//!
//! let updated = cell.try_update(|cur| {
//!     cell.update(|v| format!("{v}a"));
//!     format!("{cur}b")
//! });
//!
//! assert!(!updated);
//! assert_eq!(cell.get(), "xa");
//! ```
//!
//! Transformation may also suspend.
//! Value it was given is checked again once it resumes:
//!
//! ```rust
//! use amity_atomic::atomic::AtomicCell;
//!
//! # futures::executor::block_on(async {
//! let cell = AtomicCell::new(vec![1, 2]);
//!
//! let len = cell
//!     .update_and_get_async(|v| {
//!         let mut v = v.clone();
//!         async move {
//!             v.push(3);
//!             v
//!         }
//!     })
//!     .await
//!     .len();
//!
//! assert_eq!(len, 3);
//! # });
//! ```
//!
//! ### 🔄 Backoff
//! Exponential spin that switches to yielding, used between failed compare-and-swap attempts.
//!
//! ```rust
//! use amity_atomic::backoff::BackOff;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let counter = AtomicUsize::new(0);
//! let mut backoff = BackOff::new();
//!
//! let mut cur = counter.load(Ordering::Relaxed);
//! loop {
//!     match counter.compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed) {
//!         Ok(_) => break,
//!         Err(actual) => {
//!             cur = actual;
//!             backoff.wait();
//!         }
//!     }
//! }
//! ```
//!
//! ### 🏷️ Tagged Pointer
//! Packs small counter into alignment bits of a pointer,
//! so both can be updated with single atomic operation.
//!
//! ## `no-std` support
//!
//! Crate is `no-std` when "std" feature is disabled. `AtomicCell` requires "alloc".
//!
//! ## Tracing
//!
//! With "tracing" feature enabled contended retries are reported with `tracing::trace!`.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(clippy::pedantic)]
#![allow(clippy::inline_always)]

#[cfg(feature = "alloc")]
extern crate alloc;

macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)*);
        }
    };
}

#[allow(unused_imports)]
pub(crate) use trace;

#[cfg_attr(loom, path = "sync_loom.rs")]
mod sync;

pub mod backoff;
pub mod cache;
pub mod tagged;

#[cfg(feature = "alloc")]
mod node;

#[cfg(feature = "alloc")]
pub mod atomic;

#[cfg(feature = "alloc")]
pub use self::{atomic::AtomicCell, node::Snapshot};
