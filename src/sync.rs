#![allow(unused_imports)]

pub use core::{
    hint::spin_loop,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering, fence},
};

#[cfg(feature = "std")]
pub use std::thread::yield_now;
