#![allow(unused_imports)]

pub use loom::{
    hint::spin_loop,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering, fence},
    thread::yield_now,
};
