//! Waiting strategy for compare-and-swap retry loops.

#[cfg_attr(loom, allow(unused_imports))]
use crate::sync::spin_loop;

/// Waiting hint between failed attempts.
///
/// Spins for an exponentially growing number of iterations,
/// then switches to yielding the thread when "std" feature is enabled.
/// It never blocks, so a retry loop that uses it stays lock-free.
#[derive(Debug, Default)]
pub struct BackOff {
    step: u32,
}

impl BackOff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;

    #[inline(always)]
    #[must_use]
    pub const fn new() -> Self {
        BackOff { step: 0 }
    }

    /// Returns true once spinning gave up in favor of yielding.
    #[inline(always)]
    #[must_use]
    pub fn is_yielding(&self) -> bool {
        self.step > Self::SPIN_LIMIT
    }

    #[inline]
    pub fn wait(&mut self) {
        #[cfg(loom)]
        {
            crate::sync::yield_now();
        }

        #[cfg(not(loom))]
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                spin_loop();
            }
        } else {
            #[cfg(feature = "std")]
            crate::sync::yield_now();

            #[cfg(not(feature = "std"))]
            for _ in 0..1u32 << Self::SPIN_LIMIT {
                spin_loop();
            }
        }

        if self.step <= Self::YIELD_LIMIT {
            self.step += 1;
        }
    }
}

#[test]
#[cfg(not(loom))]
fn test_backoff_switches_to_yield() {
    let mut backoff = BackOff::new();
    assert!(!backoff.is_yielding());

    for _ in 0..=BackOff::SPIN_LIMIT {
        backoff.wait();
    }
    assert!(backoff.is_yielding());

    // Step saturates instead of growing without bound.
    for _ in 0..100 {
        backoff.wait();
    }
    assert_eq!(backoff.step, BackOff::YIELD_LIMIT + 1);
}
