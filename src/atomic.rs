//! Lock-free cell holding a single value of arbitrary type.
//!
//! # Overview
//!
//! Every committed value lives in its own heap node
//! and the cell's slot is an atomic pointer to the current node.
//! Updates read current node, compute new value from it
//! and commit with compare-and-swap that succeeds only if slot
//! still points to the node that was read.
//! Node identity is compared, not value equality,
//! so any write that happened in between, including one made from within
//! the update function itself, is detected.
//!
//! Readers pin current node by incrementing a counter stored in the
//! slot pointer's alignment bits, turn the pin into a strong reference
//! and drop the pin. Writer that swaps a node out moves outstanding pins
//! into the node's strong count. No user code runs while a pin is held.
//!
//! Installed node carries a large bias in its strong count in place of the slot's
//! reference. A reader whose pin was moved may release it before the writer
//! gets to add it; the bias absorbs that until the writer exchanges it
//! for the pins and its own reference in one step.
//!
//! Reading takes one successful compare-and-swap on the slot.
//! It is retried only when the slot word changed in between,
//! and waits only while every tag value is taken by readers in flight.

use core::{
    convert::Infallible, fmt, future::Future, marker::PhantomData, mem::ManuallyDrop, ptr::NonNull,
};

use crate::{
    backoff::BackOff,
    node::{Node, Snapshot},
    sync::Ordering,
    tagged::{AtomicTaggedPtr, TaggedPtr},
};

/// Concurrency-safe mutable reference cell.
///
/// All operations are linearizable and lock-free.
/// Retrying operations spin with [`BackOff`] under contention.
///
/// Share it between threads with `Arc` or scoped borrows.
pub struct AtomicCell<T> {
    slot: AtomicTaggedPtr<Node<T>>,
    marker: PhantomData<Node<T>>,
}

unsafe impl<T> Send for AtomicCell<T> where T: Send + Sync {}
unsafe impl<T> Sync for AtomicCell<T> where T: Send + Sync {}

impl<T> AtomicCell<T> {
    /// Creates new cell holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        AtomicCell {
            slot: AtomicTaggedPtr::new(TaggedPtr::new(
                Snapshot::new(value).into_slot().as_ptr(),
                0,
            )),
            marker: PhantomData,
        }
    }

    /// Returns handle to the current value without cloning it.
    #[must_use]
    pub fn load(&self) -> Snapshot<T> {
        let mut backoff = BackOff::new();
        let mut cur = self.slot.load(Ordering::Relaxed);

        let pinned = loop {
            if cur.is_saturated() {
                crate::trace!("reader tag saturated, backing off");
                backoff.wait();
                cur = self.slot.load(Ordering::Relaxed);
                continue;
            }

            let pinned = cur.with_tag(cur.tag() + 1);

            // Acquire pairs with the release of the write that installed the node.
            match self.slot.compare_exchange_weak(
                cur,
                pinned,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break pinned,
                Err(actual) => cur = actual,
            }
        };

        let node = unsafe { NonNull::new_unchecked(pinned.ptr()) };

        unsafe {
            Node::retain(node, 1);
        }
        self.unpin(pinned);

        unsafe { Snapshot::from_node(node) }
    }

    /// Drops pin taken in `load`.
    fn unpin(&self, mut cur: TaggedPtr<Node<T>>) {
        let node = cur.ptr();

        loop {
            if cur.ptr() != node {
                // Node was swapped out and the pin now counts as a strong reference,
                // possibly not yet added by the writer. Then the bias covers it.
                // Caller retained its own one, so this never frees the node.
                unsafe { Node::release(NonNull::new_unchecked(node)) };
                return;
            }

            debug_assert!(cur.tag() > 0, "unpinning without pin");

            match self.slot.compare_exchange_weak(
                cur,
                cur.with_tag(cur.tag() - 1),
                // Release orders the retain above before a writer that swaps the node out.
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Takes over slot's reference to a node that was just swapped out.
    ///
    /// # Safety
    ///
    /// `old` must be the value replaced in the slot by the caller.
    unsafe fn retire(old: TaggedPtr<Node<T>>) -> Snapshot<T> {
        let node = unsafe { NonNull::new_unchecked(old.ptr()) };
        unsafe { Snapshot::from_slot(node, old.tag()) }
    }

    /// Unconditionally installs `new`, returning the node it replaced.
    fn swap(&self, new: Snapshot<T>) -> Snapshot<T> {
        let new = TaggedPtr::new(new.into_slot().as_ptr(), 0);
        let old = self.slot.swap(new, Ordering::AcqRel);
        unsafe { Self::retire(old) }
    }

    /// Single compare-and-swap attempt.
    /// Installs `new` if slot still holds `expected` node.
    /// Returns replaced node on success and gives `new` back on failure.
    fn commit(&self, expected: &Snapshot<T>, new: Snapshot<T>) -> Result<Snapshot<T>, Snapshot<T>> {
        let expected = expected.node().as_ptr();
        let mut cur = self.slot.load(Ordering::Relaxed);
        if cur.ptr() != expected {
            return Err(new);
        }

        let new = new.into_slot();

        loop {
            // Tag may change while readers come and go; that is not a write.
            match self.slot.compare_exchange_weak(
                cur,
                TaggedPtr::new(new.as_ptr(), 0),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(old) => return Ok(unsafe { Self::retire(old) }),
                Err(actual) => cur = actual,
            }

            // `expected` is held by the caller, so its address cannot be reused
            // and equal pointer means the very same node.
            if cur.ptr() != expected {
                // Never published, nobody else saw the bias.
                return Err(unsafe { Snapshot::revoke_slot(new) });
            }
        }
    }

    /// Retry loop shared by all retrying updates.
    ///
    /// Returns value that was replaced and value that was committed,
    /// or current value with the error if `f` declined.
    fn commit_with<F, E>(&self, mut f: F) -> Result<(Snapshot<T>, Snapshot<T>), (Snapshot<T>, E)>
    where
        F: FnMut(&T) -> Result<T, E>,
    {
        let mut backoff = BackOff::new();

        loop {
            let cur = self.load();
            let value = match f(&*cur) {
                Ok(value) => value,
                Err(err) => return Err((cur, err)),
            };

            let new = Snapshot::new(value);
            let committed = new.clone();

            match self.commit(&cur, new) {
                Ok(_old) => return Ok((cur, committed)),
                Err(_new) => {
                    crate::trace!(yielding = backoff.is_yielding(), "update contended");
                    backoff.wait();
                }
            }
        }
    }

    /// Retry loop for transformations that always produce a value.
    fn commit_always<F>(&self, mut f: F) -> (Snapshot<T>, Snapshot<T>)
    where
        F: FnMut(&T) -> T,
    {
        match self.commit_with(|cur| Ok::<T, Infallible>(f(cur))) {
            Ok(pair) => pair,
            Err((_, never)) => match never {},
        }
    }

    /// Asynchronous retry loop.
    ///
    /// Node read before suspension is pinned by a snapshot
    /// and revalidated when commit is attempted after `f` resolves.
    async fn commit_with_async<F, Fut>(&self, mut f: F) -> (Snapshot<T>, Snapshot<T>)
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let cur = self.load();
            let new = Snapshot::new(f(&*cur).await);
            let committed = new.clone();

            match self.commit(&cur, new) {
                Ok(_old) => return (cur, committed),
                Err(_new) => {
                    crate::trace!("async update contended");
                }
            }
        }
    }

    /// Returns clone of the current value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.load())
    }

    /// Replaces current value.
    pub fn set(&self, value: T) {
        drop(self.swap(Snapshot::new(value)));
    }

    /// Replaces current value, returning the one it replaced.
    ///
    /// Old value is moved out when no other handle shares it.
    pub fn get_and_set(&self, value: T) -> T
    where
        T: Clone,
    {
        Snapshot::unwrap_or_clone(self.swap(Snapshot::new(value)))
    }

    /// Replaces current value with the result of `f`.
    ///
    /// `f` is called again with fresh value each time another write wins the race,
    /// so it may run more than once and should be free of side effects
    /// that are unsafe to repeat.
    /// Panic in `f` propagates to the caller and leaves the cell untouched.
    pub fn update<F>(&self, f: F)
    where
        F: FnMut(&T) -> T,
    {
        let _ = self.commit_always(f);
    }

    /// Same as [`AtomicCell::update`] but returns value that was replaced.
    ///
    /// This is the value passed to the call of `f` whose result was committed.
    pub fn get_and_update<F>(&self, f: F) -> T
    where
        F: FnMut(&T) -> T,
        T: Clone,
    {
        let (old, committed) = self.commit_always(f);
        drop(committed);
        Snapshot::unwrap_or_clone(old)
    }

    /// Same as [`AtomicCell::update`] but returns value that was committed.
    pub fn update_and_get<F>(&self, f: F) -> T
    where
        F: FnMut(&T) -> T,
        T: Clone,
    {
        let (old, committed) = self.commit_always(f);
        drop(old);
        T::clone(&committed)
    }

    /// Makes exactly one attempt to replace current value with the result of `f`.
    ///
    /// Returns false if cell was written by anyone, `f` included,
    /// between reading the value and committing the new one.
    pub fn try_update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let cur = self.load();
        let new = Snapshot::new(f(&*cur));
        self.commit(&cur, new).is_ok()
    }

    /// Replaces current value with the result of `f` unless it returns `None`.
    ///
    /// Retries like [`AtomicCell::update`] while `f` returns `Some`.
    ///
    /// # Errors
    ///
    /// Returns `Err` with current value if `f` returned `None`.
    /// Cell is not written in that case.
    pub fn fetch_update<F>(&self, mut f: F) -> Result<T, T>
    where
        F: FnMut(&T) -> Option<T>,
        T: Clone,
    {
        match self.commit_with(|cur| f(cur).ok_or(())) {
            Ok((old, committed)) => {
                drop(committed);
                Ok(Snapshot::unwrap_or_clone(old))
            }
            Err((cur, ())) => Err(Snapshot::unwrap_or_clone(cur)),
        }
    }

    /// Stores `new` if current value equals `current`.
    ///
    /// Makes single attempt.
    ///
    /// # Errors
    ///
    /// Returns `Err` with the value found in the cell if it is not equal to `current`
    /// or was replaced between the comparison and the commit.
    pub fn compare_exchange(&self, current: &T, new: T) -> Result<T, T>
    where
        T: PartialEq + Clone,
    {
        let cur = self.load();
        if *cur != *current {
            return Err(Snapshot::unwrap_or_clone(cur));
        }

        match self.commit(&cur, Snapshot::new(new)) {
            Ok(old) => {
                drop(old);
                Ok(Snapshot::unwrap_or_clone(cur))
            }
            Err(_) => Err(self.get()),
        }
    }

    /// Asynchronous version of [`AtomicCell::update`].
    ///
    /// `f` may suspend. Value it was given is revalidated after it resumes.
    pub async fn update_async<F, Fut>(&self, f: F)
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = T>,
    {
        let _ = self.commit_with_async(f).await;
    }

    /// Asynchronous version of [`AtomicCell::get_and_update`].
    pub async fn get_and_update_async<F, Fut>(&self, f: F) -> T
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = T>,
        T: Clone,
    {
        let (old, committed) = self.commit_with_async(f).await;
        drop(committed);
        Snapshot::unwrap_or_clone(old)
    }

    /// Asynchronous version of [`AtomicCell::update_and_get`].
    pub async fn update_and_get_async<F, Fut>(&self, f: F) -> T
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = T>,
        T: Clone,
    {
        let (old, committed) = self.commit_with_async(f).await;
        drop(old);
        T::clone(&committed)
    }

    /// Asynchronous version of [`AtomicCell::try_update`].
    ///
    /// Fails if cell was written while `f` was suspended.
    pub async fn try_update_async<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> Fut,
        Fut: Future<Output = T>,
    {
        let cur = self.load();
        let new = Snapshot::new(f(&*cur).await);
        self.commit(&cur, new).is_ok()
    }

    /// Consumes the cell and returns its value.
    ///
    /// Value is moved out when no snapshot shares it.
    pub fn into_inner(self) -> T
    where
        T: Clone,
    {
        let this = ManuallyDrop::new(self);
        let cur = this.slot.load(Ordering::Acquire);
        debug_assert_eq!(cur.tag(), 0, "pin outlived operation");

        Snapshot::unwrap_or_clone(unsafe { Self::retire(cur) })
    }
}

impl<T> Drop for AtomicCell<T> {
    fn drop(&mut self) {
        let cur = self.slot.load(Ordering::Acquire);
        debug_assert_eq!(cur.tag(), 0, "pin outlived operation");
        drop(unsafe { Self::retire(cur) });
    }
}

impl<T> Default for AtomicCell<T>
where
    T: Default,
{
    fn default() -> Self {
        AtomicCell::new(T::default())
    }
}

impl<T> From<T> for AtomicCell<T> {
    fn from(value: T) -> Self {
        AtomicCell::new(value)
    }
}

impl<T> fmt::Debug for AtomicCell<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCell").field(&*self.load()).finish()
    }
}

/// Value that counts live instances.
#[cfg(all(test, feature = "std", not(loom)))]
struct Tracked {
    live: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    value: u32,
}

#[cfg(all(test, feature = "std", not(loom)))]
impl Tracked {
    fn new(live: &std::sync::Arc<std::sync::atomic::AtomicUsize>, value: u32) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Tracked {
            live: live.clone(),
            value,
        }
    }
}

#[cfg(all(test, feature = "std", not(loom)))]
impl Clone for Tracked {
    fn clone(&self) -> Self {
        Tracked::new(&self.live, self.value)
    }
}

#[cfg(all(test, feature = "std", not(loom)))]
impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Future that suspends once, asking to be polled again.
#[cfg(all(test, feature = "std", not(loom)))]
struct YieldNow(bool);

#[cfg(all(test, feature = "std", not(loom)))]
impl Future for YieldNow {
    type Output = ();

    fn poll(
        mut self: core::pin::Pin<&mut Self>,
        cx: &mut core::task::Context<'_>,
    ) -> core::task::Poll<()> {
        if self.0 {
            core::task::Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            core::task::Poll::Pending
        }
    }
}

#[cfg(all(test, feature = "std", not(loom)))]
fn yield_now() -> YieldNow {
    YieldNow(false)
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_try_update_fails_on_reentrant_write() {
    let cell = AtomicCell::new(String::from("x"));

    let updated = cell.try_update(|cur| {
        cell.update(|v| format!("{v}a"));
        format!("{cur}b")
    });

    assert!(!updated);
    assert_eq!(cell.get(), "xa");
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_update_retries_after_reentrant_write() {
    let cell = AtomicCell::new(String::from("x"));
    let mut calls = 0;

    let committed = cell.update_and_get(|cur| {
        calls += 1;
        if calls == 1 {
            cell.set(String::from("y"));
        }
        format!("{cur}b")
    });

    assert_eq!(calls, 2);
    assert_eq!(committed, "yb");
    assert_eq!(cell.get(), "yb");
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_get_and_update_returns_committed_input() {
    let cell = AtomicCell::new(1u32);
    let mut first = true;

    let old = cell.get_and_update(|cur| {
        if first {
            first = false;
            cell.set(10);
        }
        cur + 1
    });

    assert_eq!(old, 10);
    assert_eq!(cell.get(), 11);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_rewrite_of_equal_value_is_detected() {
    let cell = AtomicCell::new(5u32);

    assert!(!cell.try_update(|cur| {
        cell.set(5);
        cur + 1
    }));
    assert_eq!(cell.get(), 5);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_fetch_update_declined() {
    let cell = AtomicCell::new(3u32);

    assert_eq!(cell.fetch_update(|_| None), Err(3));
    assert_eq!(cell.fetch_update(|v| v.checked_sub(1)), Ok(3));
    assert_eq!(cell.get(), 2);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_compare_exchange() {
    let cell = AtomicCell::new(String::from("a"));

    assert_eq!(
        cell.compare_exchange(&String::from("b"), String::from("c")),
        Err(String::from("a"))
    );
    assert_eq!(
        cell.compare_exchange(&String::from("a"), String::from("c")),
        Ok(String::from("a"))
    );
    assert_eq!(cell.get(), "c");
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_panic_leaves_cell_untouched() {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    let live = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cell = AtomicCell::new(Tracked::new(&live, 1));

    let result = catch_unwind(AssertUnwindSafe(|| {
        cell.update(|_| panic!("transformation failed"));
    }));

    assert!(result.is_err());
    assert_eq!(cell.load().value, 1);
    assert_eq!(live.load(Ordering::Relaxed), 1);

    drop(cell);
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_no_leaks() {
    let live = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let cell = AtomicCell::new(Tracked::new(&live, 0));
    let snapshot = cell.load();

    for i in 1..100 {
        cell.update(|cur| Tracked::new(&live, cur.value + i));
    }
    let old = cell.get_and_set(Tracked::new(&live, 0));
    assert!(cell.try_update(|cur| cur.clone()));

    // Value held by a snapshot outlives the writes.
    assert_eq!(snapshot.value, 0);
    drop(snapshot);
    drop(old);

    assert_eq!(live.load(Ordering::Relaxed), 1);
    drop(cell);
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_failed_commit_returns_value_intact() {
    let live = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cell = AtomicCell::new(Tracked::new(&live, 1));

    let stale = cell.load();
    cell.set(Tracked::new(&live, 2));

    let Err(rejected) = cell.commit(&stale, Snapshot::new(Tracked::new(&live, 3))) else {
        panic!("commit over a stale snapshot succeeded");
    };
    assert_eq!(Snapshot::try_unwrap(rejected).ok().map(|v| v.value), Some(3));

    drop(stale);
    assert_eq!(cell.into_inner().value, 2);
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_get_and_set_moves_unshared_value() {
    let live = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cell = AtomicCell::new(Tracked::new(&live, 1));

    let old = cell.get_and_set(Tracked::new(&live, 2));
    assert_eq!(old.value, 1);
    // Moved out, not cloned.
    assert_eq!(live.load(Ordering::Relaxed), 2);

    let snapshot = cell.load();
    let old = cell.get_and_set(Tracked::new(&live, 3));
    assert_eq!(old.value, 2);
    // Shared with snapshot, so cloned.
    assert_eq!(live.load(Ordering::Relaxed), 4);
    drop(snapshot);

    assert_eq!(cell.into_inner().value, 3);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_debug_and_default() {
    let cell = AtomicCell::<u32>::default();
    assert_eq!(format!("{cell:?}"), "AtomicCell(0)");

    let cell = AtomicCell::from("text");
    assert_eq!(format!("{:?}", cell.load()), "\"text\"");
    assert_eq!(format!("{}", cell.load()), "text");
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_load_waits_out_saturated_tag() {
    type Tag = TaggedPtr<Node<u32>>;

    let cell = AtomicCell::new(7u32);
    let idle = cell.slot.load(Ordering::Relaxed);

    // Every tag value is taken, as if that many readers were between pin and unpin.
    cell.slot.swap(idle.with_tag(Tag::TAG_MASK), Ordering::Relaxed);

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| cell.get());

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!reader.is_finished());

        // One of them leaves, making room for the waiting reader.
        cell.slot.swap(idle.with_tag(Tag::TAG_MASK - 1), Ordering::Relaxed);
        assert_eq!(reader.join().unwrap(), 7);
    });

    // Reader dropped its own pin and left the rest in place.
    assert_eq!(cell.slot.load(Ordering::Relaxed).tag(), Tag::TAG_MASK - 1);
    cell.slot.swap(idle, Ordering::Relaxed);
    assert_eq!(cell.get(), 7);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_concurrent_modifications() {
    const UPDATES: usize = 20_000;
    const THREADS: usize = 8;

    let cell = AtomicCell::new(String::new());

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..UPDATES / THREADS {
                    cell.update(|v| format!("{v}a"));
                }
            });
        }
    });

    let value = cell.get();
    assert_eq!(value.len(), UPDATES);
    assert!(value.chars().all(|c| c == 'a'));
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_concurrent_readers_never_see_torn_writes() {
    let cell = AtomicCell::new((0u64, 0u64));

    std::thread::scope(|scope| {
        for i in 0..4 {
            let cell = &cell;
            scope.spawn(move || {
                for j in 0..2_000u64 {
                    let v = i * 1_000_000 + j;
                    if j % 2 == 0 {
                        cell.set((v, v));
                    } else {
                        let (a, b) = cell.get_and_set((v, v));
                        assert_eq!(a, b);
                    }
                }
            });
        }

        for _ in 0..4 {
            let cell = &cell;
            scope.spawn(move || {
                for _ in 0..10_000 {
                    let (a, b) = cell.get();
                    assert_eq!(a, b);
                }
            });
        }
    });
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_snapshots_dropped_while_writers_swap() {
    const READERS: usize = 16;
    const WRITERS: u32 = 4;

    let live = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cell = AtomicCell::new(Tracked::new(&live, 0));

    std::thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                for _ in 0..5_000 {
                    // Released right away, often before the writer that
                    // swapped the node out has accounted for the pin.
                    drop(cell.load());
                }
            });
        }

        for w in 0..WRITERS {
            let cell = &cell;
            let live = &live;
            scope.spawn(move || {
                for i in 0..2_000u32 {
                    if i % 2 == 0 {
                        cell.set(Tracked::new(live, i));
                    } else {
                        drop(cell.get_and_set(Tracked::new(live, w)));
                    }
                }
            });
        }
    });

    assert_eq!(live.load(Ordering::Relaxed), 1);
    drop(cell);
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_concurrent_try_update_counts_successes() {
    let cell = AtomicCell::new(0usize);
    let successes = std::sync::atomic::AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..1_000 {
                    if cell.try_update(|v| v + 1) {
                        successes.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(cell.get(), successes.load(Ordering::Relaxed));
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_async_update_revalidates_after_suspension() {
    let cell = AtomicCell::new(String::from("x"));

    let updated = futures::executor::block_on(cell.try_update_async(|cur| {
        let cur = cur.clone();
        let cell = &cell;
        async move {
            yield_now().await;
            cell.update(|v| format!("{v}a"));
            format!("{cur}b")
        }
    }));

    assert!(!updated);
    assert_eq!(cell.get(), "xa");

    let mut calls = 0;
    let committed = futures::executor::block_on(cell.update_and_get_async(|cur| {
        calls += 1;
        let first = calls == 1;
        let cur = cur.clone();
        let cell = &cell;
        async move {
            yield_now().await;
            if first {
                cell.set(String::from("y"));
            }
            format!("{cur}b")
        }
    }));

    assert_eq!(calls, 2);
    assert_eq!(committed, "yb");
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_async_interleaved_tasks() {
    const TASKS: usize = 64;

    let cell = AtomicCell::new(String::new());

    let tasks = (0..TASKS).map(|_| {
        cell.update_async(|v| {
            let v = v.clone();
            async move {
                yield_now().await;
                v + "a"
            }
        })
    });
    futures::executor::block_on(futures::future::join_all(tasks));

    assert_eq!(cell.get(), "a".repeat(TASKS));

    let old = futures::executor::block_on(cell.get_and_update_async(|_| async { String::new() }));
    assert_eq!(old.len(), TASKS);
    assert_eq!(cell.get(), "");
}

#[test]
#[cfg(all(feature = "std", not(loom)))]
fn test_suspending_updates_from_threads() {
    let cell = AtomicCell::new(Vec::<usize>::new());

    std::thread::scope(|scope| {
        for t in 0..4 {
            let cell = &cell;
            scope.spawn(move || {
                for i in 0..100 {
                    futures::executor::block_on(cell.update_async(|v| {
                        let mut v = v.clone();
                        async move {
                            yield_now().await;
                            v.push(t * 100 + i);
                            v
                        }
                    }));
                }
            });
        }
    });

    let mut values = cell.get();
    values.sort_unstable();
    assert_eq!(values, (0..400).collect::<Vec<_>>());
}

#[cfg(all(test, feature = "std", not(loom)))]
proptest::proptest! {
    #[test]
    fn prop_set_get(x in proptest::prelude::any::<String>(), y in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x);
        cell.set(y.clone());
        proptest::prop_assert_eq!(cell.get(), y);
    }

    #[test]
    fn prop_update_get(x in proptest::prelude::any::<String>(), y in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x);
        cell.update(|_| y.clone());
        proptest::prop_assert_eq!(cell.get(), y);
    }

    #[test]
    fn prop_get_and_set(x in proptest::prelude::any::<String>(), y in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x.clone());
        proptest::prop_assert_eq!(cell.get_and_set(y.clone()), x);
        proptest::prop_assert_eq!(cell.get(), y);
    }

    #[test]
    fn prop_get_and_update(x in proptest::prelude::any::<String>(), y in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x.clone());
        proptest::prop_assert_eq!(cell.get_and_update(|_| y.clone()), x);
        proptest::prop_assert_eq!(cell.get(), y);
    }

    #[test]
    fn prop_update_and_get(x in proptest::prelude::any::<String>(), y in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x.clone());
        let mut seen = None;
        let committed = cell.update_and_get(|cur| {
            seen = Some(cur.clone());
            y.clone()
        });
        proptest::prop_assert_eq!(seen, Some(x));
        proptest::prop_assert_eq!(committed, y);
    }

    #[test]
    fn prop_try_update(x in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x.clone());
        let updated = cell.try_update(|v| format!("{}1", v));
        proptest::prop_assert!(updated);
        proptest::prop_assert_eq!(cell.get(), format!("{}1", x));
    }

    #[test]
    fn prop_try_update_reentrant(x in proptest::prelude::any::<String>()) {
        let cell = AtomicCell::new(x.clone());
        let updated = cell.try_update(|cur| {
            cell.update(|v| format!("{}a", v));
            format!("{}b", cur)
        });
        proptest::prop_assert!(!updated);
        proptest::prop_assert_eq!(cell.get(), format!("{}a", x));
    }

    #[test]
    fn prop_same_updates_same_state(
        x in proptest::prelude::any::<String>(),
        ops in proptest::collection::vec(proptest::prelude::any::<String>(), 0..16),
    ) {
        let first = AtomicCell::new(x.clone());
        let second = AtomicCell::new(x);

        for op in &ops {
            first.update(|v| format!("{}{}", v, op));
        }

        std::thread::scope(|scope| {
            let second = &second;
            for op in &ops {
                // Each update comes from a different thread, one at a time.
                scope
                    .spawn(move || second.update(|v| format!("{}{}", v, op)))
                    .join()
                    .unwrap();
            }
        });

        proptest::prop_assert_eq!(first.get(), second.get());
    }
}

#[cfg(loom)]
#[test]
fn loom_test_concurrent_update() {
    loom::model(|| {
        let cell = loom::sync::Arc::new(AtomicCell::new(0u32));

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let cell = cell.clone();
                loom::thread::spawn(move || cell.update(|v| v + 1))
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(cell.get(), 2);
    });
}

#[cfg(loom)]
#[test]
fn loom_test_load_while_set() {
    loom::model(|| {
        let cell = loom::sync::Arc::new(AtomicCell::new(1u32));

        let writer = {
            let cell = cell.clone();
            loom::thread::spawn(move || cell.set(2))
        };

        let snapshot = cell.load();
        assert!(*snapshot == 1 || *snapshot == 2);

        writer.join().unwrap();
        drop(snapshot);
        assert_eq!(cell.get(), 2);
    });
}

#[cfg(loom)]
#[test]
fn loom_test_snapshot_dropped_during_set() {
    loom::model(|| {
        // Values are loom `Arc`s, so a double drop or a leak fails the model.
        let cell = loom::sync::Arc::new(AtomicCell::new(loom::sync::Arc::new(1u32)));

        let reader = {
            let cell = cell.clone();
            loom::thread::spawn(move || {
                let snapshot = cell.load();
                let value = **snapshot;
                drop(snapshot);
                value
            })
        };

        let old = cell.get_and_set(loom::sync::Arc::new(2));
        assert_eq!(*old, 1);

        let seen = reader.join().unwrap();
        assert!(seen == 1 || seen == 2);
        assert_eq!(**cell.load(), 2);
    });
}

#[cfg(loom)]
#[test]
fn loom_test_try_update_races_set() {
    loom::model(|| {
        let cell = loom::sync::Arc::new(AtomicCell::new(0u32));

        let writer = {
            let cell = cell.clone();
            loom::thread::spawn(move || cell.get_and_set(10))
        };

        let updated = cell.try_update(|v| v + 1);
        let old = writer.join().unwrap();

        let value = cell.get();
        if updated {
            assert!((old == 1 && value == 10) || (old == 0 && value == 11));
        } else {
            assert_eq!(old, 0);
            assert_eq!(value, 10);
        }
    });
}
