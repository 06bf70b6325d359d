//! Heap cells holding committed values of [`AtomicCell`](crate::atomic::AtomicCell).

use alloc::boxed::Box;
use core::{
    fmt,
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    cache::CacheAlign,
    sync::{AtomicUsize, Ordering, fence},
};

/// Part of the strong count standing for the reference held by the cell's slot.
///
/// Readers whose pins were handed over to a node may release them before the writer
/// that swapped the node out gets to add them. The bias keeps such early releases
/// from reaching zero until the writer exchanges it for the real count.
pub(crate) const SLOT_BIAS: usize = 1 << (usize::BITS - 1);

/// One committed value with its strong reference count.
///
/// Value is never mutated after the node is published.
/// Node is freed by whichever operation brings the count to exactly zero.
#[repr(C)]
pub(crate) struct Node<T> {
    _align: CacheAlign,
    strong: AtomicUsize,
    value: T,
}

impl<T> Node<T> {
    /// Allocates node with single strong reference.
    fn alloc(value: T) -> NonNull<Self> {
        let node = Box::new(Node {
            _align: CacheAlign,
            strong: AtomicUsize::new(1),
            value,
        });
        NonNull::from(Box::leak(node))
    }

    /// Adds `count` strong references.
    ///
    /// # Safety
    ///
    /// Caller must guarantee that node is alive,
    /// either by holding a strong reference or a pin in the slot tag.
    /// While the slot reference is not yet exchanged for the real count,
    /// the bias keeps the node alive.
    #[inline(always)]
    pub(crate) unsafe fn retain(node: NonNull<Self>, count: usize) {
        let old = unsafe { node.as_ref() }
            .strong
            .fetch_add(count, Ordering::Relaxed);
        debug_assert!(old > 0, "retained freed node");
    }

    /// Drops one strong reference and frees the node when it was the last one.
    ///
    /// # Safety
    ///
    /// Caller must own the strong reference being released.
    #[inline(always)]
    pub(crate) unsafe fn release(node: NonNull<Self>) {
        let old = unsafe { node.as_ref() }
            .strong
            .fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "released freed node");

        if old == 1 {
            fence(Ordering::Acquire);
            drop(unsafe { Box::from_raw(node.as_ptr()) });
        }
    }
}

/// Owned handle to a value committed to [`AtomicCell`](crate::atomic::AtomicCell).
///
/// Value stays readable regardless of later writes to the cell.
/// Cloning a snapshot is cheap and never clones the value.
pub struct Snapshot<T> {
    node: NonNull<Node<T>>,
    marker: PhantomData<Node<T>>,
}

unsafe impl<T> Send for Snapshot<T> where T: Send + Sync {}
unsafe impl<T> Sync for Snapshot<T> where T: Send + Sync {}

impl<T> Snapshot<T> {
    /// Wraps fresh value, not yet shared with anyone.
    pub(crate) fn new(value: T) -> Self {
        Snapshot {
            node: Node::alloc(value),
            marker: PhantomData,
        }
    }

    /// Adopts one strong reference to `node`.
    ///
    /// # Safety
    ///
    /// Caller must transfer ownership of a strong reference.
    #[inline(always)]
    pub(crate) unsafe fn from_node(node: NonNull<Node<T>>) -> Self {
        Snapshot {
            node,
            marker: PhantomData,
        }
    }

    /// Turns this reference into the slot's one, ready to be installed.
    #[inline(always)]
    pub(crate) fn into_slot(self) -> NonNull<Node<T>> {
        let node = self.into_node();
        unsafe { node.as_ref() }
            .strong
            .fetch_add(SLOT_BIAS - 1, Ordering::Relaxed);
        node
    }

    /// Takes back a reference prepared with `into_slot` that was never installed.
    ///
    /// # Safety
    ///
    /// `node` must come from `into_slot` and must not be visible in any slot.
    #[inline(always)]
    pub(crate) unsafe fn revoke_slot(node: NonNull<Node<T>>) -> Self {
        unsafe { node.as_ref() }
            .strong
            .fetch_sub(SLOT_BIAS - 1, Ordering::Relaxed);
        unsafe { Snapshot::from_node(node) }
    }

    /// Takes over the slot's reference to a node that was removed from the slot
    /// while `pins` readers were pinning it.
    /// Bias is exchanged for one reference per pin plus the returned one.
    ///
    /// # Safety
    ///
    /// Caller must be the one who removed `node` from the slot.
    #[inline(always)]
    pub(crate) unsafe fn from_slot(node: NonNull<Node<T>>, pins: usize) -> Self {
        let old = unsafe { node.as_ref() }
            .strong
            .fetch_add((pins + 1).wrapping_sub(SLOT_BIAS), Ordering::AcqRel);

        // Early releases are bounded by `pins`, so the result is at least one.
        debug_assert!(
            (1..SLOT_BIAS).contains(&old.wrapping_add(pins + 1).wrapping_sub(SLOT_BIAS)),
            "slot reference lost"
        );
        unsafe { Snapshot::from_node(node) }
    }

    /// Gives up the strong reference without releasing it.
    #[inline(always)]
    fn into_node(self) -> NonNull<Node<T>> {
        ManuallyDrop::new(self).node
    }

    #[inline(always)]
    pub(crate) fn node(&self) -> NonNull<Node<T>> {
        self.node
    }

    /// Returns true if both snapshots refer to the same committed value.
    ///
    /// Two separately committed equal values are not the same.
    #[inline(always)]
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.node == other.node
    }

    /// Moves value out if this is the only handle to it.
    ///
    /// # Errors
    ///
    /// Returns snapshot back if it is shared.
    pub fn try_unwrap(this: Self) -> Result<T, Self> {
        let strong = &unsafe { this.node.as_ref() }.strong;
        if strong
            .compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(this);
        }

        let node = this.into_node();

        // Count dropped to zero, nobody else may reach the node.
        // Value is moved out and the rest is deallocated without dropping it again.
        unsafe {
            let value = ptr::read(&raw const (*node.as_ptr()).value);
            drop(Box::from_raw(node.cast::<Node<ManuallyDrop<T>>>().as_ptr()));
            Ok(value)
        }
    }

    /// Moves value out if this is the only handle to it, clones otherwise.
    pub fn unwrap_or_clone(this: Self) -> T
    where
        T: Clone,
    {
        Snapshot::try_unwrap(this).unwrap_or_else(|this| T::clone(&*this))
    }
}

impl<T> Clone for Snapshot<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        unsafe {
            Node::retain(self.node, 1);
            Snapshot::from_node(self.node)
        }
    }
}

impl<T> Drop for Snapshot<T> {
    #[inline(always)]
    fn drop(&mut self) {
        unsafe { Node::release(self.node) }
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &unsafe { self.node.as_ref() }.value
    }
}

impl<T> fmt::Debug for Snapshot<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> fmt::Display for Snapshot<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

#[test]
#[cfg(not(loom))]
fn test_snapshot_unwrap() {
    use alloc::string::String;

    let snapshot = Snapshot::new(String::from("value"));
    let other = snapshot.clone();
    assert!(Snapshot::ptr_eq(&snapshot, &other));

    let snapshot = Snapshot::try_unwrap(snapshot).unwrap_err();
    assert_eq!(Snapshot::unwrap_or_clone(other), "value");

    assert_eq!(Snapshot::try_unwrap(snapshot).unwrap(), "value");
}

#[test]
#[cfg(not(loom))]
fn test_snapshot_node_is_aligned() {
    assert!(TaggedAlign::<u8>::BITS >= 4);
    assert!(TaggedAlign::<[u64; 9]>::BITS >= 4);

    struct TaggedAlign<T>(PhantomData<T>);

    impl<T> TaggedAlign<T> {
        const BITS: u32 = crate::tagged::TaggedPtr::<Node<T>>::TAG_BITS;
    }

    let snapshot = Snapshot::new(1u8);
    assert_eq!(
        snapshot.node().as_ptr().addr() & crate::tagged::TaggedPtr::<Node<u8>>::TAG_MASK,
        0
    );
}

#[test]
#[cfg(not(loom))]
fn test_slot_reference_survives_early_release() {
    use alloc::string::String;

    let node = Snapshot::new(String::from("value")).into_slot();

    // Reader pinned the node, then its writer swapped it out.
    // Reader retains, drops the moved pin and its own handle
    // before the writer adds the pin to the count.
    unsafe {
        Node::retain(node, 1);
        Node::release(node);
        Node::release(node);
    }

    let retired = unsafe { Snapshot::from_slot(node, 1) };
    assert_eq!(Snapshot::try_unwrap(retired).ok().as_deref(), Some("value"));
}

#[test]
#[cfg(not(loom))]
fn test_revoked_slot_reference_is_owned_again() {
    let snapshot = Snapshot::new(5u8);
    let other = snapshot.clone();

    let node = snapshot.into_slot();
    let snapshot = unsafe { Snapshot::revoke_slot(node) };

    drop(other);
    assert_eq!(Snapshot::try_unwrap(snapshot).ok(), Some(5));
}
