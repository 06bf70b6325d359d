//! Pointer with a small counter packed into its alignment bits.
//!
//! Number of tag bits is limited by the alignment of the pointee.
//! Address manipulation goes through strict-provenance APIs,
//! so pointer restored from a tagged value is safe to dereference.

use core::{fmt, mem::align_of};

use crate::sync::{AtomicPtr, Ordering};

/// Pointer to `T` with tag stored in its lower bits.
#[repr(transparent)]
pub struct TaggedPtr<T>(*mut T);

impl<T> Clone for TaggedPtr<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPtr<T> {}

impl<T> PartialEq for TaggedPtr<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for TaggedPtr<T> {}

impl<T> fmt::Debug for TaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("ptr", &self.ptr())
            .field("tag", &self.tag())
            .finish()
    }
}

impl<T> TaggedPtr<T> {
    /// Number of bits available to store the tag.
    pub const TAG_BITS: u32 = align_of::<T>().trailing_zeros();

    /// Mask for tag bits. Also the largest tag value.
    pub const TAG_MASK: usize = align_of::<T>() - 1;

    /// Combines pointer and tag.
    ///
    /// # Panics
    ///
    /// When debug assertions are enabled, panics if pointer is misaligned
    /// or tag does not fit into `TAG_BITS`.
    #[inline(always)]
    pub fn new(ptr: *mut T, tag: usize) -> Self {
        debug_assert_eq!(ptr.addr() & Self::TAG_MASK, 0, "misaligned pointer");
        debug_assert!(tag <= Self::TAG_MASK, "tag overflow");
        TaggedPtr(ptr.map_addr(|addr| addr | tag))
    }

    /// Returns pointer without tag bits.
    #[inline(always)]
    pub fn ptr(&self) -> *mut T {
        self.0.map_addr(|addr| addr & !Self::TAG_MASK)
    }

    /// Returns tag value.
    #[inline(always)]
    pub fn tag(&self) -> usize {
        self.0.addr() & Self::TAG_MASK
    }

    /// Returns true if tag reached its maximum value.
    #[inline(always)]
    pub fn is_saturated(&self) -> bool {
        self.tag() == Self::TAG_MASK
    }

    /// Same pointer with different tag.
    #[inline(always)]
    #[must_use]
    pub fn with_tag(&self, tag: usize) -> Self {
        TaggedPtr::new(self.ptr(), tag)
    }
}

/// Atomic version of [`TaggedPtr`].
#[repr(transparent)]
pub struct AtomicTaggedPtr<T>(AtomicPtr<T>);

impl<T> AtomicTaggedPtr<T> {
    #[inline(always)]
    pub fn new(value: TaggedPtr<T>) -> Self {
        AtomicTaggedPtr(AtomicPtr::new(value.0))
    }

    #[inline(always)]
    pub fn load(&self, order: Ordering) -> TaggedPtr<T> {
        TaggedPtr(self.0.load(order))
    }

    #[inline(always)]
    pub fn swap(&self, value: TaggedPtr<T>, order: Ordering) -> TaggedPtr<T> {
        TaggedPtr(self.0.swap(value.0, order))
    }

    /// Stores `new` if current value, tag included, equals `current`.
    ///
    /// # Errors
    ///
    /// Returns actual value if it differs from `current`.
    /// May fail spuriously.
    #[inline(always)]
    pub fn compare_exchange_weak(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.0
            .compare_exchange_weak(current.0, new.0, success, failure)
            .map(TaggedPtr)
            .map_err(TaggedPtr)
    }
}

#[test]
#[cfg(not(loom))]
fn test_tag_roundtrip() {
    #[repr(align(16))]
    struct Sixteen(#[allow(dead_code)] u8);

    let mut value = Sixteen(0);
    let ptr: *mut Sixteen = &mut value;

    assert_eq!(TaggedPtr::<Sixteen>::TAG_BITS, 4);

    let tagged = TaggedPtr::new(ptr, 5);
    assert_eq!(tagged.ptr(), ptr);
    assert_eq!(tagged.tag(), 5);
    assert!(!tagged.is_saturated());

    let full = tagged.with_tag(TaggedPtr::<Sixteen>::TAG_MASK);
    assert!(full.is_saturated());
    assert_eq!(full.ptr(), ptr);
    assert_ne!(full, tagged);
}

#[test]
#[cfg(not(loom))]
fn test_atomic_tag_cas() {
    #[repr(align(16))]
    struct Sixteen(#[allow(dead_code)] u8);

    let mut value = Sixteen(0);
    let ptr: *mut Sixteen = &mut value;

    let atomic = AtomicTaggedPtr::new(TaggedPtr::new(ptr, 0));
    let cur = atomic.load(Ordering::Relaxed);

    // Tag is part of the comparison.
    let stale = cur.with_tag(1);
    assert_eq!(
        atomic.compare_exchange_weak(stale, cur.with_tag(2), Ordering::Relaxed, Ordering::Relaxed),
        Err(cur)
    );

    let mut expected = cur;
    while let Err(actual) =
        atomic.compare_exchange_weak(expected, cur.with_tag(3), Ordering::Relaxed, Ordering::Relaxed)
    {
        expected = actual;
    }
    assert_eq!(atomic.load(Ordering::Relaxed).tag(), 3);

    let old = atomic.swap(TaggedPtr::new(ptr, 0), Ordering::Relaxed);
    assert_eq!(old.tag(), 3);
    assert_eq!(old.ptr(), ptr);
}
