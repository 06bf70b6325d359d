/// Zero-sized marker aligned to the cache line size of the target architecture.
///
/// Cache lines are assumed to be N bytes long, where N depends on the architecture:
/// - `x86_64`, aarch64 and powerpc64: 64 bytes, but N is 128 as prefetching pulls pairs of cache lines on some CPUs.
/// - arm, mips, mips32r6, mips64, mips64r6, sparc and hexagon: 32 bytes
/// - m68k: 16 bytes
/// - s390x: 256 bytes
/// - others: 64 bytes.
///
/// Placing it as a field raises alignment of the containing structure.
/// Heap cells of [`AtomicCell`](crate::atomic::AtomicCell) use it twice over:
/// neighbouring cells never share a line,
/// and the low address bits left free by the alignment carry the reader tag.
#[cfg_attr(
    any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64"
    ),
    repr(align(128))
)]
#[cfg_attr(
    any(
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips32r6",
        target_arch = "mips64",
        target_arch = "mips64r6",
        target_arch = "sparc",
        target_arch = "hexagon"
    ),
    repr(align(32))
)]
#[cfg_attr(target_arch = "m68k", repr(align(16)))]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips32r6",
        target_arch = "mips64",
        target_arch = "mips64r6",
        target_arch = "sparc",
        target_arch = "hexagon",
        target_arch = "m68k",
        target_arch = "s390x",
    )),
    repr(align(64))
)]
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheAlign;

/// Smallest alignment `CacheAlign` may have on any supported target.
pub const MIN_CACHE_ALIGN: usize = 16;

const _: () = assert!(core::mem::align_of::<CacheAlign>() >= MIN_CACHE_ALIGN);

#[test]
fn test_cache_align_raises_alignment() {
    #[repr(C)]
    struct Aligned {
        _align: CacheAlign,
        byte: u8,
    }

    assert_eq!(core::mem::size_of::<CacheAlign>(), 0);
    assert_eq!(
        core::mem::align_of::<Aligned>(),
        core::mem::align_of::<CacheAlign>()
    );
}
