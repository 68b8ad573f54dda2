//! Alignment arithmetic and sizing constants shared by every strategy.

/// The system page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Alignment the platform allocator guarantees without the aligned path.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Alignment of every block a strategy requests from its parent.
pub const BLOCK_ALIGN: usize = 16;

/// Default block size for arenas created without an explicit size (64 KB).
pub const DEFAULT_ARENA_BLOCK_SIZE: usize = 64 * 1024;

/// Default block size for region blocks (16 KB).
pub const DEFAULT_REGION_SIZE: usize = 16 * 1024;

/// Default number of chunks carved out of each pool block.
pub const DEFAULT_CHUNKS_PER_BLOCK: usize = 64;

/// Largest chunk a pool will accept (1 MB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two; zero leaves the value untouched.
pub const fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        value
    } else {
        (value + (align - 1)) & !(align - 1)
    }
}

/// Checked variant of [`align_up`] returning `None` on overflow.
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    if align == 0 {
        return Some(value);
    }
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Bytes needed to move `addr` forward to the next multiple of `align`.
#[inline]
pub const fn padding_for(addr: usize, align: usize) -> usize {
    align_up(addr, align) - addr
}

/// Normalizes a caller supplied alignment.
///
/// Zero means "default alignment"; anything else must be a power of two.
#[inline]
pub const fn normalize_align(align: usize) -> Option<usize> {
    if align == 0 {
        Some(DEFAULT_ALIGNMENT)
    } else if align.is_power_of_two() {
        Some(align)
    } else {
        None
    }
}
