//! `PoolAllocator` - fixed-size chunks from block-local free lists.
//!
//! Each block is carved into `chunks_per_block` chunks. A chunk is a small
//! header followed by its body:
//!
//! ```text
//! | tag: pool id + block index | body (chunk_size, rounded to alignment) |
//! ```
//!
//! While a chunk is free its body stores the next free chunk, so the free
//! list costs no memory of its own. Free chunks of every block are merged
//! into one list. The header tag lets `free` find the owning block in O(1)
//! and reject chunks that belong to a different pool.

use core::cell::RefCell;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};

use super::allocator::{check_request, AllocError, Allocator, AllocatorKind};
use super::config::PoolConfig;
use super::constants::{align_up, BLOCK_ALIGN};
use super::options::{AllocOptions, AllocStrategy};
use super::policy::FailurePolicy;
use super::stats::{AllocStats, StatsCell};
use super::trace::{alloc_debug, alloc_warn};

const TAG_BYTES: usize = mem::size_of::<u64>();
const BLOCK_SHIFT: u64 = 32;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

#[inline(always)]
fn pack(pool_id: u32, block: u32) -> u64 {
    (u64::from(pool_id) << BLOCK_SHIFT) | u64::from(block)
}

#[inline(always)]
fn unpack(tag: u64) -> (u32, u32) {
    ((tag >> BLOCK_SHIFT) as u32, tag as u32)
}

/// A block carved into chunks.
struct PoolBlock {
    ptr: NonNull<u8>,
    free_chunks: usize,
}

struct PoolState {
    blocks: Vec<PoolBlock>,
    // Base address of the first free chunk (its header), across all blocks.
    free_head: Option<NonNull<u8>>,
}

/// Geometry derived from the config once at creation.
#[derive(Debug, Clone, Copy)]
struct ChunkLayout {
    chunk_size: usize,
    align: usize,
    header: usize,
    stride: usize,
    per_block: usize,
    block_bytes: usize,
    block_align: usize,
}

impl ChunkLayout {
    fn new(config: &PoolConfig) -> Result<Self, AllocError> {
        let align = config
            .alignment
            .max(mem::align_of::<u64>())
            .max(mem::align_of::<*mut u8>());
        let header = align_up(TAG_BYTES, align);
        let body = align_up(config.chunk_size.max(mem::size_of::<*mut u8>()), align);
        let stride = header + body;
        let per_block = config.effective_chunks_per_block();
        let block_bytes = stride
            .checked_mul(per_block)
            .ok_or(AllocError::InvalidConfig("pool block size overflows"))?;
        Ok(Self {
            chunk_size: config.chunk_size,
            align,
            header,
            stride,
            per_block,
            block_bytes,
            block_align: align.max(BLOCK_ALIGN),
        })
    }
}

/// A fixed-size chunk allocator drawing its blocks from a parent allocator.
pub struct PoolAllocator<'p> {
    parent: &'p dyn Allocator,
    state: RefCell<PoolState>,
    id: u32,
    layout: ChunkLayout,
    policy: FailurePolicy,
    stats: StatsCell,
}

impl<'p> PoolAllocator<'p> {
    /// Creates a pool and eagerly acquires its first block.
    ///
    /// # Errors
    /// `InvalidConfig` when the chunk size is zero or above
    /// [`MAX_CHUNK_SIZE`](super::constants::MAX_CHUNK_SIZE) or the alignment
    /// is not a power of two; `OutOfMemory` if the first block cannot be obtained.
    pub fn new(parent: &'p dyn Allocator, config: PoolConfig) -> Result<Self, AllocError> {
        config.validate()?;
        let pool = Self {
            parent,
            state: RefCell::new(PoolState {
                blocks: Vec::new(),
                free_head: None,
            }),
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            layout: ChunkLayout::new(&config)?,
            policy: FailurePolicy::new(config.strategy),
            stats: StatsCell::new(config.track_stats),
        };
        pool.grow(&mut pool.state.borrow_mut())?;
        Ok(pool)
    }

    /// Shorthand for `new` with the three geometry parameters.
    ///
    /// # Errors
    /// See [`PoolAllocator::new`].
    pub fn with_chunks(
        parent: &'p dyn Allocator,
        chunk_size: usize,
        alignment: usize,
        chunks_per_block: usize,
    ) -> Result<Self, AllocError> {
        Self::new(parent, PoolConfig::new(chunk_size, alignment, chunks_per_block))
    }

    /// Replaces the failure policy.
    pub fn set_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    /// Usable bytes per chunk.
    pub fn chunk_size(&self) -> usize {
        self.layout.chunk_size
    }

    /// Alignment every chunk body satisfies.
    pub fn chunk_align(&self) -> usize {
        self.layout.align
    }

    /// Chunks carved out of each block.
    pub fn chunks_per_block(&self) -> usize {
        self.layout.per_block
    }

    /// Free chunks across all blocks.
    pub fn free_chunks(&self) -> usize {
        self.state.borrow().blocks.iter().map(|b| b.free_chunks).sum()
    }

    /// Chunks across all blocks, free or not.
    pub fn total_chunks(&self) -> usize {
        self.block_count() * self.layout.per_block
    }

    /// Number of blocks held.
    pub fn block_count(&self) -> usize {
        self.state.borrow().blocks.len()
    }

    /// Whether `ptr` points at a chunk body inside one of this pool's blocks.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let state = self.state.borrow();
        state
            .blocks
            .iter()
            .any(|block| self.chunk_offset(block, ptr).is_some())
    }

    /// Destroys the pool, returning every block to the parent.
    pub fn destroy(self) {}

    /// Returns a chunk, reporting pointers that belong to another allocator.
    ///
    /// # Errors
    /// `ForeignPointer` when the chunk tag names another pool or the pointer
    /// is not a chunk body of this pool. Nothing is modified in that case.
    ///
    /// # Safety
    /// `ptr` must point into a chunk handed out by some pool (this one or
    /// another), so its header can be read.
    pub unsafe fn try_free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let mut state = self.state.borrow_mut();
        let base = ptr.as_ptr().wrapping_sub(self.layout.header);
        // Foreign pointers may be less aligned than a tag.
        let (pool_id, block_idx) = unpack(base.cast::<u64>().read_unaligned());
        if pool_id != self.id {
            return Err(AllocError::ForeignPointer);
        }
        let block_idx = block_idx as usize;
        let in_block = state
            .blocks
            .get(block_idx)
            .is_some_and(|block| self.chunk_offset(block, ptr).is_some());
        if !in_block {
            return Err(AllocError::ForeignPointer);
        }

        ptr.as_ptr()
            .cast::<*mut u8>()
            .write(state.free_head.map_or(ptr::null_mut(), NonNull::as_ptr));
        state.free_head = Some(NonNull::new_unchecked(base));
        state.blocks[block_idx].free_chunks += 1;
        drop(state);

        self.stats.update(|s| s.record_free(self.layout.chunk_size));
        Ok(())
    }

    /// Offset of `ptr`'s chunk within `block`, if `ptr` is a chunk body there.
    fn chunk_offset(&self, block: &PoolBlock, ptr: NonNull<u8>) -> Option<usize> {
        let start = block.ptr.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        let offset = addr.checked_sub(start)?.checked_sub(self.layout.header)?;
        (offset < self.layout.block_bytes && offset % self.layout.stride == 0).then_some(offset)
    }

    /// Acquires a new block and merges its chunks into the free list.
    fn grow(&self, state: &mut PoolState) -> Result<(), AllocError> {
        let layout = &self.layout;
        let block_idx = u32::try_from(state.blocks.len())
            .map_err(|_| AllocError::OutOfMemory { size: layout.block_bytes, align: layout.block_align })?;
        let ptr = self
            .parent
            .alloc(layout.block_bytes, layout.block_align, AllocOptions::NONE)
            .map_err(|_| AllocError::OutOfMemory { size: layout.block_bytes, align: layout.block_align })?;

        let tag = pack(self.id, block_idx);
        let mut next = state.free_head.map_or(ptr::null_mut(), NonNull::as_ptr);
        // Link back to front so the list pops chunks in address order.
        for i in (0..layout.per_block).rev() {
            // SAFETY: chunk `i` lies inside the block just obtained.
            unsafe {
                let base = ptr.as_ptr().add(i * layout.stride);
                base.cast::<u64>().write(tag);
                base.add(layout.header).cast::<*mut u8>().write(next);
                next = base;
            }
        }
        state.free_head = NonNull::new(next);
        state.blocks.push(PoolBlock {
            ptr,
            free_chunks: layout.per_block,
        });

        self.stats.update(|s| s.record_reserve(layout.block_bytes));
        alloc_debug!(pool = self.id, blocks = state.blocks.len(), "pool acquired block");
        Ok(())
    }

    fn pop_chunk(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size > self.layout.chunk_size {
            return Err(AllocError::ExceedsChunkSize {
                requested: size,
                chunk_size: self.layout.chunk_size,
            });
        }
        let mut state = self.state.borrow_mut();
        if state.free_head.is_none() {
            self.grow(&mut state)?;
        }
        let base = state
            .free_head
            .ok_or(AllocError::OutOfMemory { size, align: self.layout.align })?;

        // SAFETY: `base` is a free chunk of this pool; header and body are in bounds.
        unsafe {
            let body = base.as_ptr().add(self.layout.header);
            state.free_head = NonNull::new(body.cast::<*mut u8>().read());

            let (_, block_idx) = unpack(base.as_ptr().cast::<u64>().read());
            let block_idx = block_idx as usize;
            state.blocks[block_idx].free_chunks -= 1;
            base.as_ptr().cast::<u64>().write(pack(self.id, block_idx as u32));

            Ok(NonNull::new_unchecked(body))
        }
    }
}

impl Allocator for PoolAllocator<'_> {
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let align = if align == 0 { self.layout.align } else { align };
        let align = check_request(size, align, options)?;
        if align > self.layout.align {
            return Err(AllocError::InvalidAlignment { align });
        }
        let ptr = self.policy.run(
            options,
            size,
            align,
            &|| self.stats.update(AllocStats::record_failure),
            || self.pop_chunk(size),
        )?;
        if options.zeroed() {
            // SAFETY: the chunk body holds `chunk_size` bytes.
            unsafe { ptr::write_bytes(ptr.as_ptr(), 0, self.layout.chunk_size) };
        }
        self.stats.update(|s| s.record_alloc(self.layout.chunk_size));
        Ok(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
        options: AllocOptions,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(ptr) = ptr else {
            return self.alloc(new_size, align, options).map(Some);
        };
        if new_size == 0 {
            self.free(ptr, old_size, align);
            return Ok(None);
        }
        if new_size <= self.layout.chunk_size {
            if options.zeroed() && new_size > old_size {
                ptr::write_bytes(ptr.as_ptr().add(old_size), 0, new_size - old_size);
            }
            return Ok(Some(ptr));
        }
        let err = AllocError::ExceedsChunkSize {
            requested: new_size,
            chunk_size: self.layout.chunk_size,
        };
        self.policy
            .run(
                options,
                new_size,
                self.layout.align,
                &|| self.stats.update(AllocStats::record_failure),
                || Err(err),
            )
            .map(Some)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _size: usize, _align: usize) {
        if let Err(_err) = self.try_free(ptr) {
            alloc_warn!(pool = self.id, ptr = ?ptr, error = %_err, "ignoring free of foreign pointer");
        }
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }

    fn strategy(&self) -> AllocStrategy {
        self.policy.strategy()
    }

    fn stats(&self) -> AllocStats {
        self.stats.snapshot()
    }

    fn tracks_stats(&self) -> bool {
        self.stats.enabled()
    }
}

impl Drop for PoolAllocator<'_> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.free_head = None;
        for block in state.blocks.drain(..) {
            // SAFETY: every block came from `parent` with this size and alignment.
            unsafe {
                self.parent
                    .free(block.ptr, self.layout.block_bytes, self.layout.block_align);
            }
            self.stats.update(|s| s.record_release(self.layout.block_bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;

    #[test]
    fn test_round_trip_restores_free_chunks() {
        let system = SystemAllocator::default();
        let pool = PoolAllocator::with_chunks(&system, 32, 8, 4).unwrap();
        let initial = pool.free_chunks();
        assert_eq!(initial, 4);

        let p = pool.alloc(32, 8, AllocOptions::NONE).unwrap();
        assert_eq!(pool.free_chunks(), 3);
        unsafe { pool.free(p, 32, 8) };
        let q = pool.alloc(32, 8, AllocOptions::NONE).unwrap();
        unsafe { pool.free(q, 32, 8) };

        assert_eq!(pool.free_chunks(), initial);
        assert!(pool.stats().is_consistent());
    }

    #[test]
    fn test_grows_new_block_when_exhausted() {
        let system = SystemAllocator::default();
        let pool = PoolAllocator::with_chunks(&system, 16, 8, 4).unwrap();

        let ptrs: Vec<_> = (0..6).map(|_| pool.alloc(16, 8, AllocOptions::NONE).unwrap()).collect();
        assert_eq!(pool.block_count(), 2);
        assert_eq!(pool.total_chunks(), 8);
        assert_eq!(pool.free_chunks(), 2);

        let mut addrs: Vec<usize> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 6);

        for p in ptrs {
            unsafe { pool.free(p, 16, 8) };
        }
        assert_eq!(pool.free_chunks(), 8);
    }

    #[test]
    fn test_rejects_oversized_request() {
        let system = SystemAllocator::default();
        let pool = PoolAllocator::with_chunks(&system, 32, 8, 4).unwrap();

        let res = pool.alloc(33, 8, AllocOptions::NONE);
        assert_eq!(
            res,
            Err(AllocError::ExceedsChunkSize {
                requested: 33,
                chunk_size: 32
            })
        );
        assert_eq!(pool.stats().failed_allocations, 1);
        assert_eq!(pool.free_chunks(), 4);
    }

    #[test]
    fn test_invalid_configs() {
        let system = SystemAllocator::default();
        assert!(PoolAllocator::with_chunks(&system, 0, 8, 4).is_err());
        assert!(PoolAllocator::with_chunks(&system, 32, 3, 4).is_err());
    }

    #[test]
    fn test_chunk_alignment() {
        let system = SystemAllocator::default();
        for align in [1usize, 8, 16, 64] {
            let pool = PoolAllocator::with_chunks(&system, 24, align, 8).unwrap();
            for _ in 0..8 {
                let p = pool.alloc(24, align, AllocOptions::NONE).unwrap();
                assert_eq!(p.as_ptr() as usize % align, 0);
            }
        }
    }

    #[test]
    fn test_cross_pool_free_is_rejected() {
        let system = SystemAllocator::default();
        let a = PoolAllocator::with_chunks(&system, 32, 8, 4).unwrap();
        let b = PoolAllocator::with_chunks(&system, 32, 8, 4).unwrap();

        let p = a.alloc(32, 8, AllocOptions::NONE).unwrap();
        assert!(a.owns(p));
        assert!(!b.owns(p));

        unsafe {
            assert_eq!(b.try_free(p), Err(AllocError::ForeignPointer));
            b.free(p, 32, 8);
        }
        assert_eq!(b.free_chunks(), 4);
        assert_eq!(b.stats().total_frees, 0);

        unsafe { a.try_free(p).unwrap() };
        assert_eq!(a.free_chunks(), 4);
    }

    #[test]
    fn test_misaligned_foreign_pointer_is_rejected() {
        let system = SystemAllocator::default();
        let pool = PoolAllocator::with_chunks(&system, 32, 8, 4).unwrap();
        let mut buf = [0u64; 8];
        let odd = NonNull::new(buf.as_mut_ptr().cast::<u8>().wrapping_add(33)).unwrap();

        unsafe {
            assert_eq!(pool.try_free(odd), Err(AllocError::ForeignPointer));
            pool.free(odd, 32, 8);
        }
        assert_eq!(pool.free_chunks(), 4);
        assert_eq!(pool.stats().total_frees, 0);
    }

    #[test]
    fn test_realloc_within_chunk_keeps_pointer() {
        let system = SystemAllocator::default();
        let pool = PoolAllocator::with_chunks(&system, 64, 8, 2).unwrap();
        unsafe {
            let p = pool.alloc(8, 8, AllocOptions::NONE).unwrap();
            ptr::write_bytes(p.as_ptr(), 0xFF, 64);

            let q = pool.realloc(Some(p), 8, 40, 8, AllocOptions::ZERO).unwrap().unwrap();
            assert_eq!(p, q);
            assert_eq!(*q.as_ptr().add(7), 0xFF);
            assert!(core::slice::from_raw_parts(q.as_ptr().add(8), 32).iter().all(|&b| b == 0));

            assert!(pool.realloc(Some(q), 40, 65, 8, AllocOptions::NONE).is_err());
            assert_eq!(pool.stats().failed_allocations, 1);
        }
    }

    #[test]
    fn test_zeroed_chunk() {
        let system = SystemAllocator::default();
        let pool = PoolAllocator::with_chunks(&system, 48, 16, 2).unwrap();
        let p = pool.alloc(48, 16, AllocOptions::NONE).unwrap();
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0x5A, 48);
            pool.free(p, 48, 16);
        }
        let q = pool.alloc(48, 16, AllocOptions::ZERO).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(q.as_ptr(), 48) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_drop_returns_blocks_to_parent() {
        let system = SystemAllocator::default();
        {
            let pool = PoolAllocator::with_chunks(&system, 32, 8, 2).unwrap();
            for _ in 0..5 {
                pool.alloc(32, 8, AllocOptions::NONE).unwrap();
            }
            assert_eq!(system.stats().allocation_count, 3);
        }
        assert_eq!(system.stats().allocation_count, 0);
    }
}
