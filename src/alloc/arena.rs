//! `ArenaAllocator` - bump allocation from growable blocks.
//!
//! Objects are never reclaimed individually. `reset` rewinds every block so
//! the memory is reused without asking the parent for more, and dropping the
//! arena hands all blocks back to the parent.

use core::cell::RefCell;
use core::ptr::{self, NonNull};

use super::allocator::{check_request, AllocError, Allocator, AllocatorKind};
use super::block::Block;
use super::config::ArenaConfig;
use super::constants::BLOCK_ALIGN;
use super::options::{AllocOptions, AllocStrategy};
use super::policy::FailurePolicy;
use super::stats::{AllocStats, StatsCell};
use super::trace::alloc_debug;

struct ArenaState {
    blocks: Vec<Block>,
    current: usize,
}

/// A bump allocator drawing its blocks from a parent allocator.
pub struct ArenaAllocator<'p> {
    parent: &'p dyn Allocator,
    state: RefCell<ArenaState>,
    min_block_size: usize,
    policy: FailurePolicy,
    stats: StatsCell,
}

impl<'p> ArenaAllocator<'p> {
    /// Creates an arena, eagerly acquiring the first block if `initial_size` is non-zero.
    ///
    /// # Errors
    /// `InvalidConfig` for a bad config, `OutOfMemory` if the first block
    /// cannot be obtained.
    pub fn new(parent: &'p dyn Allocator, config: ArenaConfig) -> Result<Self, AllocError> {
        config.validate()?;
        let arena = Self {
            parent,
            state: RefCell::new(ArenaState {
                blocks: Vec::new(),
                current: 0,
            }),
            min_block_size: config.min_block_size,
            policy: FailurePolicy::new(config.strategy),
            stats: StatsCell::new(config.track_stats),
        };
        if config.initial_size > 0 {
            arena.push_block(&mut arena.state.borrow_mut(), config.initial_size, BLOCK_ALIGN)?;
        }
        Ok(arena)
    }

    /// Creates an arena whose blocks are at least `initial_size` bytes.
    ///
    /// # Errors
    /// See [`ArenaAllocator::new`].
    pub fn with_initial_size(parent: &'p dyn Allocator, initial_size: usize) -> Result<Self, AllocError> {
        Self::new(parent, ArenaConfig::with_initial_size(initial_size))
    }

    /// Replaces the failure policy.
    pub fn set_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    /// Rewinds every block without touching its contents.
    ///
    /// All previous allocations become invalid. Later allocations reuse the
    /// existing blocks before any new memory is requested.
    pub fn reset(&mut self) {
        let state = self.state.get_mut();
        for block in &mut state.blocks {
            block.used = 0;
        }
        state.current = 0;
        self.stats.update(AllocStats::reset_live);
        alloc_debug!(blocks = state.blocks.len(), "arena reset");
    }

    /// Number of blocks held.
    pub fn block_count(&self) -> usize {
        self.state.borrow().blocks.len()
    }

    /// Bytes consumed across all blocks, padding included.
    pub fn used(&self) -> usize {
        self.state.borrow().blocks.iter().map(|b| b.used).sum()
    }

    /// Total capacity across all blocks.
    pub fn capacity(&self) -> usize {
        self.state.borrow().blocks.iter().map(|b| b.capacity).sum()
    }

    /// Bytes left in the current block before the arena must grow or move on.
    pub fn remaining(&self) -> usize {
        let state = self.state.borrow();
        state.blocks.get(state.current).map_or(0, Block::remaining)
    }

    /// The minimum size of blocks requested from the parent.
    pub fn min_block_size(&self) -> usize {
        self.min_block_size
    }

    /// Destroys the arena, returning every block to the parent.
    pub fn destroy(self) {}

    fn push_block(&self, state: &mut ArenaState, size: usize, align: usize) -> Result<(), AllocError> {
        let capacity = size.max(self.min_block_size);
        let align = align.max(BLOCK_ALIGN);
        let ptr = self
            .parent
            .alloc(capacity, align, AllocOptions::NONE)
            .map_err(|_| AllocError::OutOfMemory { size: capacity, align })?;

        state.blocks.push(Block::new(ptr, capacity, align));
        state.current = state.blocks.len() - 1;
        self.stats.update(|s| s.record_reserve(capacity));
        alloc_debug!(capacity, blocks = state.blocks.len(), "arena acquired block");
        Ok(())
    }

    fn bump(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let mut state = self.state.borrow_mut();

        // Blocks past `current` only have room again after a reset.
        let start = state.current;
        for idx in start..state.blocks.len() {
            if let Some(ptr) = state.blocks[idx].try_alloc(size, align) {
                state.current = idx;
                return Ok(ptr);
            }
        }

        self.push_block(&mut state, size, align)?;
        let current = state.current;
        state.blocks[current]
            .try_alloc(size, align)
            .ok_or(AllocError::OutOfMemory { size, align })
    }
}

impl Allocator for ArenaAllocator<'_> {
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let align = check_request(size, align, options)?;
        let ptr = self.policy.run(
            options,
            size,
            align,
            &|| self.stats.update(AllocStats::record_failure),
            || self.bump(size, align),
        )?;
        if options.zeroed() {
            // Blocks are recycled by `reset`, so fresh space may hold old bytes.
            // SAFETY: `ptr` is valid for `size` bytes.
            unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        }
        self.stats.update(|s| s.record_alloc(size));
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
        // Later allocations may already sit right after `ptr`, so always move.
        let new_ptr = self.alloc(new_size, align, options)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        self.free(ptr, old_size, align);
        Ok(Some(new_ptr))
    }

    unsafe fn free(&self, _ptr: NonNull<u8>, size: usize, _align: usize) {
        self.stats.update(|s| s.record_free(size));
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Arena
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

impl Drop for ArenaAllocator<'_> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for block in state.blocks.drain(..) {
            // SAFETY: every block came from `parent` with exactly this size and alignment.
            unsafe { self.parent.free(block.ptr, block.capacity, block.align) };
            self.stats.update(|s| s.record_release(block.capacity));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;

    fn ranges_disjoint(a: (usize, usize), b: (usize, usize)) -> bool {
        a.0 + a.1 <= b.0 || b.0 + b.1 <= a.0
    }

    #[test]
    fn test_oversized_request_gets_new_block() {
        let system = SystemAllocator::default();
        let arena = ArenaAllocator::with_initial_size(&system, 1024).unwrap();
        assert_eq!(arena.block_count(), 1);

        let p1 = arena.alloc(100, 8, AllocOptions::NONE).unwrap();
        let p2 = arena.alloc(2000, 8, AllocOptions::NONE).unwrap();

        assert_eq!(arena.block_count(), 2);
        assert!(arena.capacity() >= 1024 + 2000);
        assert_eq!(p2.as_ptr() as usize % 8, 0);
        assert!(ranges_disjoint(
            (p1.as_ptr() as usize, 100),
            (p2.as_ptr() as usize, 2000)
        ));
    }

    #[test]
    fn test_bump_is_monotonic_within_block() {
        let system = SystemAllocator::default();
        let arena = ArenaAllocator::with_initial_size(&system, 4096).unwrap();

        let mut last_used = arena.used();
        let mut prev_end = 0usize;
        for i in 1..50 {
            let ptr = arena.alloc(i, 8, AllocOptions::NONE).unwrap();
            let addr = ptr.as_ptr() as usize;
            assert!(addr >= prev_end);
            prev_end = addr + i;
            assert!(arena.used() >= last_used);
            last_used = arena.used();
        }
    }

    #[test]
    fn test_reset_reuses_blocks() {
        let system = SystemAllocator::default();
        let mut arena = ArenaAllocator::with_initial_size(&system, 256).unwrap();

        for _ in 0..10 {
            arena.alloc(200, 8, AllocOptions::NONE).unwrap();
        }
        let blocks = arena.block_count();
        let reserved = arena.stats().bytes_reserved;
        let parent_allocs = system.stats().total_allocations;

        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.stats().bytes_allocated, 0);
        assert_eq!(arena.stats().allocation_count, 0);
        assert_eq!(arena.stats().bytes_reserved, reserved);

        for _ in 0..10 {
            arena.alloc(200, 8, AllocOptions::NONE).unwrap();
        }
        assert_eq!(arena.block_count(), blocks);
        assert_eq!(system.stats().total_allocations, parent_allocs);
    }

    #[test]
    fn test_zeroed_after_reset() {
        let system = SystemAllocator::default();
        let mut arena = ArenaAllocator::with_initial_size(&system, 128).unwrap();
        let ptr = arena.alloc(64, 8, AllocOptions::NONE).unwrap();
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0xAB, 64) };

        arena.reset();
        let ptr = arena.alloc(64, 8, AllocOptions::ZERO).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_realloc_moves_and_copies() {
        let system = SystemAllocator::default();
        let arena = ArenaAllocator::with_initial_size(&system, 1024).unwrap();
        unsafe {
            let ptr = arena.alloc(4, 4, AllocOptions::NONE).unwrap();
            ptr.as_ptr().cast::<u32>().write(0x0102_0304);
            let moved = arena.realloc(Some(ptr), 4, 64, 4, AllocOptions::NONE).unwrap().unwrap();
            assert_ne!(moved, ptr);
            assert_eq!(moved.as_ptr().cast::<u32>().read(), 0x0102_0304);
        }
        let stats = arena.stats();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.bytes_allocated, 64);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_large_alignment_fits_fresh_block() {
        let system = SystemAllocator::default();
        let arena = ArenaAllocator::with_initial_size(&system, 64).unwrap();
        arena.alloc(3, 1, AllocOptions::NONE).unwrap();
        let ptr = arena.alloc(64, 256, AllocOptions::NONE).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 256, 0);
    }

    #[test]
    fn test_drop_returns_blocks_to_parent() {
        let system = SystemAllocator::default();
        {
            let arena = ArenaAllocator::with_initial_size(&system, 512).unwrap();
            arena.alloc(10, 8, AllocOptions::NONE).unwrap();
            arena.alloc(1000, 8, AllocOptions::NONE).unwrap();
            assert_eq!(system.stats().allocation_count, 2);
        }
        let stats = system.stats();
        assert_eq!(stats.allocation_count, 0);
        assert_eq!(stats.bytes_allocated, 0);
    }

    #[test]
    fn test_deferred_first_block() {
        let system = SystemAllocator::default();
        let arena = ArenaAllocator::new(
            &system,
            ArenaConfig {
                initial_size: 0,
                min_block_size: 256,
                ..ArenaConfig::default()
            },
        )
        .unwrap();
        assert_eq!(arena.block_count(), 0);
        arena.alloc(8, 8, AllocOptions::NONE).unwrap();
        assert_eq!(arena.block_count(), 1);
        assert_eq!(arena.capacity(), 256);
    }
}
