//! `RegionAllocator` - nested regions released as a unit.
//!
//! `begin` opens a region on a stack; every allocation made while it is the
//! innermost region is bump-allocated from blocks owned by it, and `end`
//! hands all of those blocks back to the parent at once. Regions nest in
//! strict LIFO order. With no region open, requests go straight to the parent.

use core::cell::RefCell;
use core::ops::Deref;
use core::ptr::{self, NonNull};

use super::allocator::{check_request, AllocError, Allocator, AllocatorKind};
use super::block::Block;
use super::config::RegionConfig;
use super::constants::{normalize_align, BLOCK_ALIGN, DEFAULT_ALIGNMENT};
use super::options::{AllocOptions, AllocStrategy};
use super::policy::FailurePolicy;
use super::stats::{AllocStats, StatsCell};
use super::trace::{alloc_debug, alloc_warn};

/// One open region: its blocks, newest last, and what is live in them.
struct Region {
    blocks: Vec<Block>,
    bytes_allocated: usize,
    allocation_count: usize,
}

impl Region {
    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.blocks.iter().any(|block| block.contains(ptr))
    }
}

/// Stack-structured region allocator on top of a parent.
pub struct RegionAllocator<'p> {
    parent: &'p dyn Allocator,
    regions: RefCell<Vec<Region>>,
    region_size: usize,
    allow_large_allocations: bool,
    policy: FailurePolicy,
    stats: StatsCell,
}

impl<'p> RegionAllocator<'p> {
    /// Creates a region allocator. No region is open yet.
    ///
    /// # Errors
    /// `InvalidConfig` if the region size is zero.
    pub fn new(parent: &'p dyn Allocator, config: RegionConfig) -> Result<Self, AllocError> {
        config.validate()?;
        Ok(Self {
            parent,
            regions: RefCell::new(Vec::new()),
            region_size: config.region_size,
            allow_large_allocations: config.allow_large_allocations,
            policy: FailurePolicy::new(config.strategy),
            stats: StatsCell::new(config.track_stats),
        })
    }

    /// Creates a region allocator with the given block size.
    ///
    /// # Errors
    /// See [`RegionAllocator::new`].
    pub fn with_region_size(
        parent: &'p dyn Allocator,
        region_size: usize,
        allow_large_allocations: bool,
    ) -> Result<Self, AllocError> {
        Self::new(parent, RegionConfig::new(region_size, allow_large_allocations))
    }

    /// Replaces the failure policy.
    pub fn set_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    /// Opens a nested region and returns the new depth.
    pub fn begin(&self) -> usize {
        let mut regions = self.regions.borrow_mut();
        regions.push(Region {
            blocks: Vec::new(),
            bytes_allocated: 0,
            allocation_count: 0,
        });
        alloc_debug!(depth = regions.len(), "region begin");
        regions.len()
    }

    /// Closes the innermost region, returning its blocks to the parent.
    ///
    /// Every pointer handed out while it was innermost becomes invalid.
    ///
    /// # Errors
    /// `RegionStackEmpty` if no region is open; nothing changes then.
    pub fn end(&self) -> Result<(), AllocError> {
        let region = self
            .regions
            .borrow_mut()
            .pop()
            .ok_or(AllocError::RegionStackEmpty)?;
        self.release(region);
        Ok(())
    }

    /// Number of open regions.
    pub fn depth(&self) -> usize {
        self.regions.borrow().len()
    }

    /// Whether at least one region is open.
    pub fn in_region(&self) -> bool {
        self.depth() > 0
    }

    /// Blocks owned by the innermost region.
    pub fn current_block_count(&self) -> usize {
        self.regions.borrow().last().map_or(0, |r| r.blocks.len())
    }

    /// The size of blocks requested from the parent.
    pub fn region_size(&self) -> usize {
        self.region_size
    }

    /// Opens a region that ends when the returned guard drops.
    pub fn scope(&self) -> RegionGuard<'_, 'p> {
        let depth = self.begin();
        RegionGuard { allocator: self, depth }
    }

    /// Runs `f` inside a fresh region.
    ///
    /// The region ends even if `f` unwinds.
    pub fn with_region<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.scope();
        f(self)
    }

    /// Destroys the allocator, closing every open region.
    pub fn destroy(self) {}

    fn release(&self, region: Region) {
        let reserved: usize = region.blocks.iter().map(|b| b.capacity).sum();
        for block in &region.blocks {
            // SAFETY: each block came from `parent` with this size and alignment.
            unsafe { self.parent.free(block.ptr, block.capacity, block.align) };
        }
        self.stats.update(|s| {
            s.record_release(reserved);
            s.record_bulk_free(region.bytes_allocated, region.allocation_count);
        });
        alloc_debug!(blocks = region.blocks.len(), reserved, "region end");
    }

    fn bump(&self, region: &mut Region, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if let Some(ptr) = region.blocks.last_mut().and_then(|b| b.try_alloc(size, align)) {
            return Ok(ptr);
        }
        if size > self.region_size && !self.allow_large_allocations {
            return Err(AllocError::LargeAllocationDenied {
                size,
                region_size: self.region_size,
            });
        }

        let capacity = size.max(self.region_size);
        let block_align = align.max(BLOCK_ALIGN);
        let base = self
            .parent
            .alloc(capacity, block_align, AllocOptions::NONE)
            .map_err(|_| AllocError::OutOfMemory {
                size: capacity,
                align: block_align,
            })?;
        self.stats.update(|s| s.record_reserve(capacity));

        let mut block = Block::new(base, capacity, block_align);
        let ptr = block
            .try_alloc(size, align)
            .ok_or(AllocError::OutOfMemory { size, align })?;
        region.blocks.push(block);
        Ok(ptr)
    }

    fn alloc_in_region(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let mut regions = self.regions.borrow_mut();
        let region = regions.last_mut().ok_or(AllocError::RegionStackEmpty)?;
        let ptr = self.bump(region, size, align)?;
        region.bytes_allocated += size;
        region.allocation_count += 1;
        Ok(ptr)
    }

    fn alloc_direct(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.parent.alloc(size, align, options)?;
        self.stats.update(|s| s.record_reserve(size));
        Ok(ptr)
    }

    /// Index of the open region whose blocks contain `ptr`.
    fn owner(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.regions.borrow().iter().rposition(|r| r.owns(ptr))
    }

    /// Grows or shrinks the innermost region's newest allocation in place.
    fn resize_in_place(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> bool {
        let mut regions = self.regions.borrow_mut();
        let Some(region) = regions.last_mut() else {
            return false;
        };
        let Some(block) = region.blocks.last_mut() else {
            return false;
        };
        if !block.resize_last(ptr, old_size, new_size) {
            return false;
        }
        region.bytes_allocated = region.bytes_allocated.saturating_sub(old_size) + new_size;
        true
    }
}

impl Allocator for RegionAllocator<'_> {
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let align = check_request(size, align, options)?;
        let in_region = self.in_region();
        let ptr = self.policy.run(
            options,
            size,
            align,
            &|| self.stats.update(AllocStats::record_failure),
            || {
                if in_region {
                    self.alloc_in_region(size, align)
                } else {
                    self.alloc_direct(size, align, options)
                }
            },
        )?;
        if in_region && options.zeroed() {
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
        let checked_align = check_request(new_size, align, options)?;

        if self.resize_in_place(ptr, old_size, new_size) {
            if options.zeroed() && new_size > old_size {
                ptr::write_bytes(ptr.as_ptr().add(old_size), 0, new_size - old_size);
            }
            self.stats.update(|s| s.record_resize(old_size, new_size));
            return Ok(Some(ptr));
        }

        if !self.in_region() {
            let new_ptr = self
                .parent
                .realloc(Some(ptr), old_size, new_size, checked_align, options)?
                .ok_or(AllocError::OutOfMemory {
                    size: new_size,
                    align: checked_align,
                })?;
            self.stats.update(|s| {
                s.record_resize(old_size, new_size);
                s.record_release(old_size);
                s.record_reserve(new_size);
            });
            return Ok(Some(new_ptr));
        }

        let new_ptr = self.alloc(new_size, align, options)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        self.free(ptr, old_size, align);
        Ok(Some(new_ptr))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Some(idx) = self.owner(ptr) {
            // Region memory is reclaimed by `end`; only the counters move.
            let mut regions = self.regions.borrow_mut();
            let region = &mut regions[idx];
            region.bytes_allocated = region.bytes_allocated.saturating_sub(size);
            region.allocation_count = region.allocation_count.saturating_sub(1);
            self.stats.update(|s| s.record_free(size));
            return;
        }
        let align = normalize_align(align).unwrap_or(DEFAULT_ALIGNMENT);
        self.parent.free(ptr, size, align);
        self.stats.update(|s| {
            s.record_free(size);
            s.record_release(size);
        });
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Region
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

impl Drop for RegionAllocator<'_> {
    fn drop(&mut self) {
        let regions = core::mem::take(self.regions.get_mut());
        if !regions.is_empty() {
            alloc_warn!(depth = regions.len(), "region allocator dropped with open regions");
        }
        for region in regions.into_iter().rev() {
            self.release(region);
        }
    }
}

/// Ends the region it opened when dropped.
///
/// Dereferences to the allocator so allocations can go through the guard.
pub struct RegionGuard<'a, 'p> {
    allocator: &'a RegionAllocator<'p>,
    depth: usize,
}

impl RegionGuard<'_, '_> {
    /// Depth of the region this guard owns.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<'p> Deref for RegionGuard<'_, 'p> {
    type Target = RegionAllocator<'p>;

    fn deref(&self) -> &Self::Target {
        self.allocator
    }
}

impl Drop for RegionGuard<'_, '_> {
    fn drop(&mut self) {
        // Inner regions left open by hand are closed along with this one.
        while self.allocator.depth() >= self.depth {
            if self.allocator.end().is_err() {
                break;
            }
        }
    }
}
