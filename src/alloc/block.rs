//! Bump-pointer block shared by the arena and region allocators.

use core::ptr::NonNull;

use super::constants::checked_align_up;

/// A contiguous block obtained from a parent allocator.
///
/// `used` only grows between rewinds, so live allocations in a block never
/// overlap.
pub(crate) struct Block {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) capacity: usize,
    pub(crate) align: usize,
    pub(crate) used: usize,
}

impl Block {
    pub(crate) fn new(ptr: NonNull<u8>, capacity: usize, align: usize) -> Self {
        Self {
            ptr,
            capacity,
            align,
            used: 0,
        }
    }

    #[inline]
    fn start(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Bumps `used` past an aligned `size` byte allocation if it fits.
    pub(crate) fn try_alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let start = self.start();
        let current = start + self.used;

        let aligned = checked_align_up(current, align)?;
        let end = aligned.checked_add(size)?;

        if end <= start + self.capacity {
            self.used = end - start;
            // SAFETY: `aligned - start` is within the block.
            unsafe { Some(NonNull::new_unchecked(self.ptr.as_ptr().add(aligned - start))) }
        } else {
            None
        }
    }

    /// Whether `ptr` lies inside the used part of the block.
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        addr >= self.start() && addr < self.start() + self.used
    }

    /// Resizes the most recent allocation in place.
    ///
    /// Succeeds only if `ptr..ptr + old_size` ends exactly at `used` and
    /// `new_size` bytes still fit.
    pub(crate) fn resize_last(&mut self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> bool {
        let start = self.start();
        let addr = ptr.as_ptr() as usize;
        if addr < start || addr + old_size != start + self.used {
            return false;
        }
        let offset = addr - start;
        match offset.checked_add(new_size) {
            Some(end) if end <= self.capacity => {
                self.used = end;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.capacity - self.used
    }
}
