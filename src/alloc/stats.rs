//! Allocation statistics.
//!
//! [`AllocStats`] is the fixed-layout snapshot every allocator reports.
//! Single-threaded strategies keep one in a `Cell`; the shared system
//! allocator keeps [`AtomicStats`] instead.

use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

/// Counters describing an allocator's live and lifetime usage.
///
/// Decrements saturate at zero so a double free corrupts nothing but the
/// numbers themselves.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocStats {
    /// Bytes currently handed out.
    pub bytes_allocated: usize,
    /// Backing memory currently held, including unused block tails.
    pub bytes_reserved: usize,
    /// High-water mark of `bytes_allocated`.
    pub max_bytes_allocated: usize,
    /// Allocations currently live.
    pub allocation_count: usize,
    /// Successful allocations over the allocator's lifetime.
    pub total_allocations: usize,
    /// Frees over the allocator's lifetime.
    pub total_frees: usize,
    /// Allocation requests that failed.
    pub failed_allocations: usize,
}

impl AllocStats {
    /// Creates zeroed statistics.
    pub const fn new() -> Self {
        Self {
            bytes_allocated: 0,
            bytes_reserved: 0,
            max_bytes_allocated: 0,
            allocation_count: 0,
            total_allocations: 0,
            total_frees: 0,
            failed_allocations: 0,
        }
    }

    /// Records a successful allocation of `size` bytes.
    #[inline]
    pub fn record_alloc(&mut self, size: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_add(size);
        self.allocation_count += 1;
        self.total_allocations += 1;
        self.max_bytes_allocated = self.max_bytes_allocated.max(self.bytes_allocated);
    }

    /// Records a free of `size` bytes.
    #[inline]
    pub fn record_free(&mut self, size: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        self.allocation_count = self.allocation_count.saturating_sub(1);
        self.total_frees += 1;
    }

    /// Records a resize of a live allocation.
    #[inline]
    pub fn record_resize(&mut self, old_size: usize, new_size: usize) {
        self.bytes_allocated = self
            .bytes_allocated
            .saturating_sub(old_size)
            .saturating_add(new_size);
        self.max_bytes_allocated = self.max_bytes_allocated.max(self.bytes_allocated);
    }

    /// Records a failed allocation.
    #[inline]
    pub fn record_failure(&mut self) {
        self.failed_allocations += 1;
    }

    /// Records backing memory acquired from a parent or the platform.
    #[inline]
    pub fn record_reserve(&mut self, bytes: usize) {
        self.bytes_reserved = self.bytes_reserved.saturating_add(bytes);
    }

    /// Records backing memory given back.
    #[inline]
    pub fn record_release(&mut self, bytes: usize) {
        self.bytes_reserved = self.bytes_reserved.saturating_sub(bytes);
    }

    /// Records `count` allocations totalling `bytes` released together.
    #[inline]
    pub fn record_bulk_free(&mut self, bytes: usize, count: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_sub(bytes);
        self.allocation_count = self.allocation_count.saturating_sub(count);
        self.total_frees += count;
    }

    /// Forgets every live allocation at once (arena reset).
    #[inline]
    pub fn reset_live(&mut self) {
        self.bytes_allocated = 0;
        self.allocation_count = 0;
    }

    /// Checks the conservation laws that hold after failure-free runs.
    pub fn is_consistent(&self) -> bool {
        self.allocation_count == self.total_allocations.saturating_sub(self.total_frees)
            && self.bytes_allocated <= self.max_bytes_allocated
    }

    /// Serializes the snapshot as JSON.
    ///
    /// # Errors
    /// Propagates the serializer error, which cannot occur for plain counters
    /// but is kept in the signature rather than unwrapped.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-instance statistics for single-threaded allocators.
///
/// Gated by the `track_stats` flag chosen at construction.
#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    enabled: bool,
    inner: Cell<AllocStats>,
}

impl StatsCell {
    pub(crate) const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: Cell::new(AllocStats::new()),
        }
    }

    #[inline]
    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub(crate) fn snapshot(&self) -> AllocStats {
        self.inner.get()
    }

    /// Applies `f` to the counters when tracking is enabled.
    #[inline]
    pub(crate) fn update(&self, f: impl FnOnce(&mut AllocStats)) {
        if self.enabled {
            let mut stats = self.inner.get();
            f(&mut stats);
            self.inner.set(stats);
        }
    }
}

/// Lock-free counters for allocators shared between threads.
///
/// Each counter sits on its own cache line; readers get a best-effort
/// snapshot, not an atomic one.
#[derive(Debug, Default)]
pub struct AtomicStats {
    bytes_allocated: CachePadded<AtomicUsize>,
    bytes_reserved: CachePadded<AtomicUsize>,
    max_bytes_allocated: CachePadded<AtomicUsize>,
    allocation_count: CachePadded<AtomicUsize>,
    total_allocations: CachePadded<AtomicUsize>,
    total_frees: CachePadded<AtomicUsize>,
    failed_allocations: CachePadded<AtomicUsize>,
}

fn saturating_sub(counter: &AtomicUsize, value: usize) -> usize {
    let prev = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(value)))
        .unwrap_or_else(|c| c);
    prev.saturating_sub(value)
}

impl AtomicStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful allocation that also acquired `size` bytes of backing memory.
    #[inline]
    pub fn on_alloc(&self, size: usize) {
        let live = self.bytes_allocated.fetch_add(size, Ordering::Relaxed) + size;
        self.bytes_reserved.fetch_add(size, Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.max_bytes_allocated.fetch_max(live, Ordering::Relaxed);
    }

    /// Records a free that released `size` bytes of backing memory.
    #[inline]
    pub fn on_dealloc(&self, size: usize) {
        saturating_sub(&self.bytes_allocated, size);
        saturating_sub(&self.bytes_reserved, size);
        saturating_sub(&self.allocation_count, 1);
        self.total_frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a resize of a live allocation.
    #[inline]
    pub fn on_resize(&self, old_size: usize, new_size: usize) {
        if new_size >= old_size {
            let grow = new_size - old_size;
            let live = self.bytes_allocated.fetch_add(grow, Ordering::Relaxed) + grow;
            self.bytes_reserved.fetch_add(grow, Ordering::Relaxed);
            self.max_bytes_allocated.fetch_max(live, Ordering::Relaxed);
        } else {
            saturating_sub(&self.bytes_allocated, old_size - new_size);
            saturating_sub(&self.bytes_reserved, old_size - new_size);
        }
    }

    /// Records a failed allocation.
    #[inline]
    pub fn on_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a best-effort snapshot.
    pub fn snapshot(&self) -> AllocStats {
        AllocStats {
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            bytes_reserved: self.bytes_reserved.load(Ordering::Relaxed),
            max_bytes_allocated: self.max_bytes_allocated.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_frees: self.total_frees.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
        }
    }
}
