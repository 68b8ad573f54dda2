//! `SystemAllocator` - a thin wrapper over the platform allocator.
//!
//! Serves as the process default and as the parent every other strategy
//! requests its blocks from. Unlike the other strategies it is `Sync`: its
//! statistics are atomic and the backend is the thread-safe platform heap.

use core::ptr::{self, NonNull};
use std::sync::OnceLock;

use super::allocator::{check_request, AllocError, Allocator, AllocatorKind};
use super::config::SystemConfig;
use super::constants::{normalize_align, DEFAULT_ALIGNMENT};
use super::options::{AllocOptions, AllocStrategy};
use super::policy::FailurePolicy;
use super::stats::{AllocStats, AtomicStats};

#[cfg(unix)]
mod backend {
    use core::ptr;

    /// Alignment `malloc` guarantees on every supported unix target.
    const MALLOC_ALIGN: usize = 2 * core::mem::size_of::<usize>();

    pub(super) unsafe fn alloc(size: usize, align: usize, zero: bool) -> *mut u8 {
        if align <= MALLOC_ALIGN {
            if zero {
                libc::calloc(1, size).cast()
            } else {
                libc::malloc(size).cast()
            }
        } else {
            let mut out: *mut libc::c_void = ptr::null_mut();
            let align = align.max(core::mem::size_of::<usize>());
            if libc::posix_memalign(&mut out, align, size) != 0 {
                return ptr::null_mut();
            }
            if zero {
                ptr::write_bytes(out.cast::<u8>(), 0, size);
            }
            out.cast()
        }
    }

    pub(super) unsafe fn realloc(ptr: *mut u8, old_size: usize, new_size: usize, align: usize) -> *mut u8 {
        if align <= MALLOC_ALIGN {
            return libc::realloc(ptr.cast(), new_size).cast();
        }
        // `realloc` may drop the alignment, so over-aligned blocks move by hand.
        let new_ptr = alloc(new_size, align, false);
        if !new_ptr.is_null() {
            ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
            libc::free(ptr.cast());
        }
        new_ptr
    }

    pub(super) unsafe fn free(ptr: *mut u8, _size: usize, _align: usize) {
        // `posix_memalign` memory goes back through `free` as well.
        libc::free(ptr.cast());
    }
}

#[cfg(not(unix))]
mod backend {
    use core::alloc::Layout;
    use std::alloc::{alloc, alloc_zeroed, dealloc, realloc as std_realloc};

    pub(super) unsafe fn alloc(size: usize, align: usize, zero: bool) -> *mut u8 {
        match Layout::from_size_align(size, align) {
            Ok(layout) if zero => alloc_zeroed(layout),
            Ok(layout) => alloc(layout),
            Err(_) => core::ptr::null_mut(),
        }
    }

    pub(super) unsafe fn realloc(ptr: *mut u8, old_size: usize, new_size: usize, align: usize) -> *mut u8 {
        match Layout::from_size_align(old_size, align) {
            Ok(layout) => std_realloc(ptr, layout, new_size),
            Err(_) => core::ptr::null_mut(),
        }
    }

    pub(super) unsafe fn free(ptr: *mut u8, size: usize, align: usize) {
        dealloc(ptr, Layout::from_size_align_unchecked(size, align));
    }
}

/// The platform allocator behind the common interface.
#[derive(Debug)]
pub struct SystemAllocator {
    policy: FailurePolicy,
    track_stats: bool,
    stats: AtomicStats,
}

impl SystemAllocator {
    /// Creates a system allocator from a config.
    pub fn new(config: SystemConfig) -> Self {
        Self::with_policy(FailurePolicy::new(config.strategy), config.track_stats)
    }

    /// Creates a system allocator with an explicit failure policy.
    pub fn with_policy(policy: FailurePolicy, track_stats: bool) -> Self {
        Self {
            policy,
            track_stats,
            stats: AtomicStats::new(),
        }
    }

    /// The lazily initialized process-wide instance.
    ///
    /// Concurrent first use initializes it exactly once.
    pub fn global() -> &'static SystemAllocator {
        static GLOBAL: OnceLock<SystemAllocator> = OnceLock::new();
        GLOBAL.get_or_init(SystemAllocator::default)
    }

    /// The failure policy.
    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Destroys the allocator. Outstanding allocations stay valid platform memory.
    pub fn destroy(self) {}

    fn record_failure(&self) {
        if self.track_stats {
            self.stats.on_failure();
        }
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new(SystemConfig::default())
    }
}

impl Allocator for SystemAllocator {
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let align = check_request(size, align, options)?;
        let ptr = self.policy.run(options, size, align, &|| self.record_failure(), || {
            // SAFETY: size is non-zero and align a power of two.
            let raw = unsafe { backend::alloc(size, align, options.zeroed()) };
            NonNull::new(raw).ok_or(AllocError::OutOfMemory { size, align })
        })?;
        if self.track_stats {
            self.stats.on_alloc(size);
        }
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
        let align = check_request(new_size, align, options)?;
        let new_ptr = self.policy.run(options, new_size, align, &|| self.record_failure(), || {
            let raw = backend::realloc(ptr.as_ptr(), old_size, new_size, align);
            NonNull::new(raw).ok_or(AllocError::OutOfMemory { size: new_size, align })
        })?;
        if options.zeroed() && new_size > old_size {
            ptr::write_bytes(new_ptr.as_ptr().add(old_size), 0, new_size - old_size);
        }
        if self.track_stats {
            self.stats.on_resize(old_size, new_size);
        }
        Ok(Some(new_ptr))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let align = normalize_align(align).unwrap_or(DEFAULT_ALIGNMENT);
        backend::free(ptr.as_ptr(), size, align);
        if self.track_stats {
            self.stats.on_dealloc(size);
        }
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::System
    }

    fn strategy(&self) -> AllocStrategy {
        self.policy.strategy()
    }

    fn stats(&self) -> AllocStats {
        self.stats.snapshot()
    }

    fn tracks_stats(&self) -> bool {
        self.track_stats
    }
}
