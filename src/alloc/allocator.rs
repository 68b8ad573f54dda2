use core::alloc::Layout;
use core::ptr::{self, NonNull};

use super::constants::normalize_align;
use super::options::{AllocOptions, AllocStrategy};
use super::stats::AllocStats;

/// Which strategy backs an [`Allocator`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// The platform allocator wrapper.
    System,
    /// Bump allocation from growable blocks.
    Arena,
    /// Fixed-size chunks from block-local free lists.
    Pool,
    /// Nested regions freed as a unit.
    Region,
    /// A single tracking scope.
    Scope,
    /// A stack of tracking scopes.
    ScopeStack,
}

/// The contract every allocation strategy implements.
///
/// Consumers program against this trait and never depend on the strategy
/// behind it. Methods take `&self` so several children can share one parent;
/// strategies other than the system allocator are not `Sync` and callers
/// must serialize access to an instance.
///
/// Destroying an allocator is dropping it.
pub trait Allocator {
    /// Allocates `size` bytes aligned to `align`.
    ///
    /// `align == 0` selects the default alignment. A zero `size` returns
    /// [`AllocError::ZeroSize`] without touching statistics.
    ///
    /// # Errors
    /// Returns an error when the request is invalid or cannot be satisfied
    /// under the allocator's failure strategy.
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError>;

    /// Resizes an allocation.
    ///
    /// A `None` pointer behaves as [`Allocator::alloc`]; a zero `new_size`
    /// behaves as [`Allocator::free`] and yields `Ok(None)`. On failure the
    /// original allocation is left untouched.
    ///
    /// # Errors
    /// Same conditions as [`Allocator::alloc`].
    ///
    /// # Safety
    /// `ptr` must be a live allocation from this allocator made with
    /// `old_size` and `align`.
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
        options: AllocOptions,
    ) -> Result<Option<NonNull<u8>>, AllocError>;

    /// Releases an allocation.
    ///
    /// # Safety
    /// `ptr` must be a live allocation from this allocator made with `size`
    /// and `align`, and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize);

    /// The strategy behind this handle.
    fn kind(&self) -> AllocatorKind;

    /// The out-of-memory policy applied on failure.
    fn strategy(&self) -> AllocStrategy;

    /// A best-effort snapshot of the statistics.
    fn stats(&self) -> AllocStats;

    /// Whether statistics are being recorded.
    fn tracks_stats(&self) -> bool;
}

/// The error type for allocation failures.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// A zero-byte allocation was requested.
    #[error("zero-sized allocation requested")]
    ZeroSize,
    /// The alignment is not a power of two.
    #[error("alignment {align} is not a power of two")]
    InvalidAlignment {
        /// The rejected alignment.
        align: usize,
    },
    /// Backing memory is exhausted.
    #[error("out of memory allocating {size} bytes (align {align})")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment.
        align: usize,
    },
    /// The request does not fit a pool chunk.
    #[error("request of {requested} bytes exceeds the pool chunk size of {chunk_size}")]
    ExceedsChunkSize {
        /// Requested size in bytes.
        requested: usize,
        /// The pool's chunk size.
        chunk_size: usize,
    },
    /// The request is larger than a region block and large allocations are disabled.
    #[error("allocation of {size} bytes exceeds region size {region_size}")]
    LargeAllocationDenied {
        /// Requested size in bytes.
        size: usize,
        /// The region allocator's block size.
        region_size: usize,
    },
    /// The scope has been exited and refuses new allocations.
    #[error("scope is not active")]
    ScopeInactive,
    /// `end` was called with no region open.
    #[error("no active region to end")]
    RegionStackEmpty,
    /// `pop_scope` was called on an empty stack.
    #[error("scope stack is empty")]
    ScopeStackEmpty,
    /// The pointer was not allocated by this allocator.
    #[error("pointer does not belong to this allocator")]
    ForeignPointer,
    /// A configuration value was rejected.
    #[error("invalid allocator configuration: {0}")]
    InvalidConfig(&'static str),
}

impl AllocError {
    /// Argument errors are reported directly and never reach the failure policy.
    #[inline]
    pub(crate) const fn is_argument_error(&self) -> bool {
        matches!(self, Self::ZeroSize | Self::InvalidAlignment { .. })
    }
}

/// Validates a request and returns the alignment to honour.
#[inline]
pub(crate) fn check_request(size: usize, align: usize, options: AllocOptions) -> Result<usize, AllocError> {
    if size == 0 {
        return Err(AllocError::ZeroSize);
    }
    let align = normalize_align(align).ok_or(AllocError::InvalidAlignment { align })?;
    Ok(options.effective_align(align))
}

impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        (**self).alloc(size, align, options)
    }

    #[inline]
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
        options: AllocOptions,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        (**self).realloc(ptr, old_size, new_size, align, options)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        (**self).free(ptr, size, align);
    }

    fn kind(&self) -> AllocatorKind {
        (**self).kind()
    }

    fn strategy(&self) -> AllocStrategy {
        (**self).strategy()
    }

    fn stats(&self) -> AllocStats {
        (**self).stats()
    }

    fn tracks_stats(&self) -> bool {
        (**self).tracks_stats()
    }
}

impl<A: Allocator + ?Sized> Allocator for Box<A> {
    #[inline]
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        (**self).alloc(size, align, options)
    }

    #[inline]
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
        options: AllocOptions,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        (**self).realloc(ptr, old_size, new_size, align, options)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        (**self).free(ptr, size, align);
    }

    fn kind(&self) -> AllocatorKind {
        (**self).kind()
    }

    fn strategy(&self) -> AllocStrategy {
        (**self).strategy()
    }

    fn stats(&self) -> AllocStats {
        (**self).stats()
    }

    fn tracks_stats(&self) -> bool {
        (**self).tracks_stats()
    }
}

/// Typed helpers layered on any [`Allocator`].
///
/// Values written through these helpers are never dropped by the allocator;
/// they are plain bytes as far as it is concerned.
pub trait AllocatorExt: Allocator {
    /// Allocates space for `value` and moves it in.
    ///
    /// # Errors
    /// Propagates the allocation failure. Zero-sized types are rejected as
    /// [`AllocError::ZeroSize`].
    fn alloc_value<T>(&self, value: T) -> Result<NonNull<T>, AllocError> {
        let layout = Layout::new::<T>();
        let ptr = self.alloc(layout.size(), layout.align(), AllocOptions::NONE)?.cast::<T>();
        // SAFETY: freshly allocated, correctly sized and aligned for `T`.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Allocates a copy of `slice`.
    ///
    /// # Errors
    /// Propagates the allocation failure.
    fn alloc_slice_copy<T: Copy>(&self, slice: &[T]) -> Result<NonNull<[T]>, AllocError> {
        let layout = Layout::for_value(slice);
        let ptr = self.alloc(layout.size(), layout.align(), AllocOptions::NONE)?.cast::<T>();
        // SAFETY: the destination holds `slice.len()` elements and cannot overlap the source.
        unsafe {
            ptr::copy_nonoverlapping(slice.as_ptr(), ptr.as_ptr(), slice.len());
        }
        Ok(NonNull::slice_from_raw_parts(ptr, slice.len()))
    }

    /// Allocates a copy of `s`, returning a pointer to its bytes.
    ///
    /// # Errors
    /// Propagates the allocation failure.
    fn alloc_str(&self, s: &str) -> Result<NonNull<str>, AllocError> {
        let bytes = self.alloc_slice_copy(s.as_bytes())?;
        // SAFETY: the bytes are a verbatim copy of valid UTF-8 and the pointer is non-null.
        Ok(unsafe { NonNull::new_unchecked(bytes.as_ptr() as *mut str) })
    }
}

impl<A: Allocator + ?Sized> AllocatorExt for A {}
