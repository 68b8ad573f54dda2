//! Scoped allocation: per-allocation tracking with individual or bulk release.
//!
//! A [`ScopedAllocator`] remembers every allocation it makes so they can be
//! freed one by one or all at once. [`ScopeStack`] nests scopes in LIFO order
//! and [`ScopeGuard`] ties a scope's cleanup to a lexical block.

use core::cell::{Cell, RefCell};
use core::ops::Deref;
use core::ptr::NonNull;

use super::allocator::{check_request, AllocError, Allocator, AllocatorKind};
use super::constants::{normalize_align, DEFAULT_ALIGNMENT};
use super::options::{AllocOptions, AllocStrategy};
use super::policy::FailurePolicy;
use super::stats::{AllocStats, StatsCell};
use super::trace::alloc_debug;

#[derive(Debug, Clone, Copy)]
struct Tracked {
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
}

/// An allocator that tracks each allocation it hands out.
///
/// Dropping a scope does not release its allocations; they stay valid
/// parent memory. Use [`ScopedAllocator::free_all_allocations`],
/// [`ScopedAllocator::exit`] or a [`ScopeGuard`] for bulk release.
pub struct ScopedAllocator<'p> {
    parent: &'p dyn Allocator,
    allocations: RefCell<Vec<Tracked>>,
    active: Cell<bool>,
    policy: FailurePolicy,
    stats: StatsCell,
}

impl<'p> ScopedAllocator<'p> {
    /// Creates an active scope with the default failure policy.
    pub fn new(parent: &'p dyn Allocator) -> Self {
        Self::with_policy(parent, FailurePolicy::default(), true)
    }

    /// Creates an active scope with an explicit policy and stats flag.
    pub fn with_policy(parent: &'p dyn Allocator, policy: FailurePolicy, track_stats: bool) -> Self {
        Self {
            parent,
            allocations: RefCell::new(Vec::new()),
            active: Cell::new(true),
            policy,
            stats: StatsCell::new(track_stats),
        }
    }

    /// Re-activates the scope.
    pub fn enter(&self) {
        self.active.set(true);
    }

    /// Deactivates the scope, optionally releasing everything it tracks.
    ///
    /// An inactive scope refuses new allocations; frees still work.
    pub fn exit(&self, free_all: bool) {
        self.active.set(false);
        if free_all {
            self.free_all_allocations();
        }
    }

    /// Whether the scope accepts allocations.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Releases every tracked allocation to the parent and clears the list.
    ///
    /// Calling it again with nothing tracked does nothing.
    pub fn free_all_allocations(&self) {
        let drained = core::mem::take(&mut *self.allocations.borrow_mut());
        if drained.is_empty() {
            return;
        }
        let mut bytes = 0;
        for record in &drained {
            // SAFETY: every record was produced by `parent` with this size and alignment.
            unsafe { self.parent.free(record.ptr, record.size, record.align) };
            bytes += record.size;
        }
        self.stats.update(|s| {
            s.record_bulk_free(bytes, drained.len());
            s.record_release(bytes);
        });
        alloc_debug!(count = drained.len(), bytes, "scope released all allocations");
    }

    /// Number of live tracked allocations.
    pub fn tracked_count(&self) -> usize {
        self.allocations.borrow().len()
    }

    /// Bytes held by live tracked allocations.
    pub fn tracked_bytes(&self) -> usize {
        self.allocations.borrow().iter().map(|r| r.size).sum()
    }

    /// Whether `ptr` is a live tracked allocation.
    pub fn is_tracked(&self, ptr: NonNull<u8>) -> bool {
        self.position(ptr).is_some()
    }

    /// Destroys the scope without releasing its allocations.
    pub fn destroy(self) {}

    fn position(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.allocations.borrow().iter().rposition(|r| r.ptr == ptr)
    }

    fn alloc_tracked(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.parent.alloc(size, align, options)?;
        let mut allocations = self.allocations.borrow_mut();
        if allocations.try_reserve(1).is_err() {
            drop(allocations);
            // SAFETY: just allocated from `parent` with this size and alignment.
            unsafe { self.parent.free(ptr, size, align) };
            return Err(AllocError::OutOfMemory { size, align });
        }
        allocations.push(Tracked { ptr, size, align });
        Ok(ptr)
    }
}

impl Allocator for ScopedAllocator<'_> {
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        let align = check_request(size, align, options)?;
        if !self.is_active() {
            self.stats.update(AllocStats::record_failure);
            return Err(AllocError::ScopeInactive);
        }
        let ptr = self.policy.run(
            options,
            size,
            align,
            &|| self.stats.update(AllocStats::record_failure),
            || self.alloc_tracked(size, align, options),
        )?;
        self.stats.update(|s| {
            s.record_alloc(size);
            s.record_reserve(size);
        });
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
        let new_ptr = self
            .parent
            .realloc(Some(ptr), old_size, new_size, align, options)
            .inspect_err(|_| self.stats.update(AllocStats::record_failure))?
            .ok_or(AllocError::OutOfMemory { size: new_size, align })?;

        if let Some(idx) = self.position(ptr) {
            self.allocations.borrow_mut()[idx] = Tracked {
                ptr: new_ptr,
                size: new_size,
                align,
            };
            self.stats.update(|s| {
                s.record_resize(old_size, new_size);
                s.record_release(old_size);
                s.record_reserve(new_size);
            });
        }
        Ok(Some(new_ptr))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Some(idx) = self.position(ptr) {
            let record = self.allocations.borrow_mut().swap_remove(idx);
            self.parent.free(record.ptr, record.size, record.align);
            self.stats.update(|s| {
                s.record_free(record.size);
                s.record_release(record.size);
            });
            return;
        }
        // Allocated before this scope took over; the parent still owns it.
        let align = normalize_align(align).unwrap_or(DEFAULT_ALIGNMENT);
        self.parent.free(ptr, size, align);
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Scope
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

/// A LIFO stack of scopes sharing one parent.
///
/// As an [`Allocator`] the stack allocates from the innermost scope, or
/// straight from the parent when no scope is pushed. `realloc` and `free` go
/// to whichever scope tracks the pointer.
pub struct ScopeStack<'p> {
    parent: &'p dyn Allocator,
    scopes: Vec<ScopedAllocator<'p>>,
    policy: FailurePolicy,
    track_stats: bool,
}

impl<'p> ScopeStack<'p> {
    /// Creates an empty stack.
    pub fn new(parent: &'p dyn Allocator) -> Self {
        Self::with_policy(parent, FailurePolicy::default(), true)
    }

    /// Creates an empty stack whose scopes use `policy` and `track_stats`.
    pub fn with_policy(parent: &'p dyn Allocator, policy: FailurePolicy, track_stats: bool) -> Self {
        Self {
            parent,
            scopes: Vec::new(),
            policy,
            track_stats,
        }
    }

    /// Pushes a new active scope and returns it.
    pub fn push_scope(&mut self) -> &ScopedAllocator<'p> {
        self.scopes
            .push(ScopedAllocator::with_policy(self.parent, self.policy.clone(), self.track_stats));
        alloc_debug!(depth = self.scopes.len(), "scope pushed");
        &self.scopes[self.scopes.len() - 1]
    }

    /// Pops the innermost scope, optionally freeing its allocations first.
    ///
    /// # Errors
    /// `ScopeStackEmpty` if no scope is pushed.
    pub fn pop_scope(&mut self, free_all: bool) -> Result<(), AllocError> {
        let scope = self.scopes.pop().ok_or(AllocError::ScopeStackEmpty)?;
        if free_all {
            scope.free_all_allocations();
        }
        alloc_debug!(depth = self.scopes.len(), free_all, "scope popped");
        Ok(())
    }

    /// The innermost scope.
    pub fn current(&self) -> Option<&ScopedAllocator<'p>> {
        self.scopes.last()
    }

    /// Number of pushed scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Destroys the stack. Scopes still pushed are dropped without freeing.
    pub fn destroy(self) {}

    fn target(&self) -> &dyn Allocator {
        match self.scopes.last() {
            Some(scope) => scope,
            None => self.parent,
        }
    }

    /// The innermost scope tracking `ptr`, else the parent.
    fn owner(&self, ptr: NonNull<u8>) -> &dyn Allocator {
        match self.scopes.iter().rev().find(|scope| scope.is_tracked(ptr)) {
            Some(scope) => scope,
            None => self.parent,
        }
    }
}

impl Allocator for ScopeStack<'_> {
    fn alloc(&self, size: usize, align: usize, options: AllocOptions) -> Result<NonNull<u8>, AllocError> {
        self.target().alloc(size, align, options)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
        options: AllocOptions,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        match ptr {
            Some(p) => self.owner(p).realloc(ptr, old_size, new_size, align, options),
            None => self.target().realloc(None, old_size, new_size, align, options),
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.owner(ptr).free(ptr, size, align);
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::ScopeStack
    }

    fn strategy(&self) -> AllocStrategy {
        self.policy.strategy()
    }

    /// Statistics of the innermost scope, or zeroes when the stack is empty.
    fn stats(&self) -> AllocStats {
        self.current().map(Allocator::stats).unwrap_or_default()
    }

    fn tracks_stats(&self) -> bool {
        self.track_stats
    }
}

/// A scope bound to a lexical block.
///
/// Dereferences to its [`ScopedAllocator`]; when `free_on_exit` is set every
/// tracked allocation is released on drop.
pub struct ScopeGuard<'p> {
    scope: ScopedAllocator<'p>,
    free_on_exit: bool,
}

impl<'p> ScopeGuard<'p> {
    /// Opens a guarded scope over `parent`.
    pub fn new(parent: &'p dyn Allocator, free_on_exit: bool) -> Self {
        Self {
            scope: ScopedAllocator::new(parent),
            free_on_exit,
        }
    }

    /// Changes whether the scope is bulk-freed on drop.
    pub fn set_free_on_exit(&mut self, free_on_exit: bool) {
        self.free_on_exit = free_on_exit;
    }
}

impl<'p> Deref for ScopeGuard<'p> {
    type Target = ScopedAllocator<'p>;

    fn deref(&self) -> &Self::Target {
        &self.scope
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.exit(self.free_on_exit);
    }
}
