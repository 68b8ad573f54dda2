//! Process-wide default and per-thread override allocators.
//!
//! Resolution for an unqualified allocation prefers the calling thread's
//! override, then the process default, then the lazily initialised
//! [`SystemAllocator::global`] instance. Prefer passing an allocator
//! explicitly; these entry points exist for code that cannot thread one
//! through.

use core::cell::Cell;
use core::ptr::NonNull;
use std::sync::{PoisonError, RwLock};

use super::allocator::Allocator;
use super::policy::set_oom_handler;
use super::system::SystemAllocator;
use super::trace::alloc_debug;

/// A process-wide allocator: shared between threads, lives forever.
pub type GlobalAllocatorRef = &'static (dyn Allocator + Sync);

static DEFAULT_ALLOCATOR: RwLock<Option<GlobalAllocatorRef>> = RwLock::new(None);

// The stored pointer may come from `with_thread_allocator`, whose borrow is
// shorter than 'static; it is cleared before that borrow ends.
thread_local! {
    static THREAD_ALLOCATOR: Cell<Option<NonNull<dyn Allocator>>> = const { Cell::new(None) };
}

/// Initialises the subsystem: forces the system singleton and makes it the default.
///
/// Calling it again is harmless.
pub fn init() {
    let system: GlobalAllocatorRef = SystemAllocator::global();
    let mut slot = DEFAULT_ALLOCATOR.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(system);
    }
    alloc_debug!("allocator subsystem initialised");
}

/// Clears the default override, this thread's override and the global OOM handler.
pub fn cleanup() {
    *DEFAULT_ALLOCATOR.write().unwrap_or_else(PoisonError::into_inner) = None;
    THREAD_ALLOCATOR.with(|slot| slot.set(None));
    set_oom_handler(None);
    alloc_debug!("allocator subsystem cleaned up");
}

/// The process default allocator.
pub fn default_allocator() -> GlobalAllocatorRef {
    let current = *DEFAULT_ALLOCATOR.read().unwrap_or_else(PoisonError::into_inner);
    match current {
        Some(allocator) => allocator,
        None => SystemAllocator::global(),
    }
}

/// Replaces the process default, returning the previous override.
///
/// `None` falls back to the system singleton.
pub fn set_default_allocator(allocator: Option<GlobalAllocatorRef>) -> Option<GlobalAllocatorRef> {
    let mut slot = DEFAULT_ALLOCATOR.write().unwrap_or_else(PoisonError::into_inner);
    core::mem::replace(&mut *slot, allocator)
}

/// Installs a permanent override for the calling thread.
///
/// `None` removes any override, including one installed by an enclosing
/// [`with_thread_allocator`], until that call returns and restores its own.
pub fn set_thread_allocator(allocator: Option<&'static dyn Allocator>) {
    THREAD_ALLOCATOR.with(|slot| slot.set(allocator.map(NonNull::from)));
}

/// Runs `f` with the calling thread's override, if any.
pub fn thread_allocator<R>(f: impl FnOnce(Option<&dyn Allocator>) -> R) -> R {
    let current = THREAD_ALLOCATOR.with(Cell::get);
    // SAFETY: a stored pointer is either 'static or outlives the enclosing
    // `with_thread_allocator` call that installed it, which outlives `f`.
    f(current.map(|ptr| unsafe { ptr.as_ref() }))
}

/// Runs `f` with `allocator` as this thread's override, restoring the
/// previous one afterwards, also when `f` unwinds.
pub fn with_thread_allocator<R>(allocator: &dyn Allocator, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<NonNull<dyn Allocator>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            THREAD_ALLOCATOR.with(|slot| slot.set(self.0));
        }
    }

    // SAFETY: only the trait-object lifetime changes. The pointer leaves the
    // slot when `Restore` drops, before the borrow of `allocator` ends.
    let erased = unsafe {
        core::mem::transmute::<NonNull<dyn Allocator + '_>, NonNull<dyn Allocator + 'static>>(NonNull::from(
            allocator,
        ))
    };
    let _restore = Restore(THREAD_ALLOCATOR.with(|slot| slot.replace(Some(erased))));
    f()
}

/// Runs `f` with the allocator an unqualified allocation would use.
pub fn with_current_allocator<R>(f: impl FnOnce(&dyn Allocator) -> R) -> R {
    thread_allocator(|local| match local {
        Some(allocator) => f(allocator),
        None => f(default_allocator()),
    })
}
