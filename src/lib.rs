//! # `strata` - Layered Allocation Strategies
//!
//! The allocation framework underneath a language runtime: one [`Allocator`]
//! contract and five strategies layered over each other.
//!
//! ## Strategies
//!
//! - **System** ([`SystemAllocator`]): the platform heap, process default and
//!   root parent of every other strategy. The only `Sync` strategy.
//! - **Arena** ([`ArenaAllocator`]): bump allocation from growable blocks,
//!   bulk `reset`, no per-object free.
//! - **Pool** ([`PoolAllocator`]): fixed-size chunks on an intrusive free
//!   list. Chunk headers are tagged with the owning pool so foreign frees are
//!   rejected.
//! - **Region** ([`RegionAllocator`]): LIFO-nested regions released as a unit.
//! - **Scope** ([`ScopedAllocator`], [`ScopeStack`], [`ScopeGuard`]):
//!   per-allocation tracking with individual or bulk release.
//!
//! ## Ownership
//!
//! A child allocator borrows its parent for `'p`, so it cannot outlive it.
//! Dropping a child returns its blocks to the parent. Strategies other than
//! the system allocator use interior mutability without locks and are
//! `!Sync`: one instance per thread, or external locking.
//!
//! ## Failure handling
//!
//! Failed allocations go through a [`FailurePolicy`]: panic (abort via
//! `handle_alloc_error`), retry once after the out-of-memory callback, or
//! return the error. Argument errors such as a zero size are returned
//! without consulting the policy.
//!
//! ## Example
//!
//! ```rust
//! use strata::{AllocOptions, Allocator, ArenaAllocator, SystemAllocator};
//!
//! let system = SystemAllocator::default();
//! let mut arena = ArenaAllocator::with_initial_size(&system, 1024).unwrap();
//!
//! let p1 = arena.alloc(100, 8, AllocOptions::NONE).unwrap();
//! let p2 = arena.alloc(2000, 8, AllocOptions::NONE).unwrap();
//! assert_eq!(p2.as_ptr() as usize % 8, 0);
//! assert_ne!(p1, p2);
//! assert_eq!(arena.block_count(), 2);
//!
//! arena.reset();
//! assert_eq!(arena.stats().bytes_allocated, 0);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

pub mod alloc;

pub use alloc::{
    cleanup, default_allocator, init, set_default_allocator, set_oom_handler, set_thread_allocator,
    thread_allocator, with_current_allocator, with_thread_allocator, AllocError, AllocOptions, AllocStats,
    AllocStrategy, Allocator, AllocatorExt, AllocatorKind, ArenaAllocator, ArenaConfig, FailurePolicy,
    OomCallback, PoolAllocator, PoolConfig, RegionAllocator, RegionConfig, RegionGuard, ScopeGuard, ScopeStack,
    ScopedAllocator, SystemAllocator, SystemConfig,
};

// Compile-time assertions for the boundary layouts.
const _: () = {
    use core::mem;

    // Seven machine-word counters, no padding.
    assert!(mem::size_of::<AllocStats>() == 7 * mem::size_of::<usize>());
    assert!(mem::align_of::<AllocStats>() == mem::align_of::<usize>());

    // Options cross boundaries as one integer, strategies as one byte.
    assert!(mem::size_of::<AllocOptions>() == mem::size_of::<u32>());
    assert!(mem::size_of::<AllocStrategy>() == 1);
    assert!(AllocStrategy::Gc as u8 == 3);

    // The system singleton is shared between threads.
    const fn assert_sync<T: Sync>() {}
    assert_sync::<SystemAllocator>();
};
