//! Allocator trait, strategies and process-level context.
//!
//! Every strategy implements [`Allocator`]. Children (arena, pool, region,
//! scope) borrow a parent `&dyn Allocator` for their backing blocks and hand
//! everything back to it when dropped.

pub mod allocator;
pub mod arena;
mod block;
pub mod config;
pub mod constants;
pub mod context;
pub mod options;
pub mod policy;
pub mod pool;
pub mod region;
pub mod scope;
pub mod stats;
pub mod system;
mod trace;

pub use allocator::{AllocError, Allocator, AllocatorExt, AllocatorKind};
pub use arena::ArenaAllocator;
pub use config::{ArenaConfig, PoolConfig, RegionConfig, SystemConfig};
pub use context::{
    cleanup, default_allocator, init, set_default_allocator, set_thread_allocator, thread_allocator,
    with_current_allocator, with_thread_allocator, GlobalAllocatorRef,
};
pub use options::{AllocOptions, AllocStrategy};
pub use policy::{oom_handler, set_oom_handler, FailurePolicy, OomCallback};
pub use pool::PoolAllocator;
pub use region::{RegionAllocator, RegionGuard};
pub use scope::{ScopeGuard, ScopeStack, ScopedAllocator};
pub use stats::{AllocStats, AtomicStats};
pub use system::SystemAllocator;
