use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use strata::{
    AllocError, AllocOptions, AllocStrategy, Allocator, AllocatorKind, FailurePolicy, PoolAllocator, SystemAllocator,
    SystemConfig,
};

// The process default is global state, so everything touching it lives in
// one test.
#[test]
fn test_default_allocator_lifecycle() {
    static CUSTOM: OnceLock<SystemAllocator> = OnceLock::new();

    strata::init();
    strata::init();
    let first = strata::default_allocator() as *const _ as *const u8;
    assert_eq!(first, SystemAllocator::global() as *const _ as *const u8);

    let custom = CUSTOM.get_or_init(|| {
        SystemAllocator::new(SystemConfig {
            strategy: AllocStrategy::Retry,
            ..SystemConfig::default()
        })
    });
    let previous = strata::set_default_allocator(Some(custom));
    assert!(previous.is_some());
    assert_eq!(strata::default_allocator().strategy(), AllocStrategy::Retry);

    let ptr = strata::with_current_allocator(|a| a.alloc(24, 8, AllocOptions::NONE)).unwrap();
    unsafe { strata::default_allocator().free(ptr, 24, 8) };
    assert_eq!(custom.stats().total_allocations, 1);
    assert_eq!(custom.stats().allocation_count, 0);

    strata::cleanup();
    strata::cleanup();
    assert_eq!(strata::default_allocator().strategy(), AllocStrategy::ReturnNull);
    assert!(strata::alloc::oom_handler().is_none());
}

#[test]
fn test_thread_override_wins_over_default() {
    let system = SystemAllocator::default();
    let pool = PoolAllocator::with_chunks(&system, 64, 8, 4).unwrap();

    strata::with_thread_allocator(&pool, || {
        let kind = strata::with_current_allocator(|a| {
            let p = a.alloc(48, 8, AllocOptions::NONE).unwrap();
            unsafe { a.free(p, 48, 8) };
            a.kind()
        });
        assert_eq!(kind, AllocatorKind::Pool);
    });
    assert_eq!(pool.stats().total_allocations, 1);
    assert_eq!(pool.free_chunks(), 4);
    assert!(strata::thread_allocator(|a| a.is_none()));
}

#[test]
fn test_retry_invokes_callback_once_per_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let policy = FailurePolicy::new(AllocStrategy::Retry).with_callback(Arc::new(move |_: usize| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    let system = SystemAllocator::with_policy(policy, true);

    let res = system.alloc(usize::MAX / 4, 8, AllocOptions::NONE);
    assert!(matches!(res, Err(AllocError::OutOfMemory { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(system.stats().failed_allocations, 2);
}
