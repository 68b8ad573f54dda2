//! Out-of-memory dispatch shared by every strategy.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use std::alloc::handle_alloc_error;
use std::sync::{Arc, PoisonError, RwLock};

use super::allocator::AllocError;
use super::options::{AllocOptions, AllocStrategy};
use super::trace::{alloc_debug, alloc_warn};

/// Callback run when an allocation fails, receiving the requested size.
///
/// Callbacks may release memory (caches, pools) so that a retry succeeds.
pub type OomCallback = Arc<dyn Fn(usize) + Send + Sync>;

static GLOBAL_OOM_HANDLER: RwLock<Option<OomCallback>> = RwLock::new(None);

/// Installs the process-wide out-of-memory handler, returning the previous one.
///
/// The handler runs for allocators that have no callback of their own.
pub fn set_oom_handler(handler: Option<OomCallback>) -> Option<OomCallback> {
    let mut slot = GLOBAL_OOM_HANDLER.write().unwrap_or_else(PoisonError::into_inner);
    core::mem::replace(&mut *slot, handler)
}

/// Returns the process-wide out-of-memory handler, if any.
pub fn oom_handler() -> Option<OomCallback> {
    GLOBAL_OOM_HANDLER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Strategy plus optional callback, evaluated once per failed allocation.
#[derive(Clone, Default)]
pub struct FailurePolicy {
    strategy: AllocStrategy,
    on_oom: Option<OomCallback>,
}

impl fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailurePolicy")
            .field("strategy", &self.strategy)
            .field("on_oom", &self.on_oom.is_some())
            .finish()
    }
}

impl FailurePolicy {
    /// Creates a policy without a callback.
    pub fn new(strategy: AllocStrategy) -> Self {
        Self { strategy, on_oom: None }
    }

    /// Attaches an out-of-memory callback.
    #[must_use]
    pub fn with_callback(mut self, callback: OomCallback) -> Self {
        self.on_oom = Some(callback);
        self
    }

    /// The configured strategy.
    pub fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    /// Replaces the strategy.
    pub fn set_strategy(&mut self, strategy: AllocStrategy) {
        self.strategy = strategy;
    }

    /// Replaces the callback.
    pub fn set_callback(&mut self, callback: Option<OomCallback>) {
        self.on_oom = callback;
    }

    fn notify(&self, size: usize) {
        if let Some(callback) = &self.on_oom {
            callback(size);
        } else if let Some(handler) = oom_handler() {
            handler(size);
        }
    }

    /// Runs `attempt`, applying the strategy if it fails.
    ///
    /// `on_failure` is invoked for every failed attempt so the caller can
    /// count it. Argument errors bypass the policy entirely. `Retry` tries
    /// exactly once more: a callback that frees nothing turns it into two
    /// failures followed by an error.
    pub(crate) fn run<F>(
        &self,
        options: AllocOptions,
        size: usize,
        align: usize,
        on_failure: &dyn Fn(),
        mut attempt: F,
    ) -> Result<NonNull<u8>, AllocError>
    where
        F: FnMut() -> Result<NonNull<u8>, AllocError>,
    {
        let err = match attempt() {
            Ok(ptr) => return Ok(ptr),
            Err(err) if err.is_argument_error() => return Err(err),
            Err(err) => err,
        };
        on_failure();

        let strategy = if options.no_fail() {
            AllocStrategy::Panic
        } else {
            self.strategy
        };

        match strategy {
            AllocStrategy::Panic => {
                self.notify(size);
                alloc_warn!(size, align, error = %err, "allocation failed under panic strategy");
                abort_on_oom(size, align)
            }
            AllocStrategy::Retry => {
                self.notify(size);
                alloc_debug!(size, align, "retrying allocation after oom callback");
                attempt().inspect_err(|_| on_failure())
            }
            AllocStrategy::ReturnNull | AllocStrategy::Gc => Err(err),
        }
    }
}

fn abort_on_oom(size: usize, align: usize) -> ! {
    match Layout::from_size_align(size, align.max(1)) {
        Ok(layout) => handle_alloc_error(layout),
        Err(_) => {
            eprintln!("memory allocation of {size} bytes failed");
            std::process::abort()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing() -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::OutOfMemory { size: 8, align: 8 })
    }

    #[test]
    fn test_return_null_fails_once() {
        let policy = FailurePolicy::new(AllocStrategy::ReturnNull);
        let failures = Cell::new(0);
        let attempts = Cell::new(0);

        let res = policy.run(AllocOptions::NONE, 8, 8, &|| failures.set(failures.get() + 1), || {
            attempts.set(attempts.get() + 1);
            failing()
        });

        assert!(res.is_err());
        assert_eq!(attempts.get(), 1);
        assert_eq!(failures.get(), 1);
    }

    #[test]
    fn test_retry_runs_callback_and_retries_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let policy = FailurePolicy::new(AllocStrategy::Retry)
            .with_callback(Arc::new(move |_: usize| {
                seen.fetch_add(1, Ordering::SeqCst);
            }));
        let failures = Cell::new(0);
        let attempts = Cell::new(0);

        let res = policy.run(AllocOptions::NONE, 8, 8, &|| failures.set(failures.get() + 1), || {
            attempts.set(attempts.get() + 1);
            failing()
        });

        assert!(res.is_err());
        assert_eq!(attempts.get(), 2);
        assert_eq!(failures.get(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_succeeds_when_callback_mitigates() {
        let policy = FailurePolicy::new(AllocStrategy::Retry).with_callback(Arc::new(|_: usize| {}));
        let attempts = Cell::new(0);
        let mut slot = 0u64;
        let target = NonNull::from(&mut slot).cast::<u8>();

        let res = policy.run(AllocOptions::NONE, 8, 8, &|| {}, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                failing()
            } else {
                Ok(target)
            }
        });

        assert_eq!(res, Ok(target));
    }

    #[test]
    fn test_gc_behaves_like_return_null() {
        let policy = FailurePolicy::new(AllocStrategy::Gc);
        let attempts = Cell::new(0);
        let res = policy.run(AllocOptions::NONE, 8, 8, &|| {}, || {
            attempts.set(attempts.get() + 1);
            failing()
        });
        assert!(res.is_err());
        assert_eq!(attempts.get(), 1);
    }

    // The handler is process-wide, so both cases share one test.
    #[test]
    fn test_global_handler_runs_without_own_callback() {
        // Other tests may fail allocations concurrently; only count this size.
        const SIZE: usize = 7919;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let previous = set_oom_handler(Some(Arc::new(move |size: usize| {
            if size == SIZE {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })));

        let attempts = Cell::new(0);
        let plain = FailurePolicy::new(AllocStrategy::Retry).run(AllocOptions::NONE, SIZE, 8, &|| {}, || {
            attempts.set(attempts.get() + 1);
            failing()
        });
        let with_own = FailurePolicy::new(AllocStrategy::Retry)
            .with_callback(Arc::new(|_: usize| {}))
            .run(AllocOptions::NONE, SIZE, 8, &|| {}, failing);
        set_oom_handler(previous);

        assert!(plain.is_err());
        assert!(with_own.is_err());
        assert_eq!(attempts.get(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_argument_errors_bypass_policy() {
        let policy = FailurePolicy::new(AllocStrategy::Panic);
        let failures = Cell::new(0);
        let res = policy.run(AllocOptions::NONE, 0, 8, &|| failures.set(1), || Err(AllocError::ZeroSize));
        assert_eq!(res, Err(AllocError::ZeroSize));
        assert_eq!(failures.get(), 0);
    }
}
