//! Diagnostic events, compiled out unless the `tracing` feature is on.

#[cfg(feature = "tracing")]
macro_rules! alloc_debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "strata::alloc", $($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! alloc_debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! alloc_warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "strata::alloc", $($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! alloc_warn {
    ($($arg:tt)*) => {{}};
}

pub(crate) use alloc_debug;
pub(crate) use alloc_warn;
