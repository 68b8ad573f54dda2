//! Per-call allocation flags and the out-of-memory strategy enum.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::constants::{DEFAULT_ALIGNMENT, PAGE_SIZE};

bitflags! {
    /// Independent flags passed with every allocation request.
    ///
    /// The bit positions are part of the cross-boundary contract, so the
    /// whole set can travel as a single integer via [`AllocOptions::bits`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AllocOptions: u32 {
        /// Fill the returned memory with zero bytes.
        const ZERO = 1 << 0;
        /// Raise the alignment to at least [`DEFAULT_ALIGNMENT`].
        const ALIGNED = 1 << 1;
        /// No trailing padding. Every strategy already allocates exactly.
        const EXACT = 1 << 2;
        /// Survive arena resets. Reserved, currently has no effect.
        const PERSISTENT = 1 << 3;
        /// Raise the alignment to [`PAGE_SIZE`].
        const PAGE_ALIGNED = 1 << 4;
        /// The caller accepts a process abort instead of a failed allocation.
        const NO_FAIL = 1 << 5;
    }
}

impl AllocOptions {
    /// Shorthand for an empty option set.
    pub const NONE: Self = Self::empty();

    /// Whether the memory must be zero-filled.
    #[inline]
    pub const fn zeroed(self) -> bool {
        self.contains(Self::ZERO)
    }

    /// Whether the caller opted into abort-on-failure.
    #[inline]
    pub const fn no_fail(self) -> bool {
        self.contains(Self::NO_FAIL)
    }

    /// Computes the alignment actually honoured for `align` under these flags.
    ///
    /// Frees and reallocs must pass the same value so over-aligned blocks
    /// are returned through the matching path.
    #[inline]
    pub const fn effective_align(self, align: usize) -> usize {
        let mut align = align;
        if self.contains(Self::ALIGNED) && align < DEFAULT_ALIGNMENT {
            align = DEFAULT_ALIGNMENT;
        }
        if self.contains(Self::PAGE_ALIGNED) && align < PAGE_SIZE {
            align = PAGE_SIZE;
        }
        align
    }
}

/// Policy applied when a raw allocation cannot be satisfied.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AllocStrategy {
    /// Run the out-of-memory callback, then abort the process.
    Panic = 0,
    /// Report the failure to the caller immediately.
    #[default]
    ReturnNull = 1,
    /// Run the callback, then try the allocation exactly once more.
    Retry = 2,
    /// Reserved for a collector. Behaves like [`AllocStrategy::ReturnNull`].
    Gc = 3,
}

impl TryFrom<u8> for AllocStrategy {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Panic),
            1 => Ok(Self::ReturnNull),
            2 => Ok(Self::Retry),
            3 => Ok(Self::Gc),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_bits_are_stable() {
        assert_eq!(AllocOptions::ZERO.bits(), 0b1);
        assert_eq!(AllocOptions::ALIGNED.bits(), 0b10);
        assert_eq!(AllocOptions::EXACT.bits(), 0b100);
        assert_eq!(AllocOptions::PERSISTENT.bits(), 0b1000);
        assert_eq!(AllocOptions::PAGE_ALIGNED.bits(), 0b1_0000);
        assert_eq!(AllocOptions::NO_FAIL.bits(), 0b10_0000);

        let opts = AllocOptions::from_bits_truncate(0b10_0001);
        assert!(opts.zeroed());
        assert!(opts.no_fail());
    }

    #[test]
    fn test_effective_align() {
        assert_eq!(AllocOptions::NONE.effective_align(4), 4);
        assert_eq!(AllocOptions::ALIGNED.effective_align(4), DEFAULT_ALIGNMENT);
        assert_eq!(AllocOptions::ALIGNED.effective_align(64), 64);
        assert_eq!(AllocOptions::PAGE_ALIGNED.effective_align(8), PAGE_SIZE);
    }

    #[test]
    fn test_strategy_round_trip_through_u8() {
        for raw in 0u8..4 {
            let strategy = AllocStrategy::try_from(raw).unwrap();
            assert_eq!(strategy as u8, raw);
        }
        assert_eq!(AllocStrategy::try_from(9), Err(9));
    }
}
