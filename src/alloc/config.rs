//! Construction parameters for each strategy.
//!
//! All configs deserialize from JSON with missing fields defaulted, so a
//! runtime can ship them next to its other settings.

use serde::{Deserialize, Serialize};

use super::allocator::AllocError;
use super::constants::{
    DEFAULT_ARENA_BLOCK_SIZE, DEFAULT_CHUNKS_PER_BLOCK, DEFAULT_REGION_SIZE, MAX_CHUNK_SIZE,
};
use super::options::AllocStrategy;

fn enabled() -> bool {
    true
}

/// Settings for [`SystemAllocator`](super::SystemAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Out-of-memory strategy.
    pub strategy: AllocStrategy,
    /// Record statistics.
    pub track_stats: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            strategy: AllocStrategy::ReturnNull,
            track_stats: enabled(),
        }
    }
}

/// Settings for [`ArenaAllocator`](super::ArenaAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Size of the first block, acquired eagerly. Zero defers it to the first allocation.
    pub initial_size: usize,
    /// Lower bound for every block requested afterwards.
    pub min_block_size: usize,
    /// Out-of-memory strategy.
    pub strategy: AllocStrategy,
    /// Record statistics.
    pub track_stats: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_ARENA_BLOCK_SIZE,
            min_block_size: DEFAULT_ARENA_BLOCK_SIZE,
            strategy: AllocStrategy::ReturnNull,
            track_stats: enabled(),
        }
    }
}

impl ArenaConfig {
    /// Config whose first block and minimum block size are both `initial_size`.
    pub fn with_initial_size(initial_size: usize) -> Self {
        let min_block_size = if initial_size == 0 {
            DEFAULT_ARENA_BLOCK_SIZE
        } else {
            initial_size
        };
        Self {
            initial_size,
            min_block_size,
            ..Self::default()
        }
    }

    /// Checks the config.
    ///
    /// # Errors
    /// `InvalidConfig` when `min_block_size` is zero.
    pub fn validate(&self) -> Result<(), AllocError> {
        if self.min_block_size == 0 {
            return Err(AllocError::InvalidConfig("arena min_block_size must be non-zero"));
        }
        Ok(())
    }
}

/// Settings for [`PoolAllocator`](super::PoolAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Usable bytes per chunk.
    pub chunk_size: usize,
    /// Alignment of every chunk body. Must be a power of two.
    pub alignment: usize,
    /// Chunks carved out of each block. Zero selects the default.
    pub chunks_per_block: usize,
    /// Out-of-memory strategy.
    pub strategy: AllocStrategy,
    /// Record statistics.
    pub track_stats: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            alignment: 8,
            chunks_per_block: DEFAULT_CHUNKS_PER_BLOCK,
            strategy: AllocStrategy::ReturnNull,
            track_stats: enabled(),
        }
    }
}

impl PoolConfig {
    /// Config for `chunk_size` byte chunks.
    pub fn new(chunk_size: usize, alignment: usize, chunks_per_block: usize) -> Self {
        Self {
            chunk_size,
            alignment,
            chunks_per_block,
            ..Self::default()
        }
    }

    /// Chunks per block with the zero default applied.
    pub fn effective_chunks_per_block(&self) -> usize {
        if self.chunks_per_block == 0 {
            DEFAULT_CHUNKS_PER_BLOCK
        } else {
            self.chunks_per_block
        }
    }

    /// Checks the config.
    ///
    /// # Errors
    /// `InvalidConfig` for a zero or oversized chunk, or a bad alignment.
    pub fn validate(&self) -> Result<(), AllocError> {
        if self.chunk_size == 0 {
            return Err(AllocError::InvalidConfig("pool chunk_size must be non-zero"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(AllocError::InvalidConfig("pool chunk_size exceeds MAX_CHUNK_SIZE"));
        }
        if !self.alignment.is_power_of_two() {
            return Err(AllocError::InvalidConfig("pool alignment must be a power of two"));
        }
        if self.chunks_per_block > u32::MAX as usize {
            return Err(AllocError::InvalidConfig("pool chunks_per_block is too large"));
        }
        Ok(())
    }
}

/// Settings for [`RegionAllocator`](super::RegionAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Size of each block requested for a region.
    pub region_size: usize,
    /// Accept allocations larger than `region_size` by giving them a dedicated block.
    pub allow_large_allocations: bool,
    /// Out-of-memory strategy.
    pub strategy: AllocStrategy,
    /// Record statistics.
    pub track_stats: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region_size: DEFAULT_REGION_SIZE,
            allow_large_allocations: true,
            strategy: AllocStrategy::ReturnNull,
            track_stats: enabled(),
        }
    }
}

impl RegionConfig {
    /// Config with the given block size and large-allocation policy.
    pub fn new(region_size: usize, allow_large_allocations: bool) -> Self {
        Self {
            region_size,
            allow_large_allocations,
            ..Self::default()
        }
    }

    /// Checks the config.
    ///
    /// # Errors
    /// `InvalidConfig` when `region_size` is zero.
    pub fn validate(&self) -> Result<(), AllocError> {
        if self.region_size == 0 {
            return Err(AllocError::InvalidConfig("region_size must be non-zero"));
        }
        Ok(())
    }
}
