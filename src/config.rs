//! Session configuration.
//!
//! Every fingerprint, diff, and patch session carries its own
//! [`SessionConfig`], so sessions with different block sizes can run side by
//! side.

use crate::error::{DeltaError, Result};

/// Validated block size.
///
/// The same block size must be used to fingerprint a base file, encode a
/// target against it, and apply the resulting patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockSize(usize);

impl BlockSize {
    /// Smallest accepted block size in bytes.
    pub const MIN: usize = 1024;
    /// Default block size in bytes (6 KiB).
    pub const DEFAULT: usize = 6 * 1024;
    /// Largest accepted block size in bytes (8 MiB).
    ///
    /// A literal flushed at [`SessionConfig::MAX_LITERAL_FLUSH_BLOCKS`] blocks
    /// of this size must still fit one patch record.
    pub const MAX: usize = 8 * 1024 * 1024;

    /// Validate a requested block size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockSize` if `size` is below [`BlockSize::MIN`] or
    /// above [`BlockSize::MAX`].
    pub fn new(size: usize) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&size) {
            return Err(DeltaError::InvalidBlockSize {
                requested: size,
                minimum: Self::MIN,
                maximum: Self::MAX,
            });
        }
        Ok(Self(size))
    }

    /// Block size in bytes.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Block size as a 64-bit byte count.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Number of blocks needed to cover `len` bytes.
    #[must_use]
    pub const fn blocks_for(self, len: u64) -> u64 {
        len.div_ceil(self.0 as u64)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl std::fmt::Display for BlockSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for one fingerprint/diff/patch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Block size shared by fingerprinting, encoding, and applying.
    pub block_size: BlockSize,
    /// Capacity of each bounded hand-off queue between pipeline stages.
    pub channel_capacity: usize,
    /// Pending literal bytes are flushed once they reach this many blocks.
    pub literal_flush_blocks: usize,
    /// Report progress while the session runs.
    pub progress: bool,
}

impl SessionConfig {
    /// Default hand-off queue capacity, in records.
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
    /// Largest accepted literal flush threshold, in blocks.
    pub const MAX_LITERAL_FLUSH_BLOCKS: usize = 4;
    /// Largest literal operation an encoder emits, in bytes.
    pub const MAX_LITERAL_LEN: usize = BlockSize::MAX * Self::MAX_LITERAL_FLUSH_BLOCKS;

    /// Literal flush threshold in bytes.
    #[must_use]
    pub const fn literal_limit(&self) -> usize {
        self.block_size.get() * self.literal_flush_blocks
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::default(),
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
            literal_flush_blocks: 1,
            progress: false,
        }
    }
}

/// Builder for [`SessionConfig`].
///
/// # Example
///
/// ```rust
/// use rdelta::SessionBuilder;
///
/// let config = SessionBuilder::new()
///     .block_size(4096)
///     .channel_capacity(16)
///     .build()
///     .unwrap();
/// assert_eq!(config.block_size.get(), 4096);
///
/// assert!(SessionBuilder::new().block_size(512).build().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    block_size: usize,
    channel_capacity: usize,
    literal_flush_blocks: usize,
    progress: bool,
}

impl SessionBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            block_size: BlockSize::DEFAULT,
            channel_capacity: SessionConfig::DEFAULT_CHANNEL_CAPACITY,
            literal_flush_blocks: 1,
            progress: false,
        }
    }

    /// Set the block size. Validated in [`SessionBuilder::build`].
    #[must_use]
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the bounded queue capacity between stages (at least 1).
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the literal flush threshold in blocks (clamped to 1..=4).
    #[must_use]
    pub fn literal_flush_blocks(mut self, blocks: usize) -> Self {
        self.literal_flush_blocks = blocks.clamp(1, SessionConfig::MAX_LITERAL_FLUSH_BLOCKS);
        self
    }

    /// Enable or disable progress reporting.
    #[must_use]
    pub fn progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockSize` if the block size is out of range.
    pub fn build(self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            block_size: BlockSize::new(self.block_size)?,
            channel_capacity: self.channel_capacity,
            literal_flush_blocks: self.literal_flush_blocks,
            progress: self.progress,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
