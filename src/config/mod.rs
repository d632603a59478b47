//! # Configuration Module
//!
//! Block geometry for the tree. The on-extent struct sizes are compile-time
//! constants (see [`constants`]); the block size and minimum fill are runtime
//! configuration so tests can force deep trees with tiny blocks.

pub mod constants;
pub use constants::*;

use crate::error::{OmapError, Result};

/// Runtime block geometry, passed to every tree operation via the
/// [`OmapContext`](crate::store::OmapContext).
///
/// `min_fill` is the merge threshold: any non-root node whose byte footprint
/// drops below it reports `NeedMerge` to its parent. The root is exempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmapConfig {
    pub block_size: u32,
    pub min_fill: u32,
}

impl Default for OmapConfig {
    fn default() -> Self {
        Self {
            block_size: OMAP_BLOCK_SIZE as u32,
            min_fill: (OMAP_BLOCK_SIZE / 2) as u32,
        }
    }
}

impl OmapConfig {
    /// Config with the given block size and the default half-block fill
    /// threshold.
    pub fn with_block_size(block_size: u32) -> Result<Self> {
        let config = Self {
            block_size,
            min_fill: block_size / 2,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if (self.block_size as usize) < MIN_BLOCK_SIZE {
            return Err(OmapError::InvalidConfig {
                reason: format!(
                    "block size {} below minimum {}",
                    self.block_size, MIN_BLOCK_SIZE
                ),
            });
        }
        if self.min_fill > self.block_size {
            return Err(OmapError::InvalidConfig {
                reason: format!(
                    "min fill {} exceeds block size {}",
                    self.min_fill, self.block_size
                ),
            });
        }
        Ok(())
    }

    /// Largest slot-plus-payload footprint a single entry may occupy.
    ///
    /// Capped at a quarter of the usable block so an overflowing node always
    /// partitions into two viable halves.
    pub fn max_entry_size(&self) -> usize {
        (self.block_size as usize - NODE_HEADER_SIZE) / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OmapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.min_fill, 2048);
    }

    #[test]
    fn with_block_size_halves_min_fill() {
        let config = OmapConfig::with_block_size(512).unwrap();
        assert_eq!(config.min_fill, 256);
    }

    #[test]
    fn rejects_tiny_blocks() {
        let result = OmapConfig::with_block_size(64);
        assert!(matches!(result, Err(OmapError::InvalidConfig { .. })));
    }

    #[test]
    fn rejects_min_fill_above_block() {
        let config = OmapConfig {
            block_size: 512,
            min_fill: 600,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_entry_size_is_quarter_of_usable() {
        let config = OmapConfig::with_block_size(4096).unwrap();
        assert_eq!(config.max_entry_size(), (4096 - NODE_HEADER_SIZE) / 4);
    }
}
