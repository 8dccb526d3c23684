//! Arena configuration parameters.

use crate::block::BLOCK_DESCRIPTOR_SIZE;
use crate::error::{ArenaError, Result};

/// Configuration for a single arena.
///
/// Validated when the arena is created; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Longest block name stored, in bytes. Longer names are truncated on a
    /// character boundary.
    ///
    /// Default: 31 (a 32-byte name buffer minus its terminator).
    pub max_name_len: usize,

    /// Leftover bytes a chosen block must exceed before it is split.
    ///
    /// When the best-fit block is larger than the request by at most this many
    /// bytes, the whole block is handed out instead.
    ///
    /// Default: [`BLOCK_DESCRIPTOR_SIZE`].
    pub split_threshold: usize,
}

impl ArenaConfig {
    /// Default maximum name length.
    pub const DEFAULT_MAX_NAME_LEN: usize = 31;

    /// Default split threshold: the size of one block descriptor.
    pub const DEFAULT_SPLIT_THRESHOLD: usize = BLOCK_DESCRIPTOR_SIZE;

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_name_len == 0 {
            return Err(ArenaError::InvalidArgument("max_name_len must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            max_name_len: Self::DEFAULT_MAX_NAME_LEN,
            split_threshold: Self::DEFAULT_SPLIT_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_name_buffer() {
        let config = ArenaConfig::default();
        assert_eq!(config.max_name_len, 31);
        assert_eq!(config.split_threshold, BLOCK_DESCRIPTOR_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_name_len_is_rejected() {
        let config = ArenaConfig {
            max_name_len: 0,
            ..ArenaConfig::default()
        };
        assert!(matches!(config.validate(), Err(ArenaError::InvalidArgument(_))));
    }
}
