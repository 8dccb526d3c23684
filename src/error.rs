//! Error types shared by every arena operation.

use std::fmt;

use thiserror::Error;

use crate::block::{ArenaId, BlockHandle};

/// What a failed lookup was searching for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// A Used block with this name.
    Name(String),
    /// A block handle that was never issued by the arena.
    Handle(BlockHandle),
    /// An arena that is not (or no longer) registered.
    Arena(ArenaId),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "block named {name:?}"),
            Self::Handle(handle) => write!(f, "block {handle}"),
            Self::Arena(id) => write!(f, "arena {id}"),
        }
    }
}

/// Errors that can occur during arena operations.
///
/// None of these abort the process. Operations that fail leave the arena's
/// `used`/`free` counters exactly as they were.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// Zero capacity, zero size, empty name or an otherwise unusable input.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The memory source could not hand out the backing storage.
    #[error("failed to acquire {requested} bytes of backing storage")]
    AllocationFailed {
        /// Number of bytes requested from the source.
        requested: usize,
    },

    /// No single free block is large enough, or a named write outgrew its block.
    #[error("capacity exceeded: requested {requested} bytes, at most {available} bytes fit")]
    CapacityExceeded {
        /// Number of bytes requested.
        requested: usize,
        /// Largest number of bytes that would have fit.
        available: usize,
    },

    /// A name, handle or arena lookup missed.
    #[error("not found: {0}")]
    NotFound(Lookup),

    /// The block behind this handle has already been freed.
    #[error("block {0} is already free")]
    AlreadyFree(BlockHandle),

    /// The block chain is malformed (cycle, dangling link, broken partition).
    #[error("corrupt block chain in arena {arena} at slot {slot}: {reason}")]
    CorruptStructure {
        /// Arena whose chain is corrupt.
        arena: ArenaId,
        /// Descriptor slot where the corruption was detected.
        slot: usize,
        /// Which check failed.
        reason: &'static str,
    },

    /// A truncated name collides with a block stored under a different full name.
    #[error("name {name:?} truncates to {key:?}, which already names a different block")]
    AmbiguousName {
        /// The name as supplied by the caller.
        name: String,
        /// The truncated key it collides on.
        key: String,
    },

    /// Stored bytes cannot be decoded as the requested type.
    #[error("block named {name:?} cannot be decoded: {reason}")]
    InvalidEncoding {
        /// Name of the block being read.
        name: String,
        /// Why decoding failed.
        reason: &'static str,
    },
}

/// Result type for arena operations.
pub type Result<T> = std::result::Result<T, ArenaError>;
