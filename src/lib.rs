//! Fixed-capacity memory arenas carved into named blocks.
//!
//! An [`Arena`] owns one contiguous region of raw storage, acquired once from
//! a [`MemorySource`] and never grown. The region is covered end to end by a
//! chain of blocks, each either Free or Used:
//!
//! ```text
//! +----------------------------------------------------------+
//! |  "config" (used) |  free  | "counter" (used) |    free    |
//! +----------------------------------------------------------+
//! 0                                                   capacity
//! ```
//!
//! Allocation is best-fit with splitting; every free eagerly merges adjacent
//! Free blocks. On top of that, blocks can be read and written by name
//! (strings, length-prefixed bytes and fixed-width integers) with
//! find-or-create semantics.
//!
//! Arenas are created through a [`PoolRegistry`], which also tears them all
//! down at once.
//!
//! ```no_run
//! use memarena::PoolRegistry;
//!
//! let mut registry = PoolRegistry::new();
//! let id = registry.create(4096)?;
//!
//! let arena = registry.arena_mut(id)?;
//! arena.write_string("greeting", "hello")?;
//! arena.write_int("answer", 42i32)?;
//! assert_eq!(arena.read_string("greeting")?, "hello");
//!
//! assert!(registry.clear_all().is_empty());
//! # Ok::<(), memarena::ArenaError>(())
//! ```

mod accessor;
mod arena;
mod block;
mod config;
mod describe;
mod directory;
mod error;
mod kernel;
mod region;
mod registry;

pub use accessor::NativeInt;
pub use arena::Arena;
pub use block::{Allocation, ArenaId, BLOCK_DESCRIPTOR_SIZE, BlockHandle, BlockName, BlockState};
pub use config::ArenaConfig;
pub use describe::{ArenaSummary, BlockInfo, LineSink, StdoutSink, TracingSink};
pub use error::{ArenaError, Lookup, Result};
pub use kernel::{MemorySource, SystemMemory, page_size};
pub use registry::PoolRegistry;
