//! Find-or-create access to blocks by name.
//!
//! Every write looks for the first Used block carrying the name. If there is
//! one, the value is written into it in place; if there is none, exactly one
//! block of the value's encoded size is allocated first. A value that outgrows
//! its existing block is refused with [`ArenaError::CapacityExceeded`] rather
//! than moved, so handles handed out earlier stay valid.
//!
//! Encodings use the host's native byte order:
//!
//! ```text
//! string: | bytes ... | 0 |
//! bytes:  | len (usize) | bytes ... |
//! int:    | value (size_of::<T>()) |
//! ```

use std::mem;

use tracing::warn;

use crate::{
    arena::Arena,
    block::{BlockHandle, NameMatch},
    error::{ArenaError, Lookup, Result},
};

const LEN_PREFIX: usize = mem::size_of::<usize>();

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width integers that can be stored in a block.
pub trait NativeInt: Copy + sealed::Sealed {
    /// Encoded width in bytes.
    const WIDTH: usize;

    #[doc(hidden)]
    fn encode(self, out: &mut [u8]);

    #[doc(hidden)]
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! native_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl NativeInt for $ty {
                const WIDTH: usize = mem::size_of::<$ty>();

                fn encode(self, out: &mut [u8]) {
                    out[..Self::WIDTH].copy_from_slice(&self.to_ne_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

native_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Arena {
    /// Handle of the first Used block named `name`.
    pub fn find(&self, name: &str) -> Result<BlockHandle> {
        match self.lookup(name)? {
            Some(slot) => self.handle(slot),
            None => Err(ArenaError::NotFound(Lookup::Name(name.to_owned()))),
        }
    }

    /// Stores `s` plus a terminator under `name`.
    pub fn write_string(&mut self, name: &str, s: &str) -> Result<BlockHandle> {
        if s.as_bytes().contains(&0) {
            return Err(ArenaError::InvalidArgument("string contains a NUL byte"));
        }

        let handle = self.find_or_allocate(name, s.len() + 1)?;
        self.store_string(handle, s)?;
        Ok(handle)
    }

    /// Overwrites the block behind `handle` with `s` plus a terminator.
    pub fn write_string_at(&mut self, handle: BlockHandle, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(ArenaError::InvalidArgument("string contains a NUL byte"));
        }

        self.check_fits(handle, s.len() + 1)?;
        self.store_string(handle, s)
    }

    /// The string stored under `name`, up to its terminator.
    pub fn read_string(&self, name: &str) -> Result<String> {
        let bytes = self.named_payload(name)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

        String::from_utf8(bytes[..end].to_vec()).map_err(|_| ArenaError::InvalidEncoding {
            name: name.to_owned(),
            reason: "not valid UTF-8",
        })
    }

    /// Stores `value` in native byte order under `name`.
    pub fn write_int<T: NativeInt>(&mut self, name: &str, value: T) -> Result<BlockHandle> {
        let handle = self.find_or_allocate(name, T::WIDTH)?;
        value.encode(self.payload_mut(handle)?);
        Ok(handle)
    }

    /// Overwrites the start of the block behind `handle` with `value`.
    pub fn write_int_at<T: NativeInt>(&mut self, handle: BlockHandle, value: T) -> Result<()> {
        self.check_fits(handle, T::WIDTH)?;
        value.encode(self.payload_mut(handle)?);
        Ok(())
    }

    /// The integer stored under `name`.
    pub fn read_int<T: NativeInt>(&self, name: &str) -> Result<T> {
        let bytes = self.named_payload(name)?;
        if bytes.len() < T::WIDTH {
            return Err(ArenaError::InvalidEncoding {
                name: name.to_owned(),
                reason: "block is narrower than the integer type",
            });
        }
        Ok(T::decode(bytes))
    }

    /// Stores `data` behind a native `usize` length prefix under `name`.
    pub fn write_bytes(&mut self, name: &str, data: &[u8]) -> Result<BlockHandle> {
        let handle = self.find_or_allocate(name, LEN_PREFIX + data.len())?;
        self.store_bytes(handle, data)?;
        Ok(handle)
    }

    /// Overwrites the block behind `handle` with length-prefixed `data`.
    pub fn write_bytes_at(&mut self, handle: BlockHandle, data: &[u8]) -> Result<()> {
        self.check_fits(handle, LEN_PREFIX + data.len())?;
        self.store_bytes(handle, data)
    }

    /// The length-prefixed bytes stored under `name`.
    pub fn read_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let bytes = self.named_payload(name)?;
        let invalid = |reason: &'static str| ArenaError::InvalidEncoding {
            name: name.to_owned(),
            reason,
        };

        if bytes.len() < LEN_PREFIX {
            return Err(invalid("block is narrower than the length prefix"));
        }
        let len = usize::decode(bytes);
        if len > bytes.len() - LEN_PREFIX {
            return Err(invalid("length prefix runs past the block"));
        }

        Ok(bytes[LEN_PREFIX..LEN_PREFIX + len].to_vec())
    }

    /// Slot of the first Used block named `name`.
    ///
    /// A block stored under a different full name that truncates to the
    /// same key is not a match; if only such blocks exist the lookup fails
    /// with [`ArenaError::AmbiguousName`].
    pub(crate) fn lookup(&self, name: &str) -> Result<Option<usize>> {
        let key = self.block_name(name)?;
        let mut ambiguous = false;

        for (slot, block) in &self.blocks {
            if block.is_free() {
                continue;
            }
            match block.name.compare(&key) {
                NameMatch::Same => return Ok(Some(slot)),
                NameMatch::Ambiguous => ambiguous = true,
                NameMatch::Different => {}
            }
        }

        if ambiguous {
            warn!(arena = %self.id(), name, key = %key, "ambiguous truncated name");
            return Err(ArenaError::AmbiguousName {
                name: name.to_owned(),
                key: key.as_str().to_owned(),
            });
        }
        Ok(None)
    }

    /// Handle of the block named `name`, allocating `needed` bytes if there is
    /// none. An existing block smaller than `needed` is an error.
    fn find_or_allocate(&mut self, name: &str, needed: usize) -> Result<BlockHandle> {
        match self.lookup(name)? {
            Some(slot) => {
                let handle = self.handle(slot)?;
                self.check_fits(handle, needed)?;
                Ok(handle)
            }
            None => Ok(self.allocate(needed, name)?.handle),
        }
    }

    fn named_payload(&self, name: &str) -> Result<&[u8]> {
        let slot = self
            .lookup(name)?
            .ok_or_else(|| ArenaError::NotFound(Lookup::Name(name.to_owned())))?;
        self.payload(self.handle(slot)?)
    }

    fn check_fits(&self, handle: BlockHandle, needed: usize) -> Result<()> {
        let (_, size) = self.used_block(handle)?;
        if size < needed {
            return Err(ArenaError::CapacityExceeded {
                requested: needed,
                available: size,
            });
        }
        Ok(())
    }

    fn store_bytes(&mut self, handle: BlockHandle, data: &[u8]) -> Result<()> {
        let payload = self.payload_mut(handle)?;
        payload[..LEN_PREFIX].copy_from_slice(&data.len().to_ne_bytes());
        payload[LEN_PREFIX..LEN_PREFIX + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn store_string(&mut self, handle: BlockHandle, s: &str) -> Result<()> {
        let payload = self.payload_mut(handle)?;
        payload[..s.len()].copy_from_slice(s.as_bytes());
        payload[s.len()] = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        arena::tests::arena,
        block::ArenaId,
        config::ArenaConfig,
        kernel::SystemMemory,
    };

    #[test]
    fn string_round_trip() {
        let mut arena = arena(256);

        arena.write_string("k", "hello").unwrap();

        assert_eq!(arena.read_string("k").unwrap(), "hello");
    }

    #[test]
    fn first_write_allocates_once_and_rewrites_do_not() {
        let mut arena = arena(4096);

        let first = arena.write_string("greeting", "hello world").unwrap();
        let blocks = arena.block_count();
        let used = arena.used_bytes();

        let second = arena.write_string("greeting", "hi").unwrap();

        assert_eq!(first, second);
        assert_eq!(arena.block_count(), blocks);
        assert_eq!(arena.used_bytes(), used);
        assert_eq!(arena.read_string("greeting").unwrap(), "hi");
        assert_eq!(arena.block(first).unwrap().requested, 12);
    }

    #[test]
    fn growing_past_the_block_fails() {
        let config = ArenaConfig {
            split_threshold: 0,
            ..ArenaConfig::default()
        };
        let mut arena = Arena::create(ArenaId(1), 64, config, Arc::new(SystemMemory)).unwrap();
        arena.write_string("k", "abc").unwrap();

        let err = arena.write_string("k", "abcdef").unwrap_err();

        assert_eq!(
            err,
            ArenaError::CapacityExceeded {
                requested: 7,
                available: 4
            }
        );
        assert_eq!(arena.read_string("k").unwrap(), "abc");
    }

    #[test]
    fn missing_names_are_not_found() {
        let arena = arena(64);

        assert_eq!(
            arena.read_string("nope"),
            Err(ArenaError::NotFound(Lookup::Name("nope".into())))
        );
        assert!(matches!(arena.read_int::<i32>("nope"), Err(ArenaError::NotFound(_))));
        assert!(matches!(arena.find("nope"), Err(ArenaError::NotFound(_))));
    }

    #[test]
    fn freed_blocks_are_not_found_by_name() {
        let mut arena = arena(256);
        let handle = arena.write_int("n", 5i32).unwrap();

        arena.free(handle).unwrap();

        assert!(matches!(arena.read_int::<i32>("n"), Err(ArenaError::NotFound(_))));
    }

    #[test]
    fn int_round_trip() {
        let mut arena = arena(256);

        arena.write_int("answer", 42i32).unwrap();
        arena.write_int("big", -7_000_000_000i64).unwrap();
        arena.write_int("answer", -1i32).unwrap();

        assert_eq!(arena.read_int::<i32>("answer").unwrap(), -1);
        assert_eq!(arena.read_int::<i64>("big").unwrap(), -7_000_000_000);
    }

    #[test]
    fn wider_int_into_narrow_block_fails() {
        let config = ArenaConfig {
            split_threshold: 0,
            ..ArenaConfig::default()
        };
        let mut arena = Arena::create(ArenaId(1), 64, config, Arc::new(SystemMemory)).unwrap();
        arena.write_int("n", 1u16).unwrap();

        assert_eq!(
            arena.write_int("n", 1u64),
            Err(ArenaError::CapacityExceeded {
                requested: 8,
                available: 2
            })
        );
        assert!(matches!(
            arena.read_int::<u64>("n"),
            Err(ArenaError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn bytes_round_trip() {
        let mut arena = arena(256);

        arena.write_bytes("blob", &[0, 1, 2, 0, 255]).unwrap();
        arena.write_bytes("empty", &[]).unwrap();

        assert_eq!(arena.read_bytes("blob").unwrap(), vec![0, 1, 2, 0, 255]);
        assert_eq!(arena.read_bytes("empty").unwrap(), Vec::<u8>::new());

        // Shorter rewrites keep the block and update the prefix.
        arena.write_bytes("blob", &[9]).unwrap();
        assert_eq!(arena.read_bytes("blob").unwrap(), vec![9]);
    }

    #[test]
    fn corrupt_length_prefix_is_reported() {
        let mut arena = arena(256);
        arena.write_bytes("blob", &[1, 2, 3]).unwrap();
        arena.write_int("blob", usize::MAX).unwrap();

        assert!(matches!(
            arena.read_bytes("blob"),
            Err(ArenaError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn nul_bytes_are_rejected_in_strings() {
        let mut arena = arena(64);

        assert!(matches!(
            arena.write_string("k", "a\0b"),
            Err(ArenaError::InvalidArgument(_))
        ));
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn write_string_at_respects_block_size() {
        let mut arena = arena(64);
        let a = arena.allocate(64, "a").unwrap();

        arena.write_string_at(a.handle, "via handle").unwrap();
        assert_eq!(arena.read_string("a").unwrap(), "via handle");

        let long = "x".repeat(64);
        assert!(matches!(
            arena.write_string_at(a.handle, &long),
            Err(ArenaError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn int_and_bytes_are_writable_by_handle() {
        let mut arena = arena(256);
        let counter = arena.allocate(4, "counter").unwrap();
        let blob = arena.allocate(12, "blob").unwrap();

        arena.write_int_at(counter.handle, 7u32).unwrap();
        arena.write_bytes_at(blob.handle, &[1, 2, 3]).unwrap();

        assert_eq!(arena.read_int::<u32>("counter").unwrap(), 7);
        assert_eq!(arena.read_bytes("blob").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn handle_writes_respect_block_size() {
        let config = ArenaConfig {
            split_threshold: 0,
            ..ArenaConfig::default()
        };
        let mut arena = Arena::create(ArenaId(1), 64, config, Arc::new(SystemMemory)).unwrap();
        let narrow = arena.allocate(2, "narrow").unwrap();

        assert_eq!(
            arena.write_int_at(narrow.handle, 1u64),
            Err(ArenaError::CapacityExceeded {
                requested: 8,
                available: 2
            })
        );
        assert!(matches!(
            arena.write_bytes_at(narrow.handle, &[1]),
            Err(ArenaError::CapacityExceeded { .. })
        ));

        arena.free(narrow.handle).unwrap();
        assert_eq!(
            arena.write_int_at(narrow.handle, 1u8),
            Err(ArenaError::AlreadyFree(narrow.handle))
        );
    }

    #[test]
    fn first_used_block_wins() {
        let mut arena = arena(4096);
        let first = arena.allocate(16, "dup").unwrap();
        arena.allocate(16, "dup").unwrap();

        assert_eq!(arena.find("dup").unwrap(), first.handle);
    }

    #[test]
    fn truncated_names_resolve_to_their_own_block() {
        let mut arena = arena(4096);
        let long = "configuration.section.very.long.key";

        arena.write_string(long, "value").unwrap();

        assert_eq!(arena.read_string(long).unwrap(), "value");
    }

    #[test]
    fn colliding_truncated_names_fail_loudly() {
        let mut arena = arena(4096);
        arena
            .write_string("configuration.section.very.long.key.one", "1")
            .unwrap();

        let err = arena
            .write_string("configuration.section.very.long.key.two", "2")
            .unwrap_err();

        assert!(matches!(err, ArenaError::AmbiguousName { .. }));
        assert_eq!(arena.used_bytes(), arena.describe().blocks[0].size);
    }
}
