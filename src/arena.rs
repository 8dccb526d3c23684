use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::{
    block::{Allocation, ArenaId, BlockHandle, BlockName, BlockState},
    config::ArenaConfig,
    describe::{ArenaSummary, BlockInfo},
    directory::{BlockDirectory, Corruption},
    error::{ArenaError, Lookup, Result},
    kernel::MemorySource,
    region::Region,
};

/// A fixed-capacity region of raw storage carved into named blocks.
///
/// Blocks are handed out best-fit: the smallest Free block that can hold the
/// request is chosen and, if what is left over is large enough, split in two.
/// Every [`Arena::free`] merges adjacent Free blocks back together.
///
/// Accounting follows the blocks actually handed out, so between operations
///
/// ```text
/// used == sum of Used block sizes
/// free == sum of Free block sizes
/// used + free == capacity
/// ```
///
/// An arena has no internal locking. It can be moved to another thread, but
/// callers sharing it must serialize access themselves.
#[derive(Debug)]
pub struct Arena {
    id: ArenaId,
    capacity: usize,
    used: usize,
    free: usize,
    config: ArenaConfig,
    pub(crate) blocks: BlockDirectory,
    pub(crate) region: Region,
}

impl Arena {
    /// Acquires `capacity` bytes from `source` and covers them with a single
    /// Free block.
    pub(crate) fn create(
        id: ArenaId,
        capacity: usize,
        config: ArenaConfig,
        source: Arc<dyn MemorySource>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(ArenaError::InvalidArgument("capacity must be non-zero"));
        }
        config.validate()?;

        let region = Region::acquire(capacity, source)?;
        debug!(arena = %id, capacity, "arena created");

        Ok(Self {
            id,
            capacity,
            used: 0,
            free: capacity,
            config,
            blocks: BlockDirectory::new(capacity),
            region,
        })
    }

    #[inline]
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Total bytes owned by the arena.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held by Used blocks.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Bytes held by Free blocks, fragmented or not.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free
    }

    /// Number of blocks in the chain, Free ones included.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Hands out a block of at least `size` bytes named `name`.
    ///
    /// Picks the smallest Free block that fits (the first one on ties). If
    /// more than [`ArenaConfig::split_threshold`] bytes would be left over,
    /// the block is split and the tail stays Free; otherwise the whole block
    /// is handed out. Names longer than [`ArenaConfig::max_name_len`] are
    /// truncated, see [`Allocation::truncated`].
    ///
    /// Fails with [`ArenaError::CapacityExceeded`] when no single Free block
    /// is large enough, even if the free bytes add up to more than `size`.
    pub fn allocate(&mut self, size: usize, name: &str) -> Result<Allocation> {
        if size == 0 {
            return Err(ArenaError::InvalidArgument("size must be non-zero"));
        }
        let name = self.block_name(name)?;

        if size > self.free {
            return Err(self.capacity_exceeded(size));
        }

        let slot = self
            .blocks
            .best_fit(size)
            .ok_or_else(|| self.capacity_exceeded(size))?;

        if let Some(rest) = self.blocks.split(slot, size, self.config.split_threshold) {
            trace!(arena = %self.id, slot, rest, "split block");
        }

        let generation = self.generation(slot)?;
        let block = self
            .blocks
            .get_mut(slot)
            .ok_or_else(|| corrupt(self.id, slot, "best fit chose a vacant descriptor"))?;

        block.state = BlockState::Used;
        block.requested = size;
        block.name = name.clone();
        let (offset, granted) = (block.offset, block.size);

        self.used += granted;
        self.free -= granted;

        debug!(arena = %self.id, %name, offset, size = granted, requested = size, "allocated");
        debug_assert_eq!(self.verify(), Ok(()));

        Ok(Allocation {
            handle: BlockHandle {
                arena: self.id,
                slot,
                generation,
            },
            offset,
            size: granted,
            name,
        })
    }

    /// Gives the block behind `handle` back and merges it with any Free
    /// neighbours.
    ///
    /// Fails with [`ArenaError::NotFound`] for handles this arena never
    /// issued, and with [`ArenaError::AlreadyFree`] if the block has already
    /// been freed. Neither failure touches the counters.
    pub fn free(&mut self, handle: BlockHandle) -> Result<()> {
        let slot = self.resolve(handle)?;
        let block = self
            .blocks
            .get_mut(slot)
            .ok_or(ArenaError::AlreadyFree(handle))?;

        if block.is_free() {
            warn!(arena = %self.id, %handle, "double free");
            return Err(ArenaError::AlreadyFree(handle));
        }

        block.state = BlockState::Free;
        block.requested = 0;
        let size = block.size;
        self.blocks.retire(slot);

        self.used -= size;
        self.free += size;

        let merged = self.blocks.coalesce();
        debug!(arena = %self.id, %handle, size, merged, "freed");
        debug_assert_eq!(self.verify(), Ok(()));

        Ok(())
    }

    /// Describes the live block behind `handle`.
    pub fn block(&self, handle: BlockHandle) -> Result<BlockInfo> {
        let slot = self.resolve(handle)?;
        let block = self.blocks.get(slot).ok_or(ArenaError::AlreadyFree(handle))?;

        Ok(BlockInfo::new(handle, block))
    }

    /// Payload of the Used block behind `handle`.
    pub fn payload(&self, handle: BlockHandle) -> Result<&[u8]> {
        let (offset, size) = self.used_block(handle)?;
        Ok(self.region.bytes(offset, size))
    }

    /// Mutable payload of the Used block behind `handle`.
    pub fn payload_mut(&mut self, handle: BlockHandle) -> Result<&mut [u8]> {
        let (offset, size) = self.used_block(handle)?;
        Ok(self.region.bytes_mut(offset, size))
    }

    /// Re-checks every structural invariant of the arena.
    ///
    /// The chain must be acyclic, reach every descriptor, cover the storage
    /// from offset 0 to `capacity` without gaps or overlaps, never hold two
    /// adjacent Free blocks, and agree with the `used`/`free` counters.
    pub fn verify(&self) -> Result<()> {
        let order = self
            .blocks
            .walk()
            .map_err(|Corruption { slot, reason }| corrupt(self.id, slot, reason))?;

        let mut expected_offset = 0;
        let mut used = 0;
        let mut free = 0;
        let mut previous_free = false;

        for slot in order {
            let block = self
                .blocks
                .get(slot)
                .ok_or_else(|| corrupt(self.id, slot, "walk returned a vacant descriptor"))?;

            if block.offset != expected_offset {
                return Err(corrupt(self.id, slot, "blocks do not partition the storage"));
            }
            if block.size == 0 {
                return Err(corrupt(self.id, slot, "empty block"));
            }
            if block.is_free() && previous_free {
                return Err(corrupt(self.id, slot, "adjacent free blocks were not merged"));
            }

            match block.state {
                BlockState::Used => used += block.size,
                BlockState::Free => free += block.size,
            }
            previous_free = block.is_free();
            expected_offset = block.end();
        }

        if expected_offset != self.capacity {
            return Err(corrupt(self.id, 0, "blocks do not cover the whole capacity"));
        }
        if used != self.used || free != self.free || used + free != self.capacity {
            return Err(corrupt(self.id, 0, "counters disagree with the block chain"));
        }

        Ok(())
    }

    /// A snapshot of the counters and of every block in chain order.
    pub fn describe(&self) -> ArenaSummary {
        let blocks = self
            .blocks
            .iter()
            .map(|(slot, block)| {
                let handle = BlockHandle {
                    arena: self.id,
                    slot,
                    generation: self.blocks.generation(slot).unwrap_or_default(),
                };
                BlockInfo::new(handle, block)
            })
            .collect();

        ArenaSummary {
            arena: self.id,
            capacity: self.capacity,
            used: self.used,
            free: self.free,
            blocks,
        }
    }

    /// Tears the arena down, returning its storage to the memory source.
    ///
    /// The block chain is walked and every descriptor reclaimed. If the walk
    /// finds a cycle or a dangling link it stops there and reports
    /// [`ArenaError::CorruptStructure`]; in that case the storage is leaked
    /// rather than returned, since the chain can no longer vouch for it.
    pub fn destroy(mut self) -> Result<()> {
        match self.blocks.teardown() {
            Ok(reclaimed) => {
                debug!(arena = %self.id, reclaimed, "arena destroyed");
                Ok(())
            }
            Err(Corruption { slot, reason }) => {
                warn!(arena = %self.id, slot, reason, "corrupt block chain, leaking storage");
                self.region.leak();
                Err(corrupt(self.id, slot, reason))
            }
        }
    }

    pub(crate) fn block_name(&self, name: &str) -> Result<BlockName> {
        if name.is_empty() {
            return Err(ArenaError::InvalidArgument("name must not be empty"));
        }

        let name = BlockName::new(name, self.config.max_name_len);
        if name.is_empty() {
            return Err(ArenaError::InvalidArgument("name truncates to nothing"));
        }
        Ok(name)
    }

    /// Slot behind `handle`, checking it was issued by this arena.
    ///
    /// A handle whose generation is out of date belonged to a block that has
    /// been freed since.
    pub(crate) fn resolve(&self, handle: BlockHandle) -> Result<usize> {
        if handle.arena != self.id {
            return Err(ArenaError::NotFound(Lookup::Handle(handle)));
        }

        match self.blocks.generation(handle.slot) {
            None => Err(ArenaError::NotFound(Lookup::Handle(handle))),
            Some(generation) if generation != handle.generation => {
                Err(ArenaError::AlreadyFree(handle))
            }
            Some(_) => Ok(handle.slot),
        }
    }

    /// Offset and size of the Used block behind `handle`.
    pub(crate) fn used_block(&self, handle: BlockHandle) -> Result<(usize, usize)> {
        let slot = self.resolve(handle)?;
        match self.blocks.get(slot) {
            Some(block) if !block.is_free() => Ok((block.offset, block.size)),
            _ => Err(ArenaError::AlreadyFree(handle)),
        }
    }

    pub(crate) fn handle(&self, slot: usize) -> Result<BlockHandle> {
        Ok(BlockHandle {
            arena: self.id,
            slot,
            generation: self.generation(slot)?,
        })
    }

    fn generation(&self, slot: usize) -> Result<u32> {
        self.blocks
            .generation(slot)
            .ok_or_else(|| corrupt(self.id, slot, "slot outside the descriptor table"))
    }

    fn capacity_exceeded(&self, requested: usize) -> ArenaError {
        ArenaError::CapacityExceeded {
            requested,
            available: self.blocks.largest_free(),
        }
    }

    /// Points the descriptor at `from` to `to`, bypassing every check.
    #[cfg(test)]
    pub(crate) fn relink(&mut self, from: usize, to: Option<usize>) {
        self.blocks.relink(from, to);
    }
}

fn corrupt(arena: ArenaId, slot: usize, reason: &'static str) -> ArenaError {
    ArenaError::CorruptStructure {
        arena,
        slot,
        reason,
    }
}
