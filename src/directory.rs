use tracing::trace;

use crate::block::Block;

/// One entry of the descriptor table.
#[derive(Debug)]
struct Slot {
    /// Bumped every time the slot's block is freed or vacated.
    generation: u32,
    block: Option<Block>,
}

/// Where and why a chain walk gave up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Corruption {
    pub slot: usize,
    pub reason: &'static str,
}

/// The chain of blocks covering an arena's storage end to end.
///
/// Descriptors are kept in a dense table and linked by slot index instead of
/// by pointer. Slots freed by coalescing are recycled for later splits.
///
/// ```text
///   head
///    |
///    v
/// +------+   +------+   +------+   +------+
/// | used |-->| free |-->| used |-->| free |--> None
/// +------+   +------+   +------+   +------+
/// |<------------- arena capacity ---------->|
/// ```
///
/// Between operations the chain partitions the storage without gaps or
/// overlaps and never holds two Free blocks next to each other.
#[derive(Debug)]
pub(crate) struct BlockDirectory {
    slots: Vec<Slot>,
    /// Indices of vacant slots available for reuse.
    vacant: Vec<usize>,
    head: Option<usize>,
    len: usize,
}

/// Walks the chain in storage order, yielding `(slot, block)`.
pub(crate) struct Iter<'a> {
    directory: &'a BlockDirectory,
    current: Option<usize>,
    remaining: usize,
}

impl BlockDirectory {
    /// A chain made of a single Free block spanning `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                block: Some(Block::free(0, capacity, None)),
            }],
            vacant: Vec::new(),
            head: Some(0),
            len: 1,
        }
    }

    /// Number of blocks in the chain.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Size of the descriptor table, vacant slots included.
    #[cfg(test)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<&Block> {
        self.slots.get(slot)?.block.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Block> {
        self.slots.get_mut(slot)?.block.as_mut()
    }

    #[inline]
    pub fn generation(&self, slot: usize) -> Option<u32> {
        self.slots.get(slot).map(|s| s.generation)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            directory: self,
            current: self.head,
            remaining: self.len,
        }
    }

    /// Returns the slot of the smallest Free block that can hold `size`
    /// bytes. Ties go to the block that comes first in the chain.
    pub fn best_fit(&self, size: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;

        for (slot, block) in self.iter() {
            if block.is_free()
                && block.size >= size
                && best.is_none_or(|(_, best_size)| block.size < best_size)
            {
                best = Some((slot, block.size));
            }
        }

        best.map(|(slot, _)| slot)
    }

    /// Size of the largest Free block, 0 if there is none.
    pub fn largest_free(&self) -> usize {
        self.iter()
            .filter(|(_, block)| block.is_free())
            .map(|(_, block)| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Cuts the block at `slot` down to `size` bytes when the leftover is
    /// larger than `threshold`. The leftover becomes a new Free block right
    /// after it. Returns the slot of that new block.
    pub fn split(&mut self, slot: usize, size: usize, threshold: usize) -> Option<usize> {
        let block = self.get(slot)?;
        let leftover = block.size.checked_sub(size)?;
        if leftover <= threshold {
            return None;
        }

        let remainder = Block::free(block.offset + size, leftover, block.next);
        let new_slot = self.insert(remainder);

        let block = self.get_mut(slot)?;
        block.size = size;
        block.next = Some(new_slot);

        Some(new_slot)
    }

    /// Merges every run of adjacent Free blocks into its first block.
    /// Returns how many descriptors were removed.
    pub fn coalesce(&mut self) -> usize {
        let mut merged = 0;
        let mut current = self.head;

        while let Some(slot) = current {
            let Some(block) = self.get(slot) else { break };
            let (is_free, next) = (block.is_free(), block.next);

            let absorbed = match next.and_then(|n| self.get(n).map(|b| (n, b))) {
                Some((n, neighbour)) if is_free && neighbour.is_free() => {
                    Some((n, neighbour.size, neighbour.next))
                }
                _ => None,
            };

            match absorbed {
                Some((n, size, after)) => {
                    if let Some(block) = self.get_mut(slot) {
                        block.size += size;
                        block.next = after;
                    }
                    self.vacate(n);
                    trace!(slot, absorbed = n, size, "merged block");
                    merged += 1;
                    // Stay on `slot`: the block after the absorbed one may be Free too.
                }
                None => current = next,
            }
        }

        merged
    }

    /// Follows the chain from its head, checking every link.
    ///
    /// Returns the slots in chain order, or where the chain is broken: a link
    /// out of the table, to a vacant slot, or back to a block already visited.
    /// Descriptors that are occupied but unreachable from the head are
    /// reported as well.
    pub fn walk(&self) -> Result<Vec<usize>, Corruption> {
        let mut visited = vec![false; self.slots.len()];
        let mut order = Vec::with_capacity(self.len);
        let mut current = self.head;

        while let Some(slot) = current {
            self.check_link(slot, &visited)?;
            visited[slot] = true;
            order.push(slot);
            current = self.get(slot).and_then(|b| b.next);
        }

        if let Some(orphan) = self
            .slots
            .iter()
            .enumerate()
            .position(|(i, s)| s.block.is_some() && !visited[i])
        {
            return Err(Corruption {
                slot: orphan,
                reason: "descriptor not reachable from the chain head",
            });
        }

        Ok(order)
    }

    /// Vacates every descriptor in chain order.
    ///
    /// Stops at the first broken link. Descriptors after it stay where they
    /// are. Returns the number of descriptors reclaimed.
    pub fn teardown(&mut self) -> Result<usize, Corruption> {
        let mut visited = vec![false; self.slots.len()];
        let mut reclaimed = 0;
        let mut current = self.head.take();

        while let Some(slot) = current {
            self.check_link(slot, &visited)?;
            visited[slot] = true;
            current = self.get(slot).and_then(|b| b.next);
            self.vacate(slot);
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Invalidates every handle issued for `slot` so far.
    pub fn retire(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.generation = entry.generation.wrapping_add(1);
        }
    }

    fn check_link(&self, slot: usize, visited: &[bool]) -> Result<(), Corruption> {
        let reason = match self.slots.get(slot) {
            None => "link points past the descriptor table",
            Some(_) if visited[slot] => "link points back into the chain",
            Some(s) if s.block.is_none() => "link points at a vacant descriptor",
            Some(_) => return Ok(()),
        };

        Err(Corruption { slot, reason })
    }

    fn insert(&mut self, block: Block) -> usize {
        self.len += 1;

        // Reuse a vacant slot or push a new one.
        match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot].block = Some(block);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    block: Some(block),
                });
                self.slots.len() - 1
            }
        }
    }

    fn vacate(&mut self, slot: usize) {
        let entry = &mut self.slots[slot];
        if entry.block.take().is_some() {
            entry.generation = entry.generation.wrapping_add(1);
            self.vacant.push(slot);
            self.len -= 1;
        }
    }

    /// Points `from` at `to`, bypassing every check.
    #[cfg(test)]
    pub fn relink(&mut self, from: usize, to: Option<usize>) {
        if let Some(block) = self.get_mut(from) {
            block.next = to;
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (usize, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        // `remaining` bounds the walk even if a link loops back.
        if self.remaining == 0 {
            return None;
        }

        let slot = self.current?;
        let block = self.directory.get(slot)?;

        self.current = block.next;
        self.remaining -= 1;

        Some((slot, block))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<'a> IntoIterator for &'a BlockDirectory {
    type Item = (usize, &'a Block);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockState;

    fn sizes(directory: &BlockDirectory) -> Vec<(usize, BlockState)> {
        directory.iter().map(|(_, b)| (b.size, b.state)).collect()
    }

    fn mark_used(directory: &mut BlockDirectory, slot: usize) {
        directory.get_mut(slot).unwrap().state = BlockState::Used;
    }

    #[test]
    fn new_directory_is_one_free_block() {
        let directory = BlockDirectory::new(128);

        assert_eq!(directory.len(), 1);
        assert_eq!(sizes(&directory), vec![(128, BlockState::Free)]);
        assert_eq!(directory.largest_free(), 128);
    }

    #[test]
    fn split_leaves_trailing_free_block() {
        let mut directory = BlockDirectory::new(128);

        let rest = directory.split(0, 16, 8).unwrap();
        let remainder = directory.get(rest).unwrap();

        assert_eq!(remainder.offset, 16);
        assert_eq!(remainder.size, 112);
        assert_eq!(directory.get(0).unwrap().next, Some(rest));
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn small_leftover_is_not_split() {
        let mut directory = BlockDirectory::new(20);

        assert_eq!(directory.split(0, 12, 8), None);
        assert_eq!(directory.get(0).unwrap().size, 20);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn best_fit_prefers_smallest_then_first() {
        // 30 | used 4 | 12 | used 4 | 50 | used 4 | 12
        let mut directory = BlockDirectory::new(116);
        let mut cursor = 0;
        for size in [30, 4, 12, 4, 50, 4] {
            directory.split(cursor, size, 0);
            cursor = directory.get(cursor).unwrap().next.unwrap();
        }
        for (slot, size) in directory.iter().map(|(s, b)| (s, b.size)).collect::<Vec<_>>() {
            if size == 4 {
                mark_used(&mut directory, slot);
            }
        }

        let chosen = directory.best_fit(10).unwrap();
        assert_eq!(directory.get(chosen).unwrap().offset, 34);
        assert_eq!(directory.best_fit(31).map(|s| directory.get(s).unwrap().size), Some(50));
        assert_eq!(directory.best_fit(51), None);
    }

    #[test]
    fn coalesce_merges_runs_and_recycles_slots() {
        let mut directory = BlockDirectory::new(100);
        directory.split(0, 10, 0);
        let second = directory.get(0).unwrap().next.unwrap();
        directory.split(second, 10, 0);
        let third = directory.get(second).unwrap().next.unwrap();
        directory.split(third, 10, 0);
        mark_used(&mut directory, third);

        // free 10 | free 10 | used 10 | free 70
        assert_eq!(directory.coalesce(), 1);
        assert_eq!(
            sizes(&directory),
            vec![(20, BlockState::Free), (10, BlockState::Used), (70, BlockState::Free)]
        );
        assert_eq!(directory.generation(second), Some(1));

        directory.get_mut(third).unwrap().state = BlockState::Free;
        assert_eq!(directory.coalesce(), 2);
        assert_eq!(sizes(&directory), vec![(100, BlockState::Free)]);

        // Vacated slots are handed out again, most recent first.
        let reused = directory.split(0, 40, 0).unwrap();
        assert_eq!(reused, 3);
        assert_eq!(directory.split(reused, 10, 0), Some(third));
        assert_eq!(directory.slot_count(), 4);
    }

    #[test]
    fn retire_bumps_generation_in_place() {
        let mut directory = BlockDirectory::new(64);

        directory.retire(0);

        assert_eq!(directory.generation(0), Some(1));
        assert_eq!(directory.get(0).unwrap().size, 64);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn walk_reports_cycles() {
        let mut directory = BlockDirectory::new(64);
        let rest = directory.split(0, 16, 0).unwrap();
        directory.relink(rest, Some(0));

        let err = directory.walk().unwrap_err();
        assert_eq!(err.slot, 0);
        assert_eq!(err.reason, "link points back into the chain");
        // The iterator still terminates.
        assert_eq!(directory.iter().count(), 2);
    }

    #[test]
    fn walk_reports_dangling_links_and_orphans() {
        let mut directory = BlockDirectory::new(64);
        let rest = directory.split(0, 16, 0).unwrap();

        directory.relink(rest, Some(9));
        assert_eq!(directory.walk().unwrap_err().slot, 9);

        directory.relink(0, None);
        let err = directory.walk().unwrap_err();
        assert_eq!(err.slot, rest);
        assert_eq!(err.reason, "descriptor not reachable from the chain head");
    }

    #[test]
    fn teardown_stops_at_self_reference() {
        let mut directory = BlockDirectory::new(64);
        let rest = directory.split(0, 16, 0).unwrap();
        directory.split(rest, 16, 0).unwrap();
        directory.relink(rest, Some(rest));

        let err = directory.teardown().unwrap_err();
        assert_eq!(err.slot, rest);
        // Slot 0 and `rest` were reclaimed before the cycle was found.
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn teardown_reclaims_everything() {
        let mut directory = BlockDirectory::new(64);
        directory.split(0, 16, 0).unwrap();

        assert_eq!(directory.teardown(), Ok(2));
        assert_eq!(directory.len(), 0);
        assert_eq!(directory.iter().next().map(|(s, _)| s), None);
    }
}
