//! Read-only reports on an arena's state, for diagnostics and tests.

use std::{fmt, io::Write};

use crate::block::{ArenaId, Block, BlockHandle, BlockName, BlockState};

/// Something that accepts already formatted lines of text.
pub trait LineSink {
    fn write_line(&mut self, line: &str);
}

impl LineSink for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_owned());
    }
}

/// Writes lines to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&mut self, line: &str) {
        // A closed stdout is not worth failing a diagnostic over.
        let _ = writeln!(std::io::stdout().lock(), "{line}");
    }
}

/// Forwards lines to `tracing` at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn write_line(&mut self, line: &str) {
        tracing::debug!(target: "memarena::describe", "{line}");
    }
}

/// One block as seen by [`crate::Arena::describe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub handle: BlockHandle,
    pub offset: usize,
    pub size: usize,
    /// Bytes the allocation asked for; 0 for Free blocks.
    pub requested: usize,
    pub state: BlockState,
    pub name: BlockName,
}

impl BlockInfo {
    pub(crate) fn new(handle: BlockHandle, block: &Block) -> Self {
        Self {
            handle,
            offset: block.offset,
            size: block.size,
            requested: block.requested,
            state: block.state,
            name: block.name.clone(),
        }
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.as_str().is_empty() {
            "-"
        } else {
            self.name.as_str()
        };

        write!(
            f,
            "{name:<32} offset {:>8} size {:>8} {}",
            self.offset, self.size, self.state
        )?;
        if self.state == BlockState::Used && self.requested != self.size {
            write!(f, " (requested {})", self.requested)?;
        }
        Ok(())
    }
}

/// Counters and blocks of an arena at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaSummary {
    pub arena: ArenaId,
    pub capacity: usize,
    pub used: usize,
    pub free: usize,
    /// Blocks in storage order.
    pub blocks: Vec<BlockInfo>,
}

impl ArenaSummary {
    /// Bytes handed out beyond what allocations asked for.
    pub fn internal_fragmentation(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.state == BlockState::Used)
            .map(|b| b.size - b.requested)
            .sum()
    }

    /// Writes one header line, then one line per block.
    pub fn write_to(&self, sink: &mut dyn LineSink) {
        sink.write_line(&self.header());
        for block in &self.blocks {
            sink.write_line(&format!("  {block}"));
        }
    }

    fn header(&self) -> String {
        format!(
            "arena {}: capacity {}, used {}, free {}, {} blocks",
            self.arena,
            self.capacity,
            self.used,
            self.free,
            self.blocks.len()
        )
    }
}

impl fmt::Display for ArenaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header())?;
        for block in &self.blocks {
            write!(f, "\n  {block}")?;
        }
        Ok(())
    }
}
