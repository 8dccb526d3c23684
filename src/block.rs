use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    mem,
};

/// Size of one block descriptor. Used as the default split threshold: a
/// leftover smaller than this is not worth a descriptor of its own.
pub const BLOCK_DESCRIPTOR_SIZE: usize = mem::size_of::<Block>();

/// Identifier of an arena, unique within the registry that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(pub(crate) u64);

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a block inside an arena.
///
/// Handles name a descriptor slot, not a block name: several blocks may share
/// a name, but a handle always refers to exactly one of them. The generation
/// changes whenever the block is freed or its slot vacated, so a stale handle
/// never aliases the block that later reuses the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct BlockHandle {
    pub(crate) arena: ArenaId,
    pub(crate) slot: usize,
    pub(crate) generation: u32,
}

impl BlockHandle {
    /// Arena this handle belongs to.
    pub fn arena(&self) -> ArenaId {
        self.arena
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.arena, self.slot, self.generation)
    }
}

/// Allocation state of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Used,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Used => f.write_str("used"),
        }
    }
}

/// Bounded block name.
///
/// Names longer than the arena's maximum are cut on a character boundary. A
/// cut name remembers a fingerprint of the full name so two different long
/// names that share a prefix can be told apart instead of silently aliasing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockName {
    key: String,
    full: Option<u64>,
}

/// Result of comparing a stored name against a lookup name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NameMatch {
    Same,
    Different,
    /// Same key, but at least one side was cut and the full names differ.
    Ambiguous,
}

impl BlockName {
    pub(crate) fn new(name: &str, max_len: usize) -> Self {
        if name.len() <= max_len {
            return Self {
                key: name.to_owned(),
                full: None,
            };
        }

        let mut end = max_len;
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);

        Self {
            key: name[..end].to_owned(),
            full: Some(hasher.finish()),
        }
    }

    /// The stored (possibly truncated) name.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Whether the name was cut to fit.
    pub fn truncated(&self) -> bool {
        self.full.is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub(crate) fn compare(&self, other: &BlockName) -> NameMatch {
        if self.key != other.key {
            NameMatch::Different
        } else if self.full == other.full {
            NameMatch::Same
        } else {
            NameMatch::Ambiguous
        }
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Descriptor of one block in an arena's chain.
///
/// Descriptors live in the directory's table, not inside the arena storage,
/// so `size` is entirely usable payload.
///
/// ```text
///   slot 0             slot 3             slot 1
/// +----------------+ +----------------+ +----------------+
/// | offset 0       | | offset 16      | | offset 40      |
/// | size 16, used  |-| size 24, free  |-| size 60, used  |-> None
/// +----------------+ +----------------+ +----------------+
/// ```
#[derive(Clone, Debug)]
pub(crate) struct Block {
    /// Start of the payload inside the arena storage.
    pub offset: usize,
    /// Payload bytes.
    pub size: usize,
    /// Bytes asked for by the allocation that produced this block (0 if Free).
    pub requested: usize,
    pub state: BlockState,
    pub name: BlockName,
    /// Slot of the following block in storage order.
    pub next: Option<usize>,
}

impl Block {
    pub fn free(offset: usize, size: usize, next: Option<usize>) -> Self {
        Self {
            offset,
            size,
            requested: 0,
            state: BlockState::Free,
            name: BlockName::default(),
            next,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Successful allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub handle: BlockHandle,
    /// Start of the payload inside the arena storage.
    pub offset: usize,
    /// Payload bytes handed out; may exceed the request when the block was not split.
    pub size: usize,
    /// Name as stored.
    pub name: BlockName,
}

impl Allocation {
    /// Whether the supplied name had to be cut to fit.
    pub fn truncated(&self) -> bool {
        self.name.truncated()
    }
}
