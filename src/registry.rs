use std::sync::Arc;

use tracing::debug;

use crate::{
    arena::Arena,
    block::ArenaId,
    config::ArenaConfig,
    error::{ArenaError, Lookup, Result},
    kernel::{MemorySource, SystemMemory},
};

/// Owner of every live arena created through it.
///
/// The registry is an ordinary value: whoever needs bulk teardown keeps one
/// and passes it around. Arenas are kept in creation order, added exactly
/// once when created and removed only by [`PoolRegistry::destroy`] or
/// [`PoolRegistry::clear_all`].
pub struct PoolRegistry {
    arenas: Vec<Arena>,
    next_id: u64,
    source: Arc<dyn MemorySource>,
}

impl PoolRegistry {
    /// A registry whose arenas take their storage from [`SystemMemory`].
    pub fn new() -> Self {
        Self::with_source(Arc::new(SystemMemory))
    }

    /// A registry whose arenas take their storage from `source`.
    pub fn with_source(source: Arc<dyn MemorySource>) -> Self {
        Self {
            arenas: Vec::new(),
            next_id: 1,
            source,
        }
    }

    /// Creates and registers an arena of `capacity` bytes with the default
    /// configuration.
    pub fn create(&mut self, capacity: usize) -> Result<ArenaId> {
        self.create_with(capacity, ArenaConfig::default())
    }

    /// Creates and registers an arena of `capacity` bytes.
    pub fn create_with(&mut self, capacity: usize, config: ArenaConfig) -> Result<ArenaId> {
        let id = ArenaId(self.next_id);
        let arena = Arena::create(id, capacity, config, self.source.clone())?;

        self.next_id += 1;
        self.arenas.push(arena);
        Ok(id)
    }

    pub fn arena(&self, id: ArenaId) -> Result<&Arena> {
        self.arenas
            .iter()
            .find(|a| a.id() == id)
            .ok_or(ArenaError::NotFound(Lookup::Arena(id)))
    }

    pub fn arena_mut(&mut self, id: ArenaId) -> Result<&mut Arena> {
        self.arenas
            .iter_mut()
            .find(|a| a.id() == id)
            .ok_or(ArenaError::NotFound(Lookup::Arena(id)))
    }

    /// Ids of the registered arenas, oldest first.
    pub fn ids(&self) -> impl Iterator<Item = ArenaId> + '_ {
        self.arenas.iter().map(Arena::id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
    }

    /// Unregisters and tears down one arena. See [`Arena::destroy`].
    pub fn destroy(&mut self, id: ArenaId) -> Result<()> {
        let position = self
            .arenas
            .iter()
            .position(|a| a.id() == id)
            .ok_or(ArenaError::NotFound(Lookup::Arena(id)))?;

        self.arenas.remove(position).destroy()
    }

    /// Tears down every registered arena, oldest first, and empties the
    /// registry.
    ///
    /// A corrupt arena does not stop the others from being destroyed. The
    /// errors of the arenas that could not be torn down cleanly are returned;
    /// an empty list means everything was reclaimed.
    pub fn clear_all(&mut self) -> Vec<ArenaError> {
        let count = self.arenas.len();
        let errors: Vec<ArenaError> = self
            .arenas
            .drain(..)
            .filter_map(|arena| arena.destroy().err())
            .collect();

        debug!(arenas = count, failed = errors.len(), "registry cleared");
        errors
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
