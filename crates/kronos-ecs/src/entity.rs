use std::fmt;

use crate::archetype::ArchetypeId;
use crate::error::{EcsError, Result};

/// A generational entity handle. Uses compact u32 index + generation for cache performance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Entity {
    /// Create an entity from raw parts (mainly for testing).
    pub fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// The slot index of this entity.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation of this entity (incremented on reuse).
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into a u64: generation in the high half, index in the low half.
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Where a live entity's row currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: u32,
}

impl EntityLocation {
    pub(crate) const VACANT: Self = Self {
        archetype: ArchetypeId::EMPTY,
        row: u32::MAX,
    };
}

/// Allocates and recycles entity slots with generational tracking.
pub(crate) struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_list: Vec<u32>,
    len: usize,
    max_entities: u32,
}

impl EntityAllocator {
    #[cfg(test)]
    pub fn new(max_entities: u32) -> Self {
        Self::with_capacity(0, max_entities)
    }

    pub fn with_capacity(capacity: usize, max_entities: u32) -> Self {
        Self {
            generations: Vec::with_capacity(capacity),
            alive: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
            max_entities,
        }
    }

    /// Allocate a new entity, reusing a freed slot if available.
    ///
    /// # Panics
    /// Panics when every index below `max_entities` is in use. Running out of
    /// index space is a configuration limit, not a recoverable condition.
    pub fn allocate(&mut self) -> Entity {
        if let Some(index) = self.free_list.pop() {
            self.len += 1;
            self.alive[index as usize] = true;
            return Entity {
                index,
                generation: self.generations[index as usize],
            };
        }

        let slots = self.generations.len();
        if slots >= self.max_entities as usize {
            panic!(
                "entity index space exhausted: all {} slots are live",
                self.max_entities
            );
        }
        let index = slots as u32;
        self.len += 1;
        self.generations.push(0);
        self.alive.push(true);
        Entity {
            index,
            generation: 0,
        }
    }

    /// Release a live entity. Its generation is bumped so stale handles stop matching.
    ///
    /// A slot whose generation is already at `u32::MAX` is retired rather
    /// than recycled, so a handle can never alias a later one.
    pub fn free(&mut self, entity: Entity) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        let idx = entity.index as usize;
        self.alive[idx] = false;
        self.len -= 1;
        match self.generations[idx].checked_add(1) {
            Some(next) => {
                self.generations[idx] = next;
                self.free_list.push(entity.index);
            }
            None => tracing::debug!("retiring entity slot {} (generation exhausted)", entity.index),
        }
        Ok(())
    }

    /// Check if an entity is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let idx = entity.index as usize;
        idx < self.alive.len() && self.alive[idx] && self.generations[idx] == entity.generation
    }

    /// The live entity currently occupying `index`, if any.
    #[cfg(test)]
    pub fn live_at(&self, index: u32) -> Option<Entity> {
        let idx = index as usize;
        (idx < self.alive.len() && self.alive[idx]).then(|| Entity {
            index,
            generation: self.generations[idx],
        })
    }

    /// Number of slots ever handed out (live or free).
    #[cfg(test)]
    pub fn slots(&self) -> usize {
        self.generations.len()
    }

    /// Number of currently alive entities.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        self.generations = Vec::new();
        self.alive = Vec::new();
        self.free_list = Vec::new();
        self.len = 0;
    }

    #[cfg(test)]
    fn set_generation(&mut self, index: u32, generation: u32) {
        self.generations[index as usize] = generation;
    }
}
