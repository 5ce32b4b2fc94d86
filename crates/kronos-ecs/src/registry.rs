use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archetype::{Archetype, ArchetypeId, Archetypes};
use crate::bundle::{Bundle, BundleInfo};
use crate::component::{Column, Component, ComponentId, ComponentInfo, Components};
use crate::config::RegistryConfig;
use crate::entity::{Entity, EntityAllocator, EntityLocation};
use crate::error::{ConfigError, EcsError, Result};
use crate::query::{MatchedArchetype, Query, QueryCache, ReadOnlyQuery};
use crate::resource::Resources;
use crate::system::Scheduler;
use crate::view::{View, ViewCursor, ViewMut};

/// Counts reported by [`Registry::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub entities: usize,
    pub archetypes: usize,
    pub components: usize,
}

/// The central ECS container. Owns all entities, components, archetypes and
/// resources, and is the only thing that moves entities between archetypes.
pub struct Registry {
    config: RegistryConfig,
    entities: EntityAllocator,
    locations: Vec<EntityLocation>,
    components: Components,
    archetypes: Archetypes,
    bundles: HashMap<TypeId, BundleInfo>,
    queries: Mutex<HashMap<TypeId, QueryCache>>,
    iteration_locks: Arc<Mutex<Vec<ArchetypeId>>>,
    resources: Resources,
}

impl Registry {
    pub fn new() -> Self {
        Self::build(RegistryConfig::default())
    }

    /// Registry sized and limited by `config`, which is validated first.
    pub fn with_config(config: RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RegistryConfig) -> Self {
        let components = Components::new();
        let archetypes = Archetypes::new(&components, config.column_capacity);
        Self {
            entities: EntityAllocator::with_capacity(config.entity_capacity, config.max_entities),
            locations: Vec::with_capacity(config.entity_capacity),
            components,
            archetypes,
            bundles: HashMap::new(),
            queries: Mutex::new(HashMap::new()),
            iteration_locks: Arc::new(Mutex::new(Vec::new())),
            resources: Resources::new(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ---- Entity management ----

    /// Create an entity holding every component of `bundle`.
    ///
    /// ```ignore
    /// let e = registry.create((Position(0.0, 0.0), Velocity(1.0, 4.0)))?;
    /// ```
    ///
    /// # Panics
    /// Panics if the entity index space configured by `max_entities` is exhausted.
    pub fn create<B: Bundle>(&mut self, bundle: B) -> Result<Entity> {
        let key = self.resolve_bundle::<B>()?;
        let info = &self.bundles[&key];
        let archetype = info.archetype;
        self.check_unlocked(archetype)?;

        let entity = self.entities.allocate();
        let row = match self.archetypes.insert_row(archetype, entity, bundle, &info.ids) {
            Ok(row) => row,
            Err(e) => {
                self.entities.free(entity)?;
                return Err(e);
            }
        };
        self.set_location(entity, EntityLocation { archetype, row });
        Ok(entity)
    }

    /// Reserve room for `additional` more entities created from bundle `B`.
    pub fn reserve<B: Bundle>(&mut self, additional: usize) -> Result<()> {
        let key = self.resolve_bundle::<B>()?;
        self.archetypes
            .reserve_rows(self.bundles[&key].archetype, additional);
        self.locations.reserve(additional);
        Ok(())
    }

    /// Destroy an entity and drop all its components.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        let location = self.location_of(entity)?;
        self.check_unlocked(location.archetype)?;

        let swapped = self.archetypes.remove_row(location.archetype, location.row);
        self.relocate(swapped, location);
        self.locations[entity.index as usize] = EntityLocation::VACANT;
        self.entities.free(entity)
    }

    /// Destroy every entity matching `Q`. Returns how many were destroyed.
    ///
    /// Fails without destroying anything if a matching archetype is locked
    /// by a cursor.
    pub fn destroy_matching<Q: Query>(&mut self) -> Result<usize> {
        let matched = self.matched::<Q>();
        for m in matched.iter() {
            self.check_unlocked(m.archetype)?;
        }
        let mut destroyed = 0;
        for m in matched.iter() {
            // popping the last row never swaps another entity into place
            loop {
                let Some(&entity) = self.archetypes.get(m.archetype).entities().last() else {
                    break;
                };
                self.destroy(entity)?;
                destroyed += 1;
            }
        }
        tracing::debug!("destroyed {} entities matching {}", destroyed, type_name::<Q>());
        Ok(destroyed)
    }

    /// Create an entity holding a copy of every component of `entity`.
    ///
    /// Each component type involved must have been registered with
    /// [`register_cloneable`](Self::register_cloneable); otherwise this fails
    /// with `NotCloneable` and nothing is created.
    pub fn emulate(&mut self, entity: Entity) -> Result<Entity> {
        let location = self.location_of(entity)?;
        self.check_unlocked(location.archetype)?;

        let copy = self.entities.allocate();
        let row = match self
            .archetypes
            .clone_row(location.archetype, location.row, copy, &self.components)
        {
            Ok(row) => row,
            Err(e) => {
                self.entities.free(copy)?;
                return Err(e);
            }
        };
        self.set_location(
            copy,
            EntityLocation {
                archetype: location.archetype,
                row,
            },
        );
        Ok(copy)
    }

    /// Check whether an entity is alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Where a live entity's components are stored.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.location_of(entity).ok()
    }

    // ---- Component management ----

    /// Attach `component` to a live entity, moving it to the archetype that
    /// includes `T`.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        let location = self.location_of(entity)?;
        let id = self.components.register::<T>();
        if self.archetypes.get(location.archetype).contains(id) {
            return Err(EcsError::DuplicateComponent {
                entity: Some(entity),
                component: type_name::<T>(),
            });
        }
        self.check_unlocked(location.archetype)?;
        let target = self
            .archetypes
            .add_target(location.archetype, id, &self.components);
        self.check_unlocked(target)?;

        let (row, swapped) = self.archetypes.move_row(
            location.archetype,
            location.row,
            target,
            |_, column, row| column.swap_remove_drop(row),
        );
        self.archetypes.get_mut(target).push_component(id, component);
        self.relocate(swapped, location);
        self.locations[entity.index as usize] = EntityLocation {
            archetype: target,
            row,
        };
        Ok(())
    }

    /// Detach and return the entity's `T`, moving it to the archetype without `T`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<T> {
        let location = self.location_of(entity)?;
        let id = self
            .components
            .id_of::<T>()
            .filter(|&id| self.archetypes.get(location.archetype).contains(id))
            .ok_or(EcsError::ComponentNotPresent {
                entity,
                component: type_name::<T>(),
            })?;
        self.check_unlocked(location.archetype)?;
        let target = self
            .archetypes
            .remove_target(location.archetype, id, &self.components);
        self.check_unlocked(target)?;

        let mut removed = None;
        let (row, swapped) = self.archetypes.move_row(
            location.archetype,
            location.row,
            target,
            |_, column, row| match column.as_any_mut().downcast_mut::<Column<T>>() {
                Some(column) => removed = Some(column.swap_remove(row)),
                None => column.swap_remove_drop(row),
            },
        );
        self.relocate(swapped, location);
        self.locations[entity.index as usize] = EntityLocation {
            archetype: target,
            row,
        };
        Ok(removed.unwrap_or_else(|| unreachable!("column for {} holds another type", type_name::<T>())))
    }

    /// Strip every component of `B` from each entity that has all of them.
    /// Returns how many entities were changed.
    ///
    /// Fails without changing anything if a source or destination archetype
    /// is locked by a cursor.
    pub fn clear<B: Bundle>(&mut self) -> Result<usize> {
        let key = self.resolve_bundle::<B>()?;
        let ids = self.bundles[&key].ids.clone();
        if ids.is_empty() {
            return Ok(0);
        }
        let sources: Vec<ArchetypeId> = self
            .archetypes
            .as_slice()
            .iter()
            .filter(|a| !a.is_empty() && a.signature().contains_all(&ids))
            .map(Archetype::id)
            .collect();
        let mut moves = Vec::with_capacity(sources.len());
        for from in sources {
            let to = self.archetypes.strip_target(from, &ids, &self.components);
            self.check_unlocked(from)?;
            self.check_unlocked(to)?;
            moves.push((from, to));
        }

        let mut cleared = 0;
        for (from, to) in moves {
            loop {
                let Some(&entity) = self.archetypes.get(from).entities().last() else {
                    break;
                };
                let last = self.archetypes.get(from).len() as u32 - 1;
                let (row, _) = self.archetypes.move_row(from, last, to, |_, column, row| {
                    column.swap_remove_drop(row)
                });
                self.locations[entity.index as usize] = EntityLocation { archetype: to, row };
                cleared += 1;
            }
        }
        tracing::debug!("cleared {} from {} entities", type_name::<B>(), cleared);
        Ok(cleared)
    }

    /// Register `T` so that entities holding it can be copied by
    /// [`emulate`](Self::emulate).
    pub fn register_cloneable<T: Component + Clone>(&mut self) -> ComponentId {
        self.components.register_cloneable::<T>()
    }

    /// Overwrite the entity's `T` in place and return the old value. Not a
    /// structural change.
    pub fn replace<T: Component>(&mut self, entity: Entity, component: T) -> Result<T> {
        self.get_mut::<T>(entity)
            .map(|slot| std::mem::replace(slot, component))
    }

    /// Check whether a live entity has a `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        match (self.location_of(entity), self.components.id_of::<T>()) {
            (Ok(location), Some(id)) => self.archetypes.get(location.archetype).contains(id),
            _ => false,
        }
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Result<&T> {
        let location = self.location_of(entity)?;
        self.components
            .id_of::<T>()
            .and_then(|id| self.archetypes.get(location.archetype).column::<T>(id))
            .map(|column| &column[location.row as usize])
            .ok_or(EcsError::ComponentNotPresent {
                entity,
                component: type_name::<T>(),
            })
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T> {
        let location = self.location_of(entity)?;
        let Some(id) = self.components.id_of::<T>() else {
            return Err(EcsError::ComponentNotPresent {
                entity,
                component: type_name::<T>(),
            });
        };
        self.archetypes
            .get_mut(location.archetype)
            .column_mut::<T>(id)
            .map(|column| &mut column[location.row as usize])
            .ok_or(EcsError::ComponentNotPresent {
                entity,
                component: type_name::<T>(),
            })
    }

    // ---- Queries ----

    /// Iterate entities having every component in `Q`.
    ///
    /// # Example
    /// ```ignore
    /// for (entity, (pos, vel)) in registry.view::<(&Position, &Velocity)>() {
    ///     // ...
    /// }
    /// ```
    ///
    /// # Panics
    /// Panics if `Q` names the same component type twice.
    pub fn view<Q: ReadOnlyQuery>(&self) -> View<'_, Q> {
        let matched = self.matched::<Q>();
        View::new(self.archetypes.as_slice(), &self.components, matched)
    }

    /// Like [`view`](Self::view), allowing `&mut` components.
    pub fn view_mut<Q: Query>(&mut self) -> ViewMut<'_, Q> {
        let matched = self.matched::<Q>();
        ViewMut::new(self.archetypes.as_mut_slice(), &self.components, matched)
    }

    /// Step through `Q` without borrowing the registry between items. The
    /// archetype being produced is locked against structural changes until
    /// the cursor leaves it.
    pub fn cursor<Q: Query>(&self) -> ViewCursor<Q> {
        ViewCursor::new(self.matched::<Q>(), Arc::clone(&self.iteration_locks))
    }

    fn matched<Q: Query>(&self) -> Arc<[MatchedArchetype]> {
        let mut queries = self.queries.lock();
        let cache = queries
            .entry(TypeId::of::<Q::Fetch>())
            .or_insert_with(QueryCache::new::<Q>);
        cache.refresh::<Q>(&self.components, self.archetypes.as_slice());
        Arc::clone(cache.matched())
    }

    // ---- Storage inspection ----

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.as_slice().get(id.index())
    }

    pub fn archetypes(&self) -> &[Archetype] {
        self.archetypes.as_slice()
    }

    pub(crate) fn archetypes_mut(&mut self) -> &mut [Archetype] {
        self.archetypes.as_mut_slice()
    }

    /// Metadata of every component type registered so far.
    pub fn components(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.components.iter()
    }

    pub(crate) fn iteration_locks(&self) -> &Arc<Mutex<Vec<ArchetypeId>>> {
        &self.iteration_locks
    }

    // ---- Resources ----

    /// Insert a singleton resource, returning the previous one of that type.
    pub fn insert_resource<T: 'static + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.resources.insert(value)
    }

    pub fn resource<T: 'static + Send + Sync>(&self) -> Option<&T> {
        self.resources.get::<T>()
    }

    pub fn resource_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut T> {
        self.resources.get_mut::<T>()
    }

    pub fn remove_resource<T: 'static + Send + Sync>(&mut self) -> Option<T> {
        self.resources.remove::<T>()
    }

    pub fn has_resource<T: 'static + Send + Sync>(&self) -> bool {
        self.resources.contains::<T>()
    }

    // ---- Scheduling and teardown ----

    /// A scheduler bound to this registry for as long as it lives.
    pub fn scheduler(&mut self) -> Scheduler<'_> {
        Scheduler::new(self)
    }

    /// Release all storage. Taking `self` by value ends every outstanding
    /// borrow, so no component reference or view can outlive this call.
    pub fn close(mut self) -> RegistryStats {
        let stats = RegistryStats {
            entities: self.entities.len(),
            archetypes: self.archetypes.len(),
            components: self.components.len(),
        };
        self.archetypes.clear();
        self.entities.clear();
        self.locations = Vec::new();
        self.queries.lock().clear();
        self.bundles.clear();
        self.resources.clear();
        tracing::info!(
            "registry closed: released {} entities across {} archetypes ({} component types)",
            stats.entities,
            stats.archetypes,
            stats.components
        );
        stats
    }

    // ---- Internals ----

    /// Cache `B`'s layout on first use and return its key.
    fn resolve_bundle<B: Bundle>(&mut self) -> Result<TypeId> {
        let key = TypeId::of::<B>();
        if !self.bundles.contains_key(&key) {
            let info = BundleInfo::new::<B>(&mut self.components, &mut self.archetypes)?;
            self.bundles.insert(key, info);
        }
        Ok(key)
    }

    fn location_of(&self, entity: Entity) -> Result<EntityLocation> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::InvalidHandle(entity));
        }
        Ok(self.locations[entity.index as usize])
    }

    fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let idx = entity.index as usize;
        if idx >= self.locations.len() {
            self.locations.resize(idx + 1, EntityLocation::VACANT);
        }
        self.locations[idx] = location;
    }

    /// The entity swapped into `vacated` by a swap-remove now lives there.
    fn relocate(&mut self, swapped: Option<Entity>, vacated: EntityLocation) {
        if let Some(moved) = swapped {
            self.locations[moved.index as usize] = vacated;
        }
    }

    fn check_unlocked(&self, archetype: ArchetypeId) -> Result<()> {
        if self.iteration_locks.lock().contains(&archetype) {
            return Err(EcsError::MutationDuringIteration { archetype });
        }
        Ok(())
    }

    /// Assert directory and storage agree: every archetype has one dense
    /// column per signature id, each row maps back to its directory entry,
    /// every occupied directory entry points at a row holding that entity,
    /// and the row count equals the live count.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut rows = 0;
        for archetype in self.archetypes.as_slice() {
            assert!(archetype.is_dense(), "archetype {} has ragged columns", archetype.id());
            for (row, &entity) in archetype.entities().iter().enumerate() {
                assert!(self.is_alive(entity), "dead entity {entity} stored in {}", archetype.id());
                assert_eq!(
                    self.locations[entity.index as usize],
                    EntityLocation {
                        archetype: archetype.id(),
                        row: row as u32,
                    }
                );
            }
            rows += archetype.len();
        }
        for (index, location) in self.locations.iter().enumerate() {
            if *location == EntityLocation::VACANT {
                continue;
            }
            let archetype = self.archetypes.get(location.archetype);
            let entity = archetype.entities()[location.row as usize];
            assert_eq!(entity.index as usize, index, "directory entry {index} points at {entity}");
            assert!(self.is_alive(entity));
        }
        assert_eq!(rows, self.entity_count());
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
