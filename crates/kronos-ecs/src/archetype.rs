//! Archetype tables.
//!
//! Entities with exactly the same set of component types share an archetype.
//! Each archetype keeps one densely packed column per component type plus a
//! parallel row-to-entity array:
//!
//! ```text
//! Archetype [Position, Velocity]
//!   Position: [p0, p1, p2]
//!   Velocity: [v0, v1, v2]
//!   entities: [e0, e1, e2]
//! ```
//!
//! Rows are removed by swapping in the last row, so storage never has holes.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;

use crate::bundle::Bundle;
use crate::component::{Column, ColumnStorage, Component, ComponentId, Components};
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// Index of an archetype in the registry's archetype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The archetype of entities with no components. Always present.
    pub const EMPTY: Self = Self(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// The set of component types defining an archetype. Kept sorted so that
/// equality is set equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature(Box<[ComponentId]>);

impl Signature {
    /// Build a signature from ids in any order. Duplicates collapse.
    pub fn new(ids: impl IntoIterator<Item = ComponentId>) -> Self {
        let mut ids: Vec<ComponentId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids.into_boxed_slice())
    }

    pub fn ids(&self) -> &[ComponentId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Position of `id` in sorted order, which is also its column index.
    pub fn position(&self, id: ComponentId) -> Option<usize> {
        self.0.binary_search(&id).ok()
    }

    pub fn contains_all(&self, ids: &[ComponentId]) -> bool {
        ids.iter().all(|&id| self.contains(id))
    }

    /// Set equality against an unsorted id list.
    pub fn matches_exactly(&self, ids: &[ComponentId]) -> bool {
        ids.len() == self.0.len()
            && self.contains_all(ids)
            && self.0.iter().all(|id| ids.contains(id))
    }

    pub fn with(&self, id: ComponentId) -> Self {
        Self::new(self.0.iter().copied().chain(std::iter::once(id)))
    }

    pub fn without(&self, id: ComponentId) -> Self {
        Self(self.0.iter().copied().filter(|&c| c != id).collect())
    }
}

/// Storage bucket for all entities sharing one signature.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    columns: Vec<Box<dyn ColumnStorage>>,
    entities: Vec<Entity>,
    add_edges: HashMap<ComponentId, ArchetypeId>,
    remove_edges: HashMap<ComponentId, ArchetypeId>,
}

impl Archetype {
    fn new(
        id: ArchetypeId,
        signature: Signature,
        components: &Components,
        capacity: usize,
    ) -> Self {
        let columns = signature
            .ids()
            .iter()
            .map(|&cid| components.info(cid).new_column(capacity))
            .collect();
        Self {
            id,
            signature,
            columns,
            entities: Vec::with_capacity(capacity),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of rows (entities) stored.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity handles by row.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.signature.contains(id)
    }

    pub fn column_index(&self, id: ComponentId) -> Option<usize> {
        self.signature.position(id)
    }

    /// Typed slice of one column, or `None` if the archetype lacks `id` or
    /// `T` is not the type registered under it.
    pub fn column<T: Component>(&self, id: ComponentId) -> Option<&[T]> {
        let col = self.column_index(id)?;
        self.columns[col]
            .as_any()
            .downcast_ref::<Column<T>>()
            .map(Column::as_slice)
    }

    pub fn column_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut [T]> {
        let col = self.column_index(id)?;
        self.columns[col]
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .map(Column::as_mut_slice)
    }

    pub(crate) fn typed_column<T: Component>(&self, col: usize) -> &Column<T> {
        match self.columns[col].as_any().downcast_ref::<Column<T>>() {
            Some(column) => column,
            None => panic!(
                "column {col} of archetype {} does not hold {}",
                self.id,
                type_name::<T>()
            ),
        }
    }

    pub(crate) fn typed_column_mut<T: Component>(&mut self, col: usize) -> &mut Column<T> {
        let id = self.id;
        match self.columns[col].as_any_mut().downcast_mut::<Column<T>>() {
            Some(column) => column,
            None => panic!(
                "column {col} of archetype {id} does not hold {}",
                type_name::<T>()
            ),
        }
    }

    /// Push one component value onto the column for `id`.
    pub(crate) fn push_component<T: Component>(&mut self, id: ComponentId, value: T) {
        let Some(col) = self.column_index(id) else {
            panic!("archetype {} has no column for {}", self.id, type_name::<T>());
        };
        self.typed_column_mut::<T>(col).push(value);
    }

    /// Swap-remove `row` from every column. Returns the entity that now
    /// occupies `row`, if the removed row was not the last one.
    pub(crate) fn remove_row(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove_drop(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// One column per signature id, each holding exactly one value per row.
    pub(crate) fn is_dense(&self) -> bool {
        self.columns.len() == self.signature.len()
            && self.columns.iter().all(|c| c.len() == self.entities.len())
    }

    fn reserve(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }

    fn clear(&mut self) {
        self.entities = Vec::new();
        for column in &mut self.columns {
            column.clear();
        }
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("len", &self.entities.len())
            .finish()
    }
}

/// All archetypes of a registry, indexed by [`ArchetypeId`] and by signature.
pub(crate) struct Archetypes {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeId>,
    column_capacity: usize,
}

impl Archetypes {
    pub fn new(components: &Components, column_capacity: usize) -> Self {
        let empty = Archetype::new(
            ArchetypeId::EMPTY,
            Signature::default(),
            components,
            column_capacity,
        );
        let mut by_signature = HashMap::new();
        by_signature.insert(Signature::default(), ArchetypeId::EMPTY);
        Self {
            archetypes: vec![empty],
            by_signature,
            column_capacity,
        }
    }

    /// The archetype with exactly this signature, created on first use.
    pub fn archetype_for(&mut self, signature: Signature, components: &Components) -> ArchetypeId {
        if let Some(&id) = self.by_signature.get(&signature) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        let names: Vec<&str> = signature
            .ids()
            .iter()
            .map(|&cid| components.info(cid).name())
            .collect();
        tracing::debug!("created archetype {} with components {:?}", id, names);
        self.archetypes.push(Archetype::new(
            id,
            signature.clone(),
            components,
            self.column_capacity,
        ));
        self.by_signature.insert(signature, id);
        id
    }

    /// Archetype reached by adding `id` to `from`. Cached as a graph edge.
    pub fn add_target(
        &mut self,
        from: ArchetypeId,
        id: ComponentId,
        components: &Components,
    ) -> ArchetypeId {
        if let Some(&to) = self.archetypes[from.index()].add_edges.get(&id) {
            return to;
        }
        let signature = self.archetypes[from.index()].signature.with(id);
        let to = self.archetype_for(signature, components);
        self.archetypes[from.index()].add_edges.insert(id, to);
        self.archetypes[to.index()].remove_edges.insert(id, from);
        to
    }

    /// Archetype reached by removing `id` from `from`.
    pub fn remove_target(
        &mut self,
        from: ArchetypeId,
        id: ComponentId,
        components: &Components,
    ) -> ArchetypeId {
        if let Some(&to) = self.archetypes[from.index()].remove_edges.get(&id) {
            return to;
        }
        let signature = self.archetypes[from.index()].signature.without(id);
        let to = self.archetype_for(signature, components);
        self.archetypes[from.index()].remove_edges.insert(id, to);
        self.archetypes[to.index()].add_edges.insert(id, from);
        to
    }

    /// Append a row holding `bundle` for `entity`. `ids` lists the bundle's
    /// component ids in declaration order and must equal the signature as a set.
    pub fn insert_row<B: Bundle>(
        &mut self,
        archetype: ArchetypeId,
        entity: Entity,
        bundle: B,
        ids: &[ComponentId],
    ) -> Result<u32> {
        let target = &mut self.archetypes[archetype.index()];
        if !target.signature.matches_exactly(ids) {
            return Err(EcsError::SignatureMismatch { archetype });
        }
        let row = target.entities.len() as u32;
        bundle.write(ids, target);
        target.entities.push(entity);
        debug_assert!(target.is_dense());
        Ok(row)
    }

    /// Archetype reached by removing every id in `ids` from `from`.
    pub fn strip_target(
        &mut self,
        from: ArchetypeId,
        ids: &[ComponentId],
        components: &Components,
    ) -> ArchetypeId {
        let signature = ids
            .iter()
            .fold(self.archetypes[from.index()].signature.clone(), |s, &id| s.without(id));
        self.archetype_for(signature, components)
    }

    /// Append a copy of `row` to the same archetype, owned by `entity`.
    ///
    /// Fails with `NotCloneable` before touching storage if any column type
    /// was registered without a clone hook.
    pub fn clone_row(
        &mut self,
        archetype: ArchetypeId,
        row: u32,
        entity: Entity,
        components: &Components,
    ) -> Result<u32> {
        let target = &mut self.archetypes[archetype.index()];
        let mut hooks = Vec::with_capacity(target.columns.len());
        for &id in target.signature.ids() {
            let info = components.info(id);
            match info.clone_row() {
                Some(hook) => hooks.push(hook),
                None => return Err(EcsError::NotCloneable { component: info.name() }),
            }
        }
        for (column, hook) in target.columns.iter_mut().zip(hooks) {
            hook(column.as_mut(), row as usize);
        }
        let new_row = target.entities.len() as u32;
        target.entities.push(entity);
        debug_assert!(target.is_dense());
        Ok(new_row)
    }

    /// Swap-remove a row, dropping its values.
    pub fn remove_row(&mut self, archetype: ArchetypeId, row: u32) -> Option<Entity> {
        self.archetypes[archetype.index()].remove_row(row as usize)
    }

    /// Move the row `row` of `from` into `to`.
    ///
    /// Values of types present in both archetypes are moved. For each type
    /// only present in `from`, `take` receives the source column and row and
    /// must swap-remove that row. Columns only present in `to` are left one
    /// short; the caller pushes the added values afterwards.
    ///
    /// Returns the new row in `to` and the entity swapped into `row` of `from`.
    pub fn move_row<F>(
        &mut self,
        from: ArchetypeId,
        row: u32,
        to: ArchetypeId,
        mut take: F,
    ) -> (u32, Option<Entity>)
    where
        F: FnMut(ComponentId, &mut dyn ColumnStorage, usize),
    {
        let row = row as usize;
        let (src, dst) = self.pair_mut(from, to);
        for (col, &id) in src.signature.0.iter().enumerate() {
            let column = src.columns[col].as_mut();
            match dst.signature.position(id) {
                Some(dst_col) => column.swap_remove_into(row, dst.columns[dst_col].as_mut()),
                None => {
                    let before = column.len();
                    take(id, &mut *column, row);
                    debug_assert_eq!(column.len() + 1, before, "take must remove the row");
                }
            }
        }
        let entity = src.entities.swap_remove(row);
        let swapped = src.entities.get(row).copied();
        let new_row = dst.entities.len() as u32;
        dst.entities.push(entity);
        (new_row, swapped)
    }

    fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        let (a, b) = (a.index(), b.index());
        assert_ne!(a, b, "cannot move a row within one archetype");
        if a < b {
            let (lo, hi) = self.archetypes.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.archetypes.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    pub fn as_slice(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn as_mut_slice(&mut self) -> &mut [Archetype] {
        &mut self.archetypes
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn reserve_rows(&mut self, archetype: ArchetypeId, additional: usize) {
        self.archetypes[archetype.index()].reserve(additional);
    }

    /// Drop every row and column buffer. Archetype ids stay valid.
    pub fn clear(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.clear();
        }
    }
}
