//! Borrowing views over the entities matching a [`Query`].
//!
//! A view holds the registry borrow for its whole lifetime, so the borrow
//! checker rules out structural changes while it is alive. [`ViewCursor`]
//! steps without holding a borrow between items and instead locks the
//! archetype it is producing; see [`Registry::cursor`](crate::Registry::cursor).

use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, Components};
use crate::entity::Entity;
use crate::query::{MatchedArchetype, Query, ReadOnlyQuery};
use crate::registry::Registry;

/// Shared-borrow view over a read-only query.
pub struct View<'r, Q: ReadOnlyQuery> {
    archetypes: &'r [Archetype],
    components: &'r Components,
    matched: Arc<[MatchedArchetype]>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'r, Q: ReadOnlyQuery> View<'r, Q> {
    pub(crate) fn new(
        archetypes: &'r [Archetype],
        components: &'r Components,
        matched: Arc<[MatchedArchetype]>,
    ) -> Self {
        Self {
            archetypes,
            components,
            matched,
            _marker: PhantomData,
        }
    }

    /// Only yield entities that also have a `T`, without borrowing it.
    pub fn with<T: Component>(mut self) -> Self {
        self.matched = include::<T>(&self.matched, self.archetypes, self.components);
        self
    }

    /// Skip entities that also have a `T`.
    pub fn without<T: Component>(mut self) -> Self {
        self.matched = exclude::<T>(&self.matched, self.archetypes, self.components);
        self
    }

    pub fn iter(&self) -> Iter<'_, Q> {
        // SAFETY: the pointer is only read through, as `Q` is read-only.
        unsafe { Iter::new(self.archetypes.as_ptr() as *mut Archetype, self.matched.clone()) }
    }

    /// Number of entities the view yields.
    pub fn len(&self) -> usize {
        count(&self.matched, self.archetypes)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'r, Q: ReadOnlyQuery> IntoIterator for View<'r, Q> {
    type Item = (Entity, Q::Item<'r>);
    type IntoIter = Iter<'r, Q>;

    fn into_iter(self) -> Self::IntoIter {
        // SAFETY: as in `iter`, with the full registry borrow.
        unsafe { Iter::new(self.archetypes.as_ptr() as *mut Archetype, self.matched) }
    }
}

impl<'v, 'r, Q: ReadOnlyQuery> IntoIterator for &'v View<'r, Q> {
    type Item = (Entity, Q::Item<'v>);
    type IntoIter = Iter<'v, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Exclusive-borrow view; items may contain `&mut` components.
pub struct ViewMut<'r, Q: Query> {
    archetypes: &'r mut [Archetype],
    components: &'r Components,
    matched: Arc<[MatchedArchetype]>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'r, Q: Query> ViewMut<'r, Q> {
    pub(crate) fn new(
        archetypes: &'r mut [Archetype],
        components: &'r Components,
        matched: Arc<[MatchedArchetype]>,
    ) -> Self {
        Self {
            archetypes,
            components,
            matched,
            _marker: PhantomData,
        }
    }

    /// Only yield entities that also have a `T`, without borrowing it.
    pub fn with<T: Component>(mut self) -> Self {
        self.matched = include::<T>(&self.matched, self.archetypes, self.components);
        self
    }

    /// Skip entities that also have a `T`.
    pub fn without<T: Component>(mut self) -> Self {
        self.matched = exclude::<T>(&self.matched, self.archetypes, self.components);
        self
    }

    pub fn iter_mut(&mut self) -> Iter<'_, Q> {
        // SAFETY: derived from the exclusive borrow held by `self`.
        unsafe { Iter::new(self.archetypes.as_mut_ptr(), self.matched.clone()) }
    }

    pub fn len(&self) -> usize {
        count(&self.matched, self.archetypes)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'r, Q: Query> IntoIterator for ViewMut<'r, Q> {
    type Item = (Entity, Q::Item<'r>);
    type IntoIter = Iter<'r, Q>;

    fn into_iter(mut self) -> Self::IntoIter {
        // SAFETY: consumes the exclusive borrow.
        unsafe { Iter::new(self.archetypes.as_mut_ptr(), self.matched) }
    }
}

impl<'v, 'r, Q: Query> IntoIterator for &'v mut ViewMut<'r, Q> {
    type Item = (Entity, Q::Item<'v>);
    type IntoIter = Iter<'v, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

fn include<T: Component>(
    matched: &[MatchedArchetype],
    archetypes: &[Archetype],
    components: &Components,
) -> Arc<[MatchedArchetype]> {
    match components.id_of::<T>() {
        Some(id) => matched
            .iter()
            .filter(|m| archetypes[m.archetype.index()].contains(id))
            .cloned()
            .collect(),
        None => Vec::new().into(),
    }
}

fn exclude<T: Component>(
    matched: &[MatchedArchetype],
    archetypes: &[Archetype],
    components: &Components,
) -> Arc<[MatchedArchetype]> {
    match components.id_of::<T>() {
        Some(id) => matched
            .iter()
            .filter(|m| !archetypes[m.archetype.index()].contains(id))
            .cloned()
            .collect(),
        // never registered, so no archetype has it
        None => matched.iter().cloned().collect(),
    }
}

fn count(matched: &[MatchedArchetype], archetypes: &[Archetype]) -> usize {
    matched
        .iter()
        .map(|m| archetypes[m.archetype.index()].len())
        .sum()
}

struct Batch<F> {
    fetch: F,
    entities: *const Entity,
    row: usize,
    len: usize,
}

/// Iterator over `(Entity, Q::Item)`, archetype by archetype, rows in order.
pub struct Iter<'v, Q: Query> {
    archetypes: *mut Archetype,
    matched: Arc<[MatchedArchetype]>,
    next_archetype: usize,
    batch: Option<Batch<Q::Fetch>>,
    _marker: PhantomData<(&'v (), fn() -> Q)>,
}

impl<'v, Q: Query> Iter<'v, Q> {
    /// # Safety
    /// `archetypes` must point at the table every `matched` id indexes, stay
    /// valid for `'v`, and permit writes if `Q` is not read-only.
    unsafe fn new(archetypes: *mut Archetype, matched: Arc<[MatchedArchetype]>) -> Self {
        Self {
            archetypes,
            matched,
            next_archetype: 0,
            batch: None,
            _marker: PhantomData,
        }
    }

    fn remaining(&self) -> usize {
        let current = self.batch.as_ref().map_or(0, |b| b.len - b.row);
        let rest: usize = self.matched[self.next_archetype..]
            .iter()
            // SAFETY: ids in `matched` index the table behind `archetypes`.
            .map(|m| unsafe { (*self.archetypes.add(m.archetype.index())).len() })
            .sum();
        current + rest
    }
}

impl<'v, Q: Query> Iterator for Iter<'v, Q> {
    type Item = (Entity, Q::Item<'v>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = &mut self.batch {
                if batch.row < batch.len {
                    let row = batch.row;
                    batch.row += 1;
                    // SAFETY: row < len and each row is yielded once, so
                    // mutable items never alias.
                    return unsafe { Some((*batch.entities.add(row), Q::item(batch.fetch, row))) };
                }
                self.batch = None;
            }

            let matched = self.matched.get(self.next_archetype)?;
            self.next_archetype += 1;
            // SAFETY: see `Iter::new`.
            unsafe {
                let archetype = self.archetypes.add(matched.archetype.index());
                let len = (*archetype).len();
                if len == 0 {
                    continue;
                }
                self.batch = Some(Batch {
                    fetch: Q::fetch(archetype, &matched.columns),
                    entities: (*archetype).entities().as_ptr(),
                    row: 0,
                    len,
                });
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl<Q: Query> ExactSizeIterator for Iter<'_, Q> {}

impl<Q: Query> FusedIterator for Iter<'_, Q> {}

/// Steps through a query one item at a time without holding the registry
/// borrow between steps.
///
/// While it is producing rows of an archetype, that archetype is locked:
/// structural changes that would move rows in or out of it fail with
/// [`EcsError::MutationDuringIteration`](crate::EcsError::MutationDuringIteration).
/// The lock is released when the cursor moves on, finishes, or is dropped.
pub struct ViewCursor<Q: Query> {
    matched: Arc<[MatchedArchetype]>,
    next_archetype: usize,
    row: usize,
    current: Option<ArchetypeId>,
    locks: Arc<Mutex<Vec<ArchetypeId>>>,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: Query> ViewCursor<Q> {
    pub(crate) fn new(matched: Arc<[MatchedArchetype]>, locks: Arc<Mutex<Vec<ArchetypeId>>>) -> Self {
        Self {
            matched,
            next_archetype: 0,
            row: 0,
            current: None,
            locks,
            _marker: PhantomData,
        }
    }

    /// Next item, read-only.
    pub fn next<'r>(&mut self, registry: &'r Registry) -> Option<(Entity, Q::Item<'r>)>
    where
        Q: ReadOnlyQuery,
    {
        self.check_registry(registry);
        let (index, row) = self.advance(registry.archetypes())?;
        let matched = &self.matched[index];
        let archetype = &registry.archetypes()[matched.archetype.index()];
        // SAFETY: read-only query over a shared borrow; row is in bounds.
        unsafe {
            let fetch = Q::fetch(archetype as *const Archetype as *mut Archetype, &matched.columns);
            Some((archetype.entities()[row], Q::item(fetch, row)))
        }
    }

    /// Next item, with mutable access to the components.
    pub fn next_mut<'r>(&mut self, registry: &'r mut Registry) -> Option<(Entity, Q::Item<'r>)> {
        self.check_registry(registry);
        let (index, row) = self.advance(registry.archetypes())?;
        let matched = &self.matched[index];
        let archetype = &mut registry.archetypes_mut()[matched.archetype.index()];
        let entity = archetype.entities()[row];
        // SAFETY: exclusive borrow of the registry for 'r; row is in bounds.
        unsafe {
            let fetch = Q::fetch(archetype as *mut Archetype, &matched.columns);
            Some((entity, Q::item(fetch, row)))
        }
    }

    /// The archetype currently locked by this cursor.
    pub fn locked(&self) -> Option<ArchetypeId> {
        self.current
    }

    fn check_registry(&self, registry: &Registry) {
        assert!(
            Arc::ptr_eq(&self.locks, registry.iteration_locks()),
            "cursor used with a registry other than the one that created it"
        );
    }

    /// Position of the next row as (index into `matched`, row).
    fn advance(&mut self, archetypes: &[Archetype]) -> Option<(usize, usize)> {
        loop {
            if let Some(current) = self.current {
                if self.row < archetypes[current.index()].len() {
                    let row = self.row;
                    self.row += 1;
                    return Some((self.next_archetype - 1, row));
                }
                self.release();
            }

            let matched = self.matched.get(self.next_archetype)?;
            self.next_archetype += 1;
            self.row = 0;
            if archetypes[matched.archetype.index()].is_empty() {
                continue;
            }
            self.locks.lock().push(matched.archetype);
            self.current = Some(matched.archetype);
        }
    }

    fn release(&mut self) {
        if let Some(archetype) = self.current.take() {
            let mut locks = self.locks.lock();
            if let Some(pos) = locks.iter().position(|&a| a == archetype) {
                locks.swap_remove(pos);
            }
        }
    }
}

impl<Q: Query> Drop for ViewCursor<Q> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EcsError;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(i32, i32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(i32, i32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Hidden;

    #[test]
    fn view_over_mixed_signatures() {
        let mut registry = Registry::new();
        let a = registry.create((Position(1, 1),)).unwrap();
        let b = registry.create((Position(2, 2), Velocity(0, 1))).unwrap();
        let c = registry.create((Health(3), Position(3, 3))).unwrap();

        let seen: Vec<(Entity, Position)> = registry
            .view::<&Position>()
            .into_iter()
            .map(|(e, p)| (e, *p))
            .collect();
        assert_eq!(
            seen,
            vec![(a, Position(1, 1)), (b, Position(2, 2)), (c, Position(3, 3))]
        );

        registry.destroy(b).unwrap();
        let seen: Vec<(Entity, Position)> = registry
            .view::<&Position>()
            .into_iter()
            .map(|(e, p)| (e, *p))
            .collect();
        assert_eq!(seen, vec![(a, Position(1, 1)), (c, Position(3, 3))]);
    }

    #[test]
    fn query_completeness_ignores_creation_order() {
        let mut registry = Registry::new();
        // warm the cache before any matching archetype exists
        assert!(registry.view::<(&Position, &Velocity)>().is_empty());

        let mut expected = Vec::new();
        for i in 0..30 {
            let e = match i % 4 {
                0 => registry.create((Position(i, 0),)).unwrap(),
                1 => {
                    let e = registry.create((Velocity(i, 0), Position(i, 0))).unwrap();
                    expected.push(e);
                    e
                }
                2 => {
                    let e = registry.create((Position(i, 0), Health(1), Velocity(0, 0))).unwrap();
                    expected.push(e);
                    e
                }
                _ => registry.create((Velocity(i, 0),)).unwrap(),
            };
            if i % 9 == 0 {
                registry.add_component(e, Hidden).unwrap();
            }
        }
        // an entity that gains the missing type later must show up too
        let late = registry.create((Velocity(7, 7),)).unwrap();
        registry.add_component(late, Position(7, 7)).unwrap();
        expected.push(late);

        let view = registry.view::<(&Position, &Velocity)>();
        let mut got: Vec<Entity> = view.iter().map(|(e, _)| e).collect();
        assert_eq!(view.len(), expected.len());
        got.sort();
        expected.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn items_follow_requested_order() {
        let mut registry = Registry::new();
        let e = registry.create((Position(1, 2), Velocity(3, 4))).unwrap();
        for (entity, (vel, pos)) in registry.view::<(&Velocity, &Position)>() {
            assert_eq!(entity, e);
            assert_eq!(vel, &Velocity(3, 4));
            assert_eq!(pos, &Position(1, 2));
        }
    }

    #[test]
    fn iteration_is_archetype_major() {
        let mut registry = Registry::new();
        let a1 = registry.create((Position(0, 0),)).unwrap();
        let b1 = registry.create((Position(0, 0), Health(0))).unwrap();
        let a2 = registry.create((Position(0, 0),)).unwrap();
        let b2 = registry.create((Position(0, 0), Health(0))).unwrap();

        let order: Vec<Entity> = registry.view::<&Position>().iter().map(|(e, _)| e).collect();
        assert_eq!(order, vec![a1, a2, b1, b2]);
    }

    #[test]
    fn view_mut_writes_in_place() {
        let mut registry = Registry::new();
        let e = registry.create((Position(0, 0), Velocity(1, 4))).unwrap();
        let mut view = registry.view_mut::<(&mut Position, &Velocity)>();
        assert_eq!(view.len(), 1);
        for (_, (pos, vel)) in view.iter_mut() {
            pos.0 += vel.0;
            pos.1 += vel.1;
        }
        for (_, (pos, vel)) in &mut view {
            pos.0 += vel.0;
            pos.1 += vel.1;
        }
        assert_eq!(registry.get::<Position>(e).unwrap(), &Position(2, 8));
    }

    #[test]
    fn with_requires_without_borrowing() {
        let mut registry = Registry::new();
        registry.create((Position(0, 0),)).unwrap();
        let marked = registry.create((Position(1, 1), Hidden)).unwrap();
        let both = registry.create((Position(2, 2), Hidden, Health(1))).unwrap();

        let view = registry.view::<&Position>().with::<Hidden>();
        let entities: Vec<Entity> = view.iter().map(|(e, _)| e).collect();
        assert_eq!(entities, vec![marked, both]);
        assert_eq!(
            registry.view::<&Position>().with::<Hidden>().without::<Health>().len(),
            1
        );

        for (_, pos) in registry.view_mut::<&mut Position>().with::<Health>() {
            pos.0 = 20;
        }
        assert_eq!(registry.get::<Position>(both).unwrap(), &Position(20, 2));
        assert_eq!(registry.get::<Position>(marked).unwrap(), &Position(1, 1));

        // requiring a type nobody has empties the view
        assert!(registry.view::<&Position>().with::<Velocity>().is_empty());
    }

    #[test]
    fn without_excludes_archetypes() {
        let mut registry = Registry::new();
        let shown = registry.create((Position(0, 0),)).unwrap();
        registry.create((Position(0, 0), Hidden)).unwrap();

        let view = registry.view::<&Position>().without::<Hidden>();
        let entities: Vec<Entity> = view.iter().map(|(e, _)| e).collect();
        assert_eq!(entities, vec![shown]);

        // excluding a type nobody has changes nothing
        assert_eq!(registry.view::<&Position>().without::<Health>().len(), 2);
        assert_eq!(registry.view_mut::<&mut Position>().without::<Hidden>().len(), 1);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let mut registry = Registry::new();
        registry.create((Health(1),)).unwrap();
        let view = registry.view::<(&Position, &Health)>();
        assert!(view.is_empty());
        assert_eq!(view.iter().count(), 0);
    }

    #[test]
    fn iterator_reports_exact_size() {
        let mut registry = Registry::new();
        for i in 0..5 {
            registry.create((Position(i, i),)).unwrap();
        }
        registry.create((Position(9, 9), Health(1))).unwrap();
        let view = registry.view::<&Position>();
        let mut iter = view.iter();
        assert_eq!(iter.len(), 6);
        iter.next();
        iter.next();
        assert_eq!(iter.len(), 4);
    }

    #[test]
    fn cursor_locks_the_archetype_it_produces() {
        let mut registry = Registry::new();
        let a = registry.create((Position(0, 0), Velocity(1, 1))).unwrap();
        let b = registry.create((Position(5, 5), Velocity(1, 1))).unwrap();
        let other = registry.create((Health(1),)).unwrap();
        let tagged = registry
            .create((Position(7, 7), Velocity(0, 0), Health(3)))
            .unwrap();

        let mut cursor = registry.cursor::<(&mut Position, &Velocity)>();
        let (first, (pos, vel)) = cursor.next_mut(&mut registry).unwrap();
        assert_eq!(first, a);
        pos.0 += vel.0;
        let archetype = registry.location(a).unwrap().archetype;
        assert_eq!(cursor.locked(), Some(archetype));

        assert_eq!(
            registry.destroy(b),
            Err(EcsError::MutationDuringIteration { archetype })
        );
        assert_eq!(
            registry.add_component(a, Health(0)),
            Err(EcsError::MutationDuringIteration { archetype })
        );
        assert_eq!(
            registry.create((Velocity(0, 0), Position(0, 0))).err(),
            Some(EcsError::MutationDuringIteration { archetype })
        );
        // moving a row into the locked archetype is rejected as well
        let lone = registry.create((Position(9, 9),)).unwrap();
        assert_eq!(
            registry.add_component(lone, Velocity(0, 0)),
            Err(EcsError::MutationDuringIteration { archetype })
        );
        // removing from the locked archetype moves a row out of it
        assert_eq!(
            registry.remove_component::<Velocity>(b),
            Err(EcsError::MutationDuringIteration { archetype })
        );
        // and removing into it moves a row in
        assert_ne!(registry.location(tagged).unwrap().archetype, archetype);
        assert_eq!(
            registry.remove_component::<Health>(tagged),
            Err(EcsError::MutationDuringIteration { archetype })
        );
        assert_eq!(registry.get::<Health>(tagged).unwrap(), &Health(3));
        // unrelated archetypes are free to change
        registry.destroy(tagged).unwrap();
        registry.destroy(other).unwrap();
        registry.destroy(lone).unwrap();
        // non-structural writes are fine
        registry.get_mut::<Position>(b).unwrap().1 = 50;

        let (second, (pos, _)) = cursor.next_mut(&mut registry).unwrap();
        assert_eq!(second, b);
        assert_eq!(pos, &mut Position(5, 50));
        assert!(cursor.next_mut(&mut registry).is_none());
        assert_eq!(cursor.locked(), None);

        registry.destroy(b).unwrap();
        assert_eq!(registry.get::<Position>(a).unwrap(), &Position(1, 0));
        registry.check_invariants();
    }

    #[test]
    fn bulk_changes_respect_cursor_locks() {
        let mut registry = Registry::new();
        let a = registry.create((Position(0, 0), Velocity(1, 1))).unwrap();
        registry.create((Health(1),)).unwrap();
        let archetype = registry.location(a).unwrap().archetype;

        let mut cursor = registry.cursor::<&Position>();
        assert_eq!(cursor.next(&registry).map(|(e, _)| e), Some(a));
        let locked = Err(EcsError::MutationDuringIteration { archetype });
        assert_eq!(registry.destroy_matching::<&Velocity>(), locked);
        assert_eq!(registry.clear::<(Velocity,)>(), locked);
        assert_eq!(registry.emulate(a), Err(EcsError::MutationDuringIteration { archetype }));
        assert!(registry.is_alive(a));
        assert!(registry.has::<Velocity>(a));

        // archetypes the cursor is not producing are unaffected by the lock
        assert_eq!(registry.destroy_matching::<&Health>(), Ok(1));
        assert!(cursor.next(&registry).is_none());
        assert_eq!(registry.clear::<(Velocity,)>(), Ok(1));
        assert!(!registry.has::<Velocity>(a));
        registry.check_invariants();
    }

    #[test]
    fn dropping_a_cursor_releases_its_lock() {
        let mut registry = Registry::new();
        let e = registry.create((Health(1),)).unwrap();
        {
            let mut cursor = registry.cursor::<&Health>();
            assert!(cursor.next(&registry).is_some());
            assert!(registry.destroy(e).is_err());
        }
        registry.destroy(e).unwrap();
    }

    #[test]
    fn cursor_skips_empty_archetypes() {
        let mut registry = Registry::new();
        let gone = registry.create((Position(0, 0), Health(0))).unwrap();
        let kept = registry.create((Position(1, 1),)).unwrap();
        registry.destroy(gone).unwrap();

        let mut cursor = registry.cursor::<&Position>();
        let (e, _) = cursor.next(&registry).unwrap();
        assert_eq!(e, kept);
        assert!(cursor.next(&registry).is_none());
    }
}
