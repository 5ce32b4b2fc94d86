#![allow(private_interfaces)]

use std::any::{type_name, TypeId};
use std::sync::Arc;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentId, Components};

/// Trait implemented for query parameter types (`&T`, `&mut T` and tuples of them).
///
/// # Safety
/// Implementors must report exactly the component types they access, consume
/// exactly `COUNT` column indices in `fetch`, and only hand out `&mut`
/// references for types they declared as mutable.
pub unsafe trait Query {
    type Item<'r>;

    /// Per-archetype column pointers.
    type Fetch: Copy + 'static;

    /// Number of component types named by the query.
    const COUNT: usize;

    /// Push the `TypeId` of every accessed component, in query order.
    fn type_ids(ids: &mut Vec<TypeId>);

    /// Look up component ids in query order. Returns `false` if a type was
    /// never registered, in which case nothing can match.
    fn component_ids(components: &Components, ids: &mut Vec<ComponentId>) -> bool;

    /// Resolve column pointers for one archetype.
    ///
    /// # Safety
    /// `archetype` must be valid, `columns` must hold the column index of each
    /// queried type in query order, and the pointer must permit writes when
    /// the query contains `&mut`.
    unsafe fn fetch(archetype: *mut Archetype, columns: &[usize]) -> Self::Fetch;

    /// Build the item for `row`.
    ///
    /// # Safety
    /// `row` must be in bounds for the archetype `fetch` came from, and no
    /// other live reference may alias a mutably fetched value.
    unsafe fn item<'r>(fetch: Self::Fetch, row: usize) -> Self::Item<'r>;
}

/// Queries that never hand out mutable references.
///
/// # Safety
/// Must only be implemented for queries whose `item` produces shared references.
pub unsafe trait ReadOnlyQuery: Query {}

// --- &T ---

unsafe impl<T: Component> Query for &T {
    type Item<'r> = &'r T;
    type Fetch = *const T;
    const COUNT: usize = 1;

    fn type_ids(ids: &mut Vec<TypeId>) {
        ids.push(TypeId::of::<T>());
    }

    fn component_ids(components: &Components, ids: &mut Vec<ComponentId>) -> bool {
        match components.id_of::<T>() {
            Some(id) => {
                ids.push(id);
                true
            }
            None => false,
        }
    }

    unsafe fn fetch(archetype: *mut Archetype, columns: &[usize]) -> Self::Fetch {
        (*archetype).typed_column::<T>(columns[0]).as_slice().as_ptr()
    }

    unsafe fn item<'r>(fetch: Self::Fetch, row: usize) -> Self::Item<'r> {
        &*fetch.add(row)
    }
}

unsafe impl<T: Component> ReadOnlyQuery for &T {}

// --- &mut T ---

unsafe impl<T: Component> Query for &mut T {
    type Item<'r> = &'r mut T;
    type Fetch = *mut T;
    const COUNT: usize = 1;

    fn type_ids(ids: &mut Vec<TypeId>) {
        ids.push(TypeId::of::<T>());
    }

    fn component_ids(components: &Components, ids: &mut Vec<ComponentId>) -> bool {
        <&T as Query>::component_ids(components, ids)
    }

    unsafe fn fetch(archetype: *mut Archetype, columns: &[usize]) -> Self::Fetch {
        (*archetype)
            .typed_column_mut::<T>(columns[0])
            .as_mut_slice()
            .as_mut_ptr()
    }

    unsafe fn item<'r>(fetch: Self::Fetch, row: usize) -> Self::Item<'r> {
        &mut *fetch.add(row)
    }
}

// --- Tuples ---

macro_rules! impl_query_tuple {
    ($($name:ident),+) => {
        #[allow(non_snake_case, unused_assignments)]
        unsafe impl<$($name: Query),+> Query for ($($name,)+) {
            type Item<'r> = ($($name::Item<'r>,)+);
            type Fetch = ($($name::Fetch,)+);
            const COUNT: usize = 0 $(+ $name::COUNT)+;

            fn type_ids(ids: &mut Vec<TypeId>) {
                $($name::type_ids(ids);)+
            }

            fn component_ids(components: &Components, ids: &mut Vec<ComponentId>) -> bool {
                $(
                    if !$name::component_ids(components, ids) {
                        return false;
                    }
                )+
                true
            }

            unsafe fn fetch(archetype: *mut Archetype, columns: &[usize]) -> Self::Fetch {
                let mut offset = 0;
                $(
                    let $name = $name::fetch(archetype, &columns[offset..]);
                    offset += $name::COUNT;
                )+
                ($($name,)+)
            }

            unsafe fn item<'r>(fetch: Self::Fetch, row: usize) -> Self::Item<'r> {
                let ($($name,)+) = fetch;
                ($($name::item($name, row),)+)
            }
        }

        unsafe impl<$($name: ReadOnlyQuery),+> ReadOnlyQuery for ($($name,)+) {}
    };
}

impl_query_tuple!(A);
impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);
impl_query_tuple!(A, B, C, D, E);
impl_query_tuple!(A, B, C, D, E, F);
impl_query_tuple!(A, B, C, D, E, F, G);
impl_query_tuple!(A, B, C, D, E, F, G, H);

/// An archetype matched by a query, with the column index of each queried
/// type in query order.
#[derive(Debug, Clone)]
pub(crate) struct MatchedArchetype {
    pub archetype: ArchetypeId,
    pub columns: Box<[usize]>,
}

/// Matching archetypes for one query type, extended as archetypes appear.
pub(crate) struct QueryCache {
    ids: Option<Box<[ComponentId]>>,
    matched: Arc<[MatchedArchetype]>,
    scanned: usize,
}

impl QueryCache {
    /// # Panics
    /// Panics if `Q` names the same component type twice.
    pub fn new<Q: Query>() -> Self {
        let mut types = Vec::with_capacity(Q::COUNT);
        Q::type_ids(&mut types);
        for (i, ty) in types.iter().enumerate() {
            if types[..i].contains(ty) {
                panic!(
                    "query {} names a component type more than once",
                    type_name::<Q>()
                );
            }
        }
        Self {
            ids: None,
            matched: Arc::new([]),
            scanned: 0,
        }
    }

    /// Scan archetypes created since the last refresh. Ids are resolved
    /// lazily since the queried types may not be registered yet.
    pub fn refresh<Q: Query>(&mut self, components: &Components, archetypes: &[Archetype]) {
        if self.ids.is_none() {
            let mut ids = Vec::with_capacity(Q::COUNT);
            if !Q::component_ids(components, &mut ids) {
                return;
            }
            self.ids = Some(ids.into_boxed_slice());
        }
        if self.scanned == archetypes.len() {
            return;
        }
        let Some(ids) = &self.ids else {
            return;
        };
        let fresh: Vec<MatchedArchetype> = archetypes[self.scanned..]
            .iter()
            .filter_map(|archetype| {
                let columns = ids
                    .iter()
                    .map(|&id| archetype.column_index(id))
                    .collect::<Option<Box<[usize]>>>()?;
                Some(MatchedArchetype {
                    archetype: archetype.id(),
                    columns,
                })
            })
            .collect();
        self.scanned = archetypes.len();
        if !fresh.is_empty() {
            self.matched = self.matched.iter().cloned().chain(fresh).collect();
        }
    }

    pub fn matched(&self) -> &Arc<[MatchedArchetype]> {
        &self.matched
    }
}
