#![allow(private_interfaces)]

use std::any::type_name;

use crate::archetype::{Archetype, ArchetypeId, Archetypes, Signature};
use crate::component::{Component, ComponentId, Components};
use crate::error::{EcsError, Result};

/// A fixed set of components inserted together, e.g. `(Position, Velocity)`.
///
/// Implemented for tuples of up to eight components. The tuple type fixes the
/// destination archetype, so it is resolved once per bundle type and cached.
pub trait Bundle: Send + Sync + 'static {
    /// Register every component type, pushing ids in declaration order.
    fn register(components: &mut Components, ids: &mut Vec<ComponentId>);

    /// Push each value onto its column. `ids` is what `register` produced.
    fn write(self, ids: &[ComponentId], archetype: &mut Archetype);
}

macro_rules! impl_bundle_tuple {
    ($($name:ident),*) => {
        #[allow(non_snake_case, unused_variables, unused_mut)]
        impl<$($name: Component),*> Bundle for ($($name,)*) {
            fn register(components: &mut Components, ids: &mut Vec<ComponentId>) {
                $(ids.push(components.register::<$name>());)*
            }

            fn write(self, ids: &[ComponentId], archetype: &mut Archetype) {
                let ($($name,)*) = self;
                let mut ids = ids.iter();
                $(
                    if let Some(&id) = ids.next() {
                        archetype.push_component(id, $name);
                    }
                )*
            }
        }
    };
}

impl_bundle_tuple!();
impl_bundle_tuple!(A);
impl_bundle_tuple!(A, B);
impl_bundle_tuple!(A, B, C);
impl_bundle_tuple!(A, B, C, D);
impl_bundle_tuple!(A, B, C, D, E);
impl_bundle_tuple!(A, B, C, D, E, F);
impl_bundle_tuple!(A, B, C, D, E, F, G);
impl_bundle_tuple!(A, B, C, D, E, F, G, H);

/// Resolved layout of one bundle type.
pub(crate) struct BundleInfo {
    pub archetype: ArchetypeId,
    pub ids: Box<[ComponentId]>,
}

impl BundleInfo {
    /// Register `B`'s components and resolve its archetype.
    ///
    /// Fails with `DuplicateComponent` if a type appears twice in the tuple.
    pub fn new<B: Bundle>(components: &mut Components, archetypes: &mut Archetypes) -> Result<Self> {
        let mut ids = Vec::new();
        B::register(components, &mut ids);
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(EcsError::DuplicateComponent {
                    entity: None,
                    component: components.info(*id).name(),
                });
            }
        }
        let archetype = archetypes.archetype_for(Signature::new(ids.iter().copied()), components);
        tracing::debug!("bundle {} maps to archetype {}", type_name::<B>(), archetype);
        Ok(Self {
            archetype,
            ids: ids.into_boxed_slice(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;

    #[test]
    fn ids_follow_declaration_order() {
        let mut components = Components::new();
        let vel = components.register::<Velocity>();
        let mut archetypes = Archetypes::new(&components, 0);
        let info = BundleInfo::new::<(Position, Velocity)>(&mut components, &mut archetypes).unwrap();
        let pos = components.id_of::<Position>().unwrap();
        assert_eq!(&*info.ids, &[pos, vel]);
        // signature is sorted regardless of tuple order
        assert_eq!(archetypes.get(info.archetype).signature().ids(), &[vel, pos]);

        let again = BundleInfo::new::<(Velocity, Position)>(&mut components, &mut archetypes).unwrap();
        assert_eq!(again.archetype, info.archetype);
    }

    #[test]
    fn duplicate_types_are_rejected() {
        let mut components = Components::new();
        let mut archetypes = Archetypes::new(&components, 0);
        let err = BundleInfo::new::<(Position, Velocity, Position)>(&mut components, &mut archetypes)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EcsError::DuplicateComponent { entity: None, component } if component.ends_with("Position")
        ));
        assert_eq!(archetypes.len(), 1);
    }

    #[test]
    fn unit_bundle_is_empty() {
        let mut components = Components::new();
        let mut archetypes = Archetypes::new(&components, 0);
        let info = BundleInfo::new::<()>(&mut components, &mut archetypes).unwrap();
        assert!(info.ids.is_empty());
        assert_eq!(info.archetype, ArchetypeId::EMPTY);
    }
}
