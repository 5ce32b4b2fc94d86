use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Marker trait for types that can be stored as ECS components.
pub trait Component: 'static + Send + Sync {}

/// Blanket implementation: any `'static + Send + Sync` type is a valid component.
impl<T: 'static + Send + Sync> Component for T {}

/// Small-integer key for a component type, assigned once per registry on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Per-type metadata kept by the registry.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    type_id: TypeId,
    new_column: fn(usize) -> Box<dyn ColumnStorage>,
    clone_row: Option<fn(&mut dyn ColumnStorage, usize)>,
}

impl ComponentInfo {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn new_column(&self, capacity: usize) -> Box<dyn ColumnStorage> {
        (self.new_column)(capacity)
    }

    /// Whether rows of this type can be duplicated by `Registry::emulate`.
    pub fn is_cloneable(&self) -> bool {
        self.clone_row.is_some()
    }

    pub(crate) fn clone_row(&self) -> Option<fn(&mut dyn ColumnStorage, usize)> {
        self.clone_row
    }
}

/// Type key table: Rust `TypeId` to dense [`ComponentId`].
#[derive(Default)]
pub(crate) struct Components {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentId>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `T`, assigning the next free one on first sight.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.by_type.get(&type_id) {
            return id;
        }
        let id = ComponentId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: type_name::<T>(),
            type_id,
            new_column: Column::<T>::boxed,
            clone_row: None,
        });
        self.by_type.insert(type_id, id);
        tracing::debug!("registered component {} as {}", type_name::<T>(), id);
        id
    }

    /// Register `T` and record how to duplicate one of its values.
    pub fn register_cloneable<T: Component + Clone>(&mut self) -> ComponentId {
        let id = self.register::<T>();
        self.infos[id.index()].clone_row = Some(Column::<T>::clone_row);
        id
    }

    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn info(&self, id: ComponentId) -> &ComponentInfo {
        &self.infos[id.index()]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

/// Type-erased column interface used by archetypes.
pub(crate) trait ColumnStorage: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    /// Swap-remove `row` and drop the value.
    fn swap_remove_drop(&mut self, row: usize);
    /// Swap-remove `row` and push the value onto `dst`, which must hold the same type.
    fn swap_remove_into(&mut self, row: usize, dst: &mut dyn ColumnStorage);
    fn reserve(&mut self, additional: usize);
    fn clear(&mut self);
}

/// Densely packed values of one component type.
pub(crate) struct Column<T> {
    data: Vec<T>,
}

impl<T: Component> Column<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    fn boxed(capacity: usize) -> Box<dyn ColumnStorage> {
        Box::new(Self::with_capacity(capacity))
    }

    pub fn push(&mut self, value: T) {
        self.data.push(value);
    }

    pub fn swap_remove(&mut self, row: usize) -> T {
        self.data.swap_remove(row)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Component + Clone> Column<T> {
    /// Push a copy of `row` onto the end of the same column.
    fn clone_row(column: &mut dyn ColumnStorage, row: usize) {
        match column.as_any_mut().downcast_mut::<Column<T>>() {
            Some(column) => {
                let value = column.data[row].clone();
                column.data.push(value);
            }
            None => unreachable!("column type mismatch cloning {}", type_name::<T>()),
        }
    }
}

impl<T: Component> ColumnStorage for Column<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn swap_remove_drop(&mut self, row: usize) {
        self.data.swap_remove(row);
    }

    fn swap_remove_into(&mut self, row: usize, dst: &mut dyn ColumnStorage) {
        let value = self.data.swap_remove(row);
        match dst.as_any_mut().downcast_mut::<Column<T>>() {
            Some(dst) => dst.push(value),
            None => unreachable!("column type mismatch moving {}", type_name::<T>()),
        }
    }

    fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    fn clear(&mut self) {
        self.data = Vec::new();
    }
}
