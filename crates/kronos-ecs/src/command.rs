use std::fmt;

use crate::bundle::Bundle;
use crate::component::Component;
use crate::entity::Entity;
use crate::error::Result;
use crate::registry::Registry;

type Deferred = Box<dyn FnOnce(&mut Registry) -> Result<()> + Send + Sync>;

enum Command {
    Destroy { entity: Entity },
    Structural(Deferred),
}

/// Structural changes recorded while iterating and applied afterwards.
///
/// ```ignore
/// let mut commands = CommandBuffer::new();
/// for (entity, health) in registry.view::<&Health>() {
///     if health.0 == 0 {
///         commands.destroy(entity);
///     }
/// }
/// commands.apply(&mut registry)?;
/// ```
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<B: Bundle>(&mut self, bundle: B) {
        self.commands.push(Command::Structural(Box::new(move |registry: &mut Registry| {
            registry.create(bundle).map(drop)
        })));
    }

    pub fn destroy(&mut self, entity: Entity) {
        self.commands.push(Command::Destroy { entity });
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) {
        self.commands.push(Command::Structural(Box::new(move |registry: &mut Registry| {
            registry.add_component(entity, component)
        })));
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.commands.push(Command::Structural(Box::new(move |registry: &mut Registry| {
            registry.remove_component::<T>(entity).map(drop)
        })));
    }

    /// Apply recorded commands in order. Stops at the first error; the
    /// remaining commands are discarded and the buffer is left empty.
    pub fn apply(&mut self, registry: &mut Registry) -> Result<()> {
        let count = self.commands.len();
        for command in self.commands.drain(..) {
            match command {
                Command::Destroy { entity } => registry.destroy(entity)?,
                Command::Structural(apply) => apply(registry)?,
            }
        }
        if count > 0 {
            tracing::trace!("applied {} deferred commands", count);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("len", &self.commands.len())
            .finish()
    }
}
