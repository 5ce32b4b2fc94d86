//! Kronos ECS - archetype Entity Component System
//!
//! Entities are generational handles. Entities with the same set of component
//! types share an archetype, which stores each component type in its own
//! densely packed column, so iterating a query walks contiguous memory.
//!
//! ```ignore
//! let mut registry = Registry::new();
//! let e = registry.create((Position(0.0, 0.0), Velocity(1.0, 4.0)))?;
//!
//! let mut scheduler = registry.scheduler();
//! scheduler.schedule(|r: &mut Registry| -> anyhow::Result<()> {
//!     for (_, (pos, vel)) in r.view_mut::<(&mut Position, &Velocity)>() {
//!         pos.0 += vel.0;
//!         pos.1 += vel.1;
//!     }
//!     Ok(())
//! });
//! scheduler.update()?;
//! ```

mod archetype;
mod bundle;
mod command;
mod component;
mod config;
mod entity;
mod error;
mod query;
mod registry;
mod resource;
mod system;
mod time;
mod view;

pub use archetype::{Archetype, ArchetypeId, Signature};
pub use bundle::Bundle;
pub use command::CommandBuffer;
pub use component::{Component, ComponentId, ComponentInfo};
pub use config::RegistryConfig;
pub use entity::{Entity, EntityLocation};
pub use error::{ConfigError, EcsError, Result, SchedulerError};
pub use query::{Query, ReadOnlyQuery};
pub use registry::{Registry, RegistryStats};
pub use system::{named, Named, Scheduler, System, SystemId};
pub use time::Time;
pub use view::{Iter, View, ViewCursor, ViewMut};
