use std::any::type_name;
use std::borrow::Cow;
use std::fmt;

use crate::error::SchedulerError;
use crate::registry::Registry;
use crate::time::{Clock, Time};

/// A unit of per-tick logic run by the [`Scheduler`].
pub trait System: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    fn run(&mut self, registry: &mut Registry) -> anyhow::Result<()>;
}

/// Blanket implementation so closures can be used as systems.
impl<F> System for F
where
    F: FnMut(&mut Registry) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&mut self, registry: &mut Registry) -> anyhow::Result<()> {
        (self)(registry)
    }
}

/// A system with an explicit name, see [`named`].
pub struct Named<S> {
    name: Cow<'static, str>,
    system: S,
}

impl<S: System> System for Named<S> {
    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn run(&mut self, registry: &mut Registry) -> anyhow::Result<()> {
        self.system.run(registry)
    }
}

/// Give a system (usually a closure) a readable name.
pub fn named<S: System>(name: impl Into<Cow<'static, str>>, system: S) -> Named<S> {
    Named {
        name: name.into(),
        system,
    }
}

/// Handle to a scheduled system, used to suspend or resume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(u32);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

struct Scheduled {
    id: SystemId,
    system: Box<dyn System>,
    enabled: bool,
}

/// An ordered list of systems bound to one registry.
///
/// Every [`update`](Self::update) runs each enabled system once, in the order
/// they were scheduled. Systems see each other's changes within a tick.
pub struct Scheduler<'r> {
    registry: &'r mut Registry,
    systems: Vec<Scheduled>,
    next_id: u32,
    clock: Clock,
}

impl<'r> Scheduler<'r> {
    pub fn new(registry: &'r mut Registry) -> Self {
        tracing::info!("scheduler bound to registry ({} entities)", registry.entity_count());
        Self {
            registry,
            systems: Vec::new(),
            next_id: 0,
            clock: Clock::default(),
        }
    }

    /// Add a system to the end of the schedule.
    pub fn schedule<S: System + 'static>(&mut self, system: S) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;
        tracing::debug!("scheduled system '{}' as {}", system.name(), id);
        self.systems.push(Scheduled {
            id,
            system: Box::new(system),
            enabled: true,
        });
        id
    }

    /// Skip a system on later ticks. Returns `false` if `id` is unknown.
    pub fn suspend(&mut self, id: SystemId) -> bool {
        self.set_enabled(id, false)
    }

    /// Undo [`suspend`](Self::suspend). Returns `false` if `id` is unknown.
    pub fn resume(&mut self, id: SystemId) -> bool {
        self.set_enabled(id, true)
    }

    fn set_enabled(&mut self, id: SystemId, enabled: bool) -> bool {
        match self.systems.iter_mut().find(|s| s.id == id) {
            Some(scheduled) => {
                scheduled.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_suspended(&self, id: SystemId) -> bool {
        self.systems.iter().any(|s| s.id == id && !s.enabled)
    }

    /// Run one tick.
    ///
    /// Stores the tick's [`Time`] in the registry, then runs every enabled
    /// system in order. The first failure stops the tick: later systems do
    /// not run and the error is returned.
    pub fn update(&mut self) -> Result<(), SchedulerError> {
        let time: Time = self.clock.tick();
        match self.registry.resource_mut::<Time>() {
            Some(slot) => *slot = time,
            None => {
                self.registry.insert_resource(time);
            }
        }

        for scheduled in self.systems.iter_mut().filter(|s| s.enabled) {
            if let Err(source) = scheduled.system.run(&mut *self.registry) {
                let system = scheduled.system.name().into_owned();
                tracing::error!("system '{}' failed on tick {}: {:#}", system, time.tick, source);
                return Err(SchedulerError::SystemFailed {
                    system,
                    tick: time.tick,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Number of `update` calls so far.
    pub fn tick(&self) -> u64 {
        self.clock.ticks()
    }

    pub fn registry(&self) -> &Registry {
        &*self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut *self.registry
    }

    /// Number of scheduled systems, suspended ones included.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

impl Drop for Scheduler<'_> {
    fn drop(&mut self) {
        tracing::info!(
            "scheduler released after {} ticks ({} systems)",
            self.clock.ticks(),
            self.systems.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use anyhow::bail;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(i32, i32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(i32, i32);

    fn movement(registry: &mut Registry) -> anyhow::Result<()> {
        for (_, (pos, vel)) in registry.view_mut::<(&mut Position, &Velocity)>() {
            pos.0 += vel.0;
            pos.1 += vel.1;
        }
        Ok(())
    }

    #[test]
    fn movement_integrates_each_tick() {
        let mut registry = Registry::new();
        let a = registry.create((Position(0, 0), Velocity(1, 4))).unwrap();
        assert_eq!(registry.view::<(&Position, &Velocity)>().len(), 1);

        let mut scheduler = registry.scheduler();
        scheduler.schedule(movement);
        scheduler.update().unwrap();
        assert_eq!(scheduler.registry().get::<Position>(a).unwrap(), &Position(1, 4));
        scheduler.update().unwrap();
        assert_eq!(scheduler.registry().get::<Position>(a).unwrap(), &Position(2, 8));
        assert_eq!(scheduler.tick(), 2);
    }

    #[test]
    fn closure_system() {
        let mut registry = Registry::new();
        registry.insert_resource(0u32);

        let mut system = |r: &mut Registry| -> anyhow::Result<()> {
            *r.resource_mut::<u32>().unwrap() += 1;
            Ok(())
        };
        system.run(&mut registry).unwrap();
        assert_eq!(*registry.resource::<u32>().unwrap(), 1);
    }

    #[test]
    fn schedule_ordering() {
        let mut registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::<u32>::new()));

        let mut scheduler = registry.scheduler();
        for n in 1..=3 {
            let log = log.clone();
            scheduler.schedule(move |_: &mut Registry| -> anyhow::Result<()> {
                log.lock().unwrap().push(n);
                Ok(())
            });
        }
        scheduler.update().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(scheduler.len(), 3);
    }

    #[test]
    fn later_systems_see_earlier_changes() {
        let mut registry = Registry::new();
        registry.insert_resource(Vec::<u32>::new());

        let mut scheduler = registry.scheduler();
        scheduler.schedule(|r: &mut Registry| -> anyhow::Result<()> {
            r.insert_resource(10u32);
            Ok(())
        });
        scheduler.schedule(|r: &mut Registry| -> anyhow::Result<()> {
            let seen = *r.resource::<u32>().unwrap();
            r.resource_mut::<Vec<u32>>().unwrap().push(seen);
            Ok(())
        });
        scheduler.update().unwrap();
        assert_eq!(scheduler.registry().resource::<Vec<u32>>().unwrap(), &vec![10]);
    }

    #[test]
    fn failure_stops_the_tick() {
        let mut registry = Registry::new();
        let ran = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let mut scheduler = registry.scheduler();
        let log = ran.clone();
        scheduler.schedule(named("first", move |_: &mut Registry| -> anyhow::Result<()> {
            log.lock().unwrap().push("first");
            Ok(())
        }));
        scheduler.schedule(named("broken", |_: &mut Registry| -> anyhow::Result<()> {
            bail!("out of fuel")
        }));
        let log = ran.clone();
        scheduler.schedule(named("third", move |_: &mut Registry| -> anyhow::Result<()> {
            log.lock().unwrap().push("third");
            Ok(())
        }));

        let err = scheduler.update().unwrap_err();
        let SchedulerError::SystemFailed { system, tick, source } = &err;
        assert_eq!(system, "broken");
        assert_eq!(*tick, 0);
        assert_eq!(source.to_string(), "out of fuel");
        assert_eq!(err.to_string(), "system 'broken' failed on tick 0");
        assert_eq!(*ran.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn suspended_systems_are_skipped() {
        let mut registry = Registry::new();
        registry.insert_resource(0u32);

        let mut scheduler = registry.scheduler();
        let id = scheduler.schedule(|r: &mut Registry| -> anyhow::Result<()> {
            *r.resource_mut::<u32>().unwrap() += 1;
            Ok(())
        });
        assert!(scheduler.suspend(id));
        assert!(scheduler.is_suspended(id));
        scheduler.update().unwrap();
        assert_eq!(scheduler.registry().resource::<u32>(), Some(&0));

        assert!(scheduler.resume(id));
        scheduler.update().unwrap();
        assert_eq!(scheduler.registry().resource::<u32>(), Some(&1));
        assert!(!scheduler.suspend(SystemId(99)));
    }

    #[test]
    fn time_resource_is_published() {
        let mut registry = Registry::new();
        let mut scheduler = registry.scheduler();
        scheduler.schedule(|r: &mut Registry| -> anyhow::Result<()> {
            let time = r.resource::<Time>().copied().unwrap_or_default();
            r.insert_resource(time.tick + 100);
            Ok(())
        });
        scheduler.update().unwrap();
        scheduler.update().unwrap();
        assert_eq!(scheduler.registry().resource::<u64>(), Some(&101));
        assert_eq!(scheduler.registry().resource::<Time>().unwrap().tick, 1);
    }

    #[test]
    fn time_is_updated_in_place() {
        let mut registry = Registry::new();
        let mut scheduler = registry.scheduler();
        scheduler.update().unwrap();
        let first: *const Time = scheduler.registry().resource::<Time>().unwrap();
        scheduler.update().unwrap();
        let second: *const Time = scheduler.registry().resource::<Time>().unwrap();
        assert_eq!(first, second);
        assert_eq!(scheduler.registry().resource::<Time>().unwrap().tick, 1);
    }

    #[test]
    fn default_name_is_type_name() {
        let system = |_: &mut Registry| -> anyhow::Result<()> { Ok(()) };
        assert!(system.name().contains("closure"));
        assert_eq!(named("physics", system).name(), "physics");
    }
}
