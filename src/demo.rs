//! Components, systems and configuration for the demo binary.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use kronos_ecs::{CommandBuffer, Registry, RegistryConfig, System, Time};

/// Demo settings, read from an optional TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub entities: u32,
    pub ticks: u64,
    /// Ticks between respawn waves. Zero disables respawning.
    pub respawn_every: u64,
    pub registry: RegistryConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            entities: 10_000,
            ticks: 120,
            respawn_every: 30,
            registry: RegistryConfig::default(),
        }
    }
}

impl DemoConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.registry.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

/// Remaining ticks before the entity is destroyed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lifetime(pub u32);

/// Fixed step used when no wall time has passed yet.
const STEP: f32 = 1.0 / 60.0;

/// Spawn `count` particles. Every third one is mortal, every fifth is static.
pub fn spawn_particles(registry: &mut Registry, count: u32) -> Result<()> {
    registry.reserve::<(Position, Velocity)>(count as usize)?;
    for i in 0..count {
        let position = Position {
            x: (i % 100) as f32,
            y: (i / 100) as f32,
        };
        let velocity = Velocity {
            x: ((i % 7) as f32 - 3.0) * 0.5,
            y: ((i % 5) as f32 - 2.0) * 0.5,
        };
        if i % 5 == 0 {
            registry.create((position,))?;
        } else if i % 3 == 0 {
            registry.create((position, velocity, Lifetime(10 + i % 50)))?;
        } else {
            registry.create((position, velocity))?;
        }
    }
    Ok(())
}

/// Integrate velocity into position.
pub fn movement(registry: &mut Registry) -> Result<()> {
    let dt = registry
        .resource::<Time>()
        .map(Time::delta_secs)
        .filter(|dt| *dt > 0.0)
        .unwrap_or(STEP);
    for (_, (pos, vel)) in registry.view_mut::<(&mut Position, &Velocity)>() {
        pos.x += vel.x * dt;
        pos.y += vel.y * dt;
    }
    Ok(())
}

/// Count down lifetimes and destroy entities that reach zero.
#[derive(Default)]
pub struct Expire {
    commands: CommandBuffer,
}

impl System for Expire {
    fn run(&mut self, registry: &mut Registry) -> Result<()> {
        for (entity, lifetime) in registry.view_mut::<&mut Lifetime>() {
            lifetime.0 = lifetime.0.saturating_sub(1);
            if lifetime.0 == 0 {
                self.commands.destroy(entity);
            }
        }
        self.commands
            .apply(registry)
            .context("applying expired entities")
    }
}

/// Periodically spawn a wave of mortal particles.
pub struct Respawn {
    every: u64,
}

impl Respawn {
    pub fn new(every: u64) -> Self {
        Self { every }
    }
}

impl System for Respawn {
    fn run(&mut self, registry: &mut Registry) -> Result<()> {
        let tick = registry.resource::<Time>().map_or(0, |t| t.tick);
        if self.every == 0 || tick == 0 || tick % self.every != 0 {
            return Ok(());
        }
        for i in 0..100u32 {
            registry.create((
                Position { x: 0.0, y: 0.0 },
                Velocity {
                    x: (i % 10) as f32 * 0.1,
                    y: (i / 10) as f32 * 0.1,
                },
                Lifetime(20),
            ))?;
        }
        tracing::debug!("respawned 100 particles on tick {}", tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_destroys_at_zero() {
        let mut registry = Registry::new();
        let short = registry
            .create((Position { x: 0.0, y: 0.0 }, Lifetime(1)))
            .unwrap();
        let long = registry
            .create((Position { x: 0.0, y: 0.0 }, Lifetime(3)))
            .unwrap();

        let mut expire = Expire::default();
        expire.run(&mut registry).unwrap();
        assert!(!registry.is_alive(short));
        assert_eq!(registry.get::<Lifetime>(long).unwrap(), &Lifetime(2));
    }

    #[test]
    fn spawn_mix() {
        let mut registry = Registry::new();
        spawn_particles(&mut registry, 30).unwrap();
        assert_eq!(registry.entity_count(), 30);
        // 0, 5, ..., 25 are static
        assert_eq!(registry.view::<&Position>().without::<Velocity>().len(), 6);
        assert_eq!(registry.view::<(&Position, &Velocity)>().len(), 24);
    }

    #[test]
    fn demo_runs_to_completion() {
        let mut registry = Registry::new();
        spawn_particles(&mut registry, 200).unwrap();
        let mut scheduler = registry.scheduler();
        scheduler.schedule(movement);
        scheduler.schedule(Expire::default());
        scheduler.schedule(Respawn::new(5));
        for _ in 0..60 {
            scheduler.update().unwrap();
        }
        assert!(scheduler.registry().view::<&Lifetime>().iter().all(|(_, l)| l.0 > 0));
    }

    #[test]
    fn config_from_toml() {
        let config: DemoConfig = toml::from_str(
            r#"
            entities = 5
            ticks = 2

            [registry]
            column_capacity = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.entities, 5);
        assert_eq!(config.respawn_every, 30);
        assert_eq!(config.registry.column_capacity, 4);
    }
}
