//! Kronos - headless demo of the archetype ECS
//!
//! Spawns a field of moving particles, runs the scheduler for a fixed number
//! of ticks and tears the registry down.
//!
//! Usage: `kronos [config.toml]`

mod demo;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kronos_ecs::{named, Registry};

use demo::{DemoConfig, Lifetime, Position, Velocity};

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    let config = match std::env::args().nth(1) {
        Some(path) => DemoConfig::load(&path).with_context(|| format!("Failed to load {path}"))?,
        None => DemoConfig::default(),
    };
    info!(
        "Starting Kronos demo: {} entities, {} ticks",
        config.entities, config.ticks
    );

    let mut registry = Registry::with_config(config.registry.clone())
        .context("Invalid registry config")?;
    demo::spawn_particles(&mut registry, config.entities)?;
    info!(
        "Spawned {} entities in {} archetypes",
        registry.entity_count(),
        registry.archetype_count()
    );

    {
        let mut scheduler = registry.scheduler();
        scheduler.schedule(named("movement", demo::movement));
        scheduler.schedule(named("expire", demo::Expire::default()));
        scheduler.schedule(named("respawn", demo::Respawn::new(config.respawn_every)));

        for _ in 0..config.ticks {
            scheduler.update()?;
        }

        let registry = scheduler.registry();
        let moving = registry.view::<(&Position, &Velocity)>().len();
        let mortal = registry.view::<&Lifetime>().len();
        info!(
            "After {} ticks: {} entities alive, {} moving, {} mortal",
            scheduler.tick(),
            registry.entity_count(),
            moving,
            mortal
        );
    }

    let stats = registry.close();
    info!(
        "Shutdown complete: {} entities, {} archetypes, {} component types",
        stats.entities, stats.archetypes, stats.components
    );
    Ok(())
}
