use crate::archetype::ArchetypeId;
use crate::entity::Entity;

/// Errors reported by registry, storage and view operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("entity {0} is not alive")]
    InvalidHandle(Entity),

    #[error("component set does not match the signature of archetype {archetype}")]
    SignatureMismatch { archetype: ArchetypeId },

    #[error("component {component} is already present{}", on_entity(.entity))]
    DuplicateComponent {
        entity: Option<Entity>,
        component: &'static str,
    },

    #[error("entity {entity} has no component {component}")]
    ComponentNotPresent {
        entity: Entity,
        component: &'static str,
    },

    #[error("archetype {archetype} is being iterated, structural change rejected")]
    MutationDuringIteration { archetype: ArchetypeId },

    #[error("component {component} was not registered as cloneable")]
    NotCloneable { component: &'static str },
}

fn on_entity(entity: &Option<Entity>) -> String {
    match entity {
        Some(entity) => format!(" on entity {entity}"),
        None => String::new(),
    }
}

/// Errors surfaced by [`Scheduler::update`](crate::Scheduler::update).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("system '{system}' failed on tick {tick}")]
    SystemFailed {
        system: String,
        tick: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors that can occur while loading a [`RegistryConfig`](crate::RegistryConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T, E = EcsError> = std::result::Result<T, E>;
