//! Registry sizing configuration.
//!
//! Loaded from TOML, e.g.:
//!
//! ```toml
//! entity_capacity = 100000
//! column_capacity = 1024
//! max_entities = 10000000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Capacities and limits for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Entity slots reserved up front in the allocator and directory.
    pub entity_capacity: usize,
    /// Rows reserved in each column when an archetype is created.
    pub column_capacity: usize,
    /// Size of the entity index space. Exceeding it aborts.
    pub max_entities: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 1024,
            column_capacity: 64,
            max_entities: u32::MAX,
        }
    }
}

impl RegistryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entities == 0 {
            return Err(ConfigError::Invalid("max_entities must be at least 1".into()));
        }
        if self.entity_capacity > self.max_entities as usize {
            return Err(ConfigError::Invalid(format!(
                "entity_capacity {} exceeds max_entities {}",
                self.entity_capacity, self.max_entities
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config = RegistryConfig::from_toml_str("column_capacity = 8").unwrap();
        assert_eq!(config.column_capacity, 8);
        assert_eq!(config.entity_capacity, RegistryConfig::default().entity_capacity);
        assert_eq!(config.max_entities, u32::MAX);
    }

    #[test]
    fn rejects_zero_index_space() {
        let err = RegistryConfig::from_toml_str("max_entities = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_capacity_above_limit() {
        let err =
            RegistryConfig::from_toml_str("entity_capacity = 10\nmax_entities = 5").unwrap_err();
        assert!(err.to_string().contains("exceeds max_entities"));
    }

    #[test]
    fn parse_errors_surface() {
        let err = RegistryConfig::from_toml_str("max_entities = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RegistryConfig::load("/nonexistent/kronos.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = RegistryConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(RegistryConfig::from_toml_str(&text).unwrap(), config);
    }
}
