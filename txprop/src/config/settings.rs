//! Engine settings

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::defaults;
use crate::context::StorageDriver;
use crate::error::{Error, Result};
use crate::propagation::Propagation;
use crate::traits::IsolationLevel;

/// Engine-wide options applied to every call that does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionalConfig {
    /// Execution context backing strategy
    #[serde(default)]
    pub storage_driver: StorageDriver,

    /// Propagation used when a call does not name one
    #[serde(default)]
    pub default_propagation: Propagation,

    /// Isolation level used when a call does not name one; `None` leaves it
    /// to the client
    #[serde(default)]
    pub default_isolation: Option<IsolationLevel>,

    /// Hooks per scope before a leak warning is logged
    #[serde(default = "default_max_hook_handlers")]
    pub max_hook_handlers: usize,

    /// Log level (trace, debug, info, warn, error)
    /// Can be overridden by RUST_LOG env var
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_max_hook_handlers() -> usize {
    defaults::MAX_HOOK_HANDLERS
}

impl Default for TransactionalConfig {
    fn default() -> Self {
        Self {
            storage_driver: StorageDriver::default(),
            default_propagation: Propagation::default(),
            default_isolation: None,
            max_hook_handlers: default_max_hook_handlers(),
            log_level: None,
        }
    }
}

impl TransactionalConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: TransactionalConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(config)
    }

    /// Load configuration using config-rs (file + environment variables)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        } else {
            builder = builder.add_source(File::with_name(defaults::CONFIG_FILE).required(false));
        }

        // Override with environment variables (TXPROP__*)
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TransactionalConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Filter directive for a `tracing` subscriber.
    ///
    /// Priority: `RUST_LOG` env var > `log_level` > [`defaults::LOG_LEVEL`].
    pub fn log_directive(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .filter(|directive| !directive.trim().is_empty())
            .or_else(|| self.log_level.clone())
            .unwrap_or_else(|| defaults::LOG_LEVEL.to_string())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_hook_handlers == 0 {
            return Err(Error::Config(
                "max_hook_handlers must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
