//! Config loading entry point: assembles sources in precedence order.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::StrataConfig;
use crate::error::ConfigError;
use config::{Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global config file, workspace
    /// `config/config.toml`, workspace `config/{STRATA_ENV}.toml`, `STRATA__*` environment.
    pub fn load(workspace_root: &Path) -> Result<StrataConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder.add_source(Self::environment()).build()?;

        let loaded: StrataConfig = config.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Ok(loaded)
    }

    /// Load a single config file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<StrataConfig, ConfigError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Path of the user-level config file, if a config directory can be resolved
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    fn environment() -> Environment {
        Environment::with_prefix("STRATA")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }
}
