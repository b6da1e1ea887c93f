//! CLI route: single route table and run context. Dispatches to the engine and presentation.

use crate::cli::parse::{AssembleArgs, Commands};
use crate::cli::presentation::{
    format_assembly_json, format_assembly_text, format_cache_table, format_validation_result,
};
use crate::config::{ConfigLoader, StrataConfig};
use crate::engine::ContextEngine;
use crate::error::CliError;
use crate::snapshot::{FileSnapshotProvider, TextProvider};
use crate::types::{Layer, Scope};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Runtime context for CLI execution: workspace and loaded configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: StrataConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config,
        })
    }

    pub fn from_config(workspace_root: PathBuf, config: StrataConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub async fn execute(&self, command: &Commands) -> Result<String, CliError> {
        match command {
            Commands::Assemble(args) => self.assemble(args).await,
            Commands::Validate => Ok(format_validation_result(&self.config.validate())),
        }
    }

    async fn assemble(&self, args: &AssembleArgs) -> Result<String, CliError> {
        let mut budget_config = self.config.budget.clone();
        if let Some(global) = args.budget {
            budget_config.global = global;
        }
        let budget = budget_config.token_budget()?;

        let mut builder = ContextEngine::builder().with_config(&self.config);
        if let Some(ref path) = args.system {
            let path = self.resolve(path);
            let provider =
                TextProvider::from_file(Layer::Static, &path).map_err(|source| CliError::Input {
                    path: path.display().to_string(),
                    source,
                })?;
            builder = builder.provider(Layer::Static, Arc::new(provider));
        }
        if let Some(ref docs) = args.docs {
            builder = builder.provider(
                Layer::SemiStatic,
                Arc::new(FileSnapshotProvider::new(self.resolve(docs))),
            );
        }
        builder = builder.provider(
            Layer::Ephemeral,
            Arc::new(TextProvider::new(Layer::Ephemeral, "input", args.input.clone())),
        );
        let engine = builder.build()?;

        let scope = Scope::new(args.scope.clone());
        let assembly = engine.assemble(&scope, &budget).await;
        info!(
            scope = %scope,
            items = assembly.items.len(),
            total_tokens = assembly.total_tokens,
            "Assemble command finished"
        );

        let mut output = if args.format == "json" {
            format_assembly_json(&assembly)?
        } else {
            format_assembly_text(&assembly)
        };
        if args.describe {
            output.push_str("\n\n");
            output.push_str(&format_cache_table(&engine.describe_cache(&scope)));
        }
        Ok(output)
    }

    /// Relative paths are taken from the workspace root
    fn resolve(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}
