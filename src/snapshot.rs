//! Providers backed by local text: a directory snapshot for reference documents and
//! fixed text for system prompts or the current input.

use crate::error::ProviderError;
use crate::layer::LayerProvider;
use crate::types::{ContextItem, Layer, Scope};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Files larger than this are skipped by default
pub const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024;

/// Snapshot provider configuration
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Whether to follow symbolic links (default: false for determinism)
    pub follow_symlinks: bool,
    pub max_file_bytes: u64,
    /// Maximum depth to traverse (None = unlimited)
    pub max_depth: Option<usize>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_depth: None,
        }
    }
}

/// Yields one item per UTF-8 file under a directory, in path order.
///
/// Hidden entries (names starting with `.`) are skipped, as are files over the size limit
/// and files that are not valid UTF-8. Item source is the path relative to the root.
pub struct FileSnapshotProvider {
    root: PathBuf,
    layer: Layer,
    config: SnapshotConfig,
}

impl FileSnapshotProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layer: Layer::SemiStatic,
            config: SnapshotConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SnapshotConfig) -> Self {
        self.config = config;
        self
    }

    /// Tag items with a layer other than SemiStatic
    pub fn for_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect(
        root: &Path,
        layer: Layer,
        config: &SnapshotConfig,
    ) -> Result<Vec<ContextItem>, ProviderError> {
        let walker = WalkDir::new(root)
            .follow_links(config.follow_symlinks)
            .max_depth(config.max_depth.unwrap_or(usize::MAX))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        let mut items = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                ProviderError::failed(format!("Failed to walk {}: {}", root.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let metadata = entry.metadata().map_err(|e| {
                ProviderError::failed(format!("Failed to read metadata for {:?}: {}", path, e))
            })?;
            if metadata.len() > config.max_file_bytes {
                debug!(path = %path.display(), bytes = metadata.len(), "Skipping oversized file");
                continue;
            }

            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    debug!(path = %path.display(), "Skipping non-UTF-8 file");
                    continue;
                }
                Err(e) => {
                    return Err(ProviderError::failed(format!(
                        "Failed to read {:?}: {}",
                        path, e
                    )))
                }
            };

            let relative = path.strip_prefix(root).unwrap_or(path);
            items.push(
                ContextItem::new(layer, content)
                    .with_source(relative.to_string_lossy())
                    .with_annotation("bytes", metadata.len().to_string()),
            );
        }
        Ok(items)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[async_trait]
impl LayerProvider for FileSnapshotProvider {
    async fn fetch(&self, _scope: &Scope) -> Result<Vec<ContextItem>, ProviderError> {
        let root = self.root.clone();
        let layer = self.layer;
        let config = self.config.clone();
        let items = tokio::task::spawn_blocking(move || Self::collect(&root, layer, &config))
            .await
            .map_err(|e| {
                warn!(root = %self.root.display(), error = %e, "Snapshot task failed");
                ProviderError::Aborted
            })??;
        debug!(root = %self.root.display(), files = items.len(), "Snapshot collected");
        Ok(items)
    }

    fn name(&self) -> &str {
        "file_snapshot"
    }
}

/// Fixed text for every scope. Empty text yields no items.
pub struct TextProvider {
    layer: Layer,
    source: String,
    text: String,
}

impl TextProvider {
    pub fn new(layer: Layer, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            layer,
            source: source.into(),
            text: text.into(),
        }
    }

    /// Read the text from a file once, at construction
    pub fn from_file(layer: Layer, path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(layer, path.to_string_lossy(), text))
    }
}

#[async_trait]
impl LayerProvider for TextProvider {
    async fn fetch(&self, _scope: &Scope) -> Result<Vec<ContextItem>, ProviderError> {
        if self.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![
            ContextItem::new(self.layer, self.text.clone()).with_source(self.source.clone())
        ])
    }

    fn name(&self) -> &str {
        "text"
    }
}
