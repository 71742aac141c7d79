//! System cache
//!
//! On-disk home for downloaded package content at `~/.keel/cache`. The
//! cache itself is a thin coordinator: retrieval and layout under the root
//! are delegated to each source's `materialize`.

use crate::package::PackageId;
use crate::source::{Source, SourceRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Cache directory creation failed
    #[error("Failed to create cache directory: {0}")]
    CacheInitError(String),

    /// A source failed to produce the package content
    #[error("Failed to materialize {package}: {message}")]
    Materialize { package: String, message: String },
}

/// The system-wide package cache
#[derive(Debug, Clone)]
pub struct SystemCache {
    /// Root cache directory (~/.keel/cache)
    root: PathBuf,
}

impl SystemCache {
    /// Open the cache at the default location, creating it if needed
    pub fn init() -> Result<Self, CacheError> {
        let home = dirs::home_dir().ok_or_else(|| {
            CacheError::CacheInitError("Could not determine home directory".to_string())
        })?;
        Self::with_root(home.join(".keel").join("cache"))
    }

    /// Open the cache at an explicit root, creating it if needed
    pub fn with_root(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    /// The cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the content of an id is present locally, returning its
    /// directory
    pub fn materialize(
        &self,
        id: &PackageId,
        sources: &SourceRegistry,
    ) -> Result<PathBuf, CacheError> {
        let source = sources
            .source_of(id.to_ref())
            .map_err(|e| CacheError::Materialize {
                package: id.to_string(),
                message: e.to_string(),
            })?;
        source
            .materialize(id, &self.root)
            .map_err(|e| CacheError::Materialize {
                package: id.to_string(),
                message: e.to_string(),
            })
    }
}
