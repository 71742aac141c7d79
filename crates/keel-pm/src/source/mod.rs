//! Package sources
//!
//! A source is a named strategy for locating packages: the hosted registry,
//! a git repository, a local path. Sources own all description-specific
//! logic — parsing, equality, hashing — and answer the two questions the
//! solver asks: which versions of a ref exist, and what does a given id
//! depend on. Retrieval (`materialize`) is used by the system cache, never
//! by the solver.

mod git;
mod hosted;
mod memory;
mod path;

pub use git::GitSource;
pub use hosted::{HostedSource, PackageMetadata, VersionDownload, VersionInfo, DEFAULT_REGISTRY};
pub use memory::MemorySource;
pub use path::{find_project_root, PathSource};

use crate::manifest::PackageManifest;
use crate::package::{Description, PackageId, PackageRef};
use crate::semver::Version;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur in source operations
#[derive(Debug, Error)]
pub enum SourceError {
    /// A ref names a source that is not registered
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Malformed description or manifest data
    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// The source has never heard of this package
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// The package exists but not at this version
    #[error("Version {version} not found for package {package}")]
    VersionNotFound { package: String, version: String },

    /// Downloaded bytes did not match the recorded checksum
    #[error("Checksum mismatch for {package}@{version}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        package: String,
        version: String,
        expected: String,
        actual: String,
    },

    /// Transport failure; never retried by the resolver
    #[error("Source unavailable: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-HTTP transport or tooling failure
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed registry response
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SourceError {
    pub(crate) fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        SourceError::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error is a transport failure (exit code `UNAVAILABLE`)
    pub fn is_transport(&self) -> bool {
        matches!(self, SourceError::Http(_) | SourceError::Unavailable(_))
    }
}

/// A source plug-in
///
/// Descriptions are opaque to everything but the implementing source. The
/// contract for `parse_ref`/`parse_id` is that the stored description is
/// *canonical*: two raw descriptions the source considers equal parse to
/// structurally equal canonical forms, and `hash_description` of the
/// canonical form is what gets embedded in the ref.
pub trait Source: std::fmt::Debug {
    /// Registered name of this source
    fn name(&self) -> &str;

    /// Parse a raw description into a ref with a canonical description
    fn parse_ref(&self, name: &str, description: &Description) -> Result<PackageRef, SourceError>;

    /// Parse a raw description plus a version into a retrievable id
    fn parse_id(
        &self,
        name: &str,
        version: Version,
        description: &Description,
    ) -> Result<PackageId, SourceError>;

    /// Source-defined description equality (e.g. URLs modulo trailing slash)
    fn descriptions_equal(&self, a: &Description, b: &Description) -> bool;

    /// Source-defined description hash, consistent with `descriptions_equal`
    fn hash_description(&self, description: &Description) -> u64;

    /// All available versions of a ref, in source preference order
    /// (newest first). The order must be stable for identical inputs.
    fn list_versions(&self, package: &PackageRef) -> Result<Vec<PackageId>, SourceError>;

    /// The manifest of a concrete version
    fn describe_dependencies(&self, id: &PackageId) -> Result<PackageManifest, SourceError>;

    /// Download/locate the package content, returning a local directory.
    /// Used by the system cache; the solver never calls this.
    fn materialize(&self, id: &PackageId, cache_root: &Path) -> Result<PathBuf, SourceError>;
}

/// Dispatches identity and description operations to sources by name
pub struct SourceRegistry {
    sources: HashMap<String, Box<dyn Source>>,
    default_source: String,
}

impl SourceRegistry {
    /// An empty registry; `hosted` is the default source for bare
    /// version-constraint dependencies
    pub fn new() -> Self {
        SourceRegistry {
            sources: HashMap::new(),
            default_source: "hosted".to_string(),
        }
    }

    /// A registry with the standard sources registered
    pub fn with_defaults(project_root: PathBuf) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        registry.register(Box::new(HostedSource::new()?));
        registry.register(Box::new(PathSource::new(project_root)));
        registry.register(Box::new(GitSource::new()));
        Ok(registry)
    }

    /// Register a source under its own name, replacing any previous one
    pub fn register(&mut self, source: Box<dyn Source>) {
        self.sources.insert(source.name().to_string(), source);
    }

    /// Name of the source used for bare version-constraint dependencies
    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    /// Look up a source by name
    pub fn get(&self, name: &str) -> Result<&dyn Source, SourceError> {
        self.sources
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| SourceError::UnknownSource(name.to_string()))
    }

    /// The source owning a ref; root and magic refs have none
    pub fn source_of(&self, package: &PackageRef) -> Result<&dyn Source, SourceError> {
        match package.source() {
            Some(name) => self.get(name),
            None => Err(SourceError::UnknownSource(format!(
                "{} has no source",
                package.name()
            ))),
        }
    }

    /// Compare two raw descriptions through the owning source
    pub fn descriptions_equal(
        &self,
        source: &str,
        a: &Description,
        b: &Description,
    ) -> Result<bool, SourceError> {
        Ok(self.get(source)?.descriptions_equal(a, b))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
