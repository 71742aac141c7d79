//! Lockfile management (keel.lock)
//!
//! Records the exact version, source, and description of every package a
//! resolution selected, so later runs retrieve identical bits. The solver
//! reads a prior lockfile as a *bias* (preferred candidates), never as a
//! constraint, and emits a fresh one on success.

use crate::cache::SystemCache;
use crate::package::{Description, PackageId};
use crate::semver::Version;
use crate::source::{Source, SourceRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during lockfile operations
#[derive(Debug, Error)]
pub enum LockfileError {
    /// Failed to read lockfile
    #[error("Failed to read lockfile: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse lockfile: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize lockfile
    #[error("Failed to serialize lockfile: {0}")]
    SerializeError(String),

    /// Validation error
    #[error("Invalid lockfile: {0}")]
    ValidationError(String),

    /// A locked entry could not be turned back into a package id
    #[error("Failed to rehydrate locked package {package}: {message}")]
    Rehydrate { package: String, message: String },
}

/// Lockfile format version
pub const LOCKFILE_VERSION: u32 = 1;

/// Lockfile (keel.lock)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lockfile {
    /// Lockfile format version
    pub version: u32,

    /// Root package name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Locked packages, ascending by name
    #[serde(default)]
    pub packages: Vec<LockedPackage>,
}

/// A locked package: everything needed to retrieve one exact version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockedPackage {
    /// Package name
    pub name: String,

    /// Exact version
    pub version: String,

    /// Owning source name; absent only for synthetic entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// SHA-256 checksum of the package archive, when the source records one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Names of this package's direct dependencies within the resolution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Source-specific description (opaque outside the source); kept last
    /// so table-shaped descriptions serialize after the scalar fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,
}

impl Lockfile {
    /// Create a new empty lockfile
    pub fn new(root: Option<String>) -> Self {
        Self {
            version: LOCKFILE_VERSION,
            root,
            packages: Vec::new(),
        }
    }

    /// Parse a lockfile from a file
    pub fn from_file(path: &Path) -> Result<Self, LockfileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a lockfile from a string
    pub fn from_str(content: &str) -> Result<Self, LockfileError> {
        let lockfile: Lockfile = toml::from_str(content)?;
        lockfile.validate()?;
        Ok(lockfile)
    }

    /// Validate the lockfile
    pub fn validate(&self) -> Result<(), LockfileError> {
        if self.version != LOCKFILE_VERSION {
            return Err(LockfileError::ValidationError(format!(
                "Unsupported lockfile version: {} (expected {})",
                self.version, LOCKFILE_VERSION
            )));
        }

        for pkg in &self.packages {
            if pkg.name.is_empty() {
                return Err(LockfileError::ValidationError(
                    "Package name cannot be empty".to_string(),
                ));
            }

            Version::parse(&pkg.version).map_err(|e| {
                LockfileError::ValidationError(format!(
                    "Package '{}' has invalid version: {}",
                    pkg.name, e
                ))
            })?;

            if let Some(checksum) = &pkg.checksum {
                if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(LockfileError::ValidationError(format!(
                        "Package '{}' has invalid checksum (must be 64 hex characters)",
                        pkg.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize with deterministic ordering
    pub fn serialize(&self) -> Result<String, LockfileError> {
        let mut sorted = self.clone();
        sorted.sort_packages();
        toml::to_string_pretty(&sorted).map_err(|e| LockfileError::SerializeError(e.to_string()))
    }

    /// Write lockfile to a file
    pub fn to_file(&self, path: &Path) -> Result<(), LockfileError> {
        std::fs::write(path, self.serialize()?)?;
        Ok(())
    }

    /// Add a locked package, replacing any existing entry with the name
    pub fn add_package(&mut self, package: LockedPackage) {
        self.packages.retain(|p| p.name != package.name);
        self.packages.push(package);
    }

    /// Get a locked package by name
    pub fn get_package(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Rehydrate the locked id for a package through its source
    ///
    /// Returns `Ok(None)` when the package is not locked; an entry that can
    /// no longer be parsed is an error.
    pub fn id_for(
        &self,
        name: &str,
        sources: &SourceRegistry,
    ) -> Result<Option<PackageId>, LockfileError> {
        let Some(locked) = self.get_package(name) else {
            return Ok(None);
        };

        let rehydrate = |message: String| LockfileError::Rehydrate {
            package: name.to_string(),
            message,
        };

        let version = Version::parse(&locked.version).map_err(|e| rehydrate(e.to_string()))?;
        let source_name = locked
            .source
            .as_deref()
            .ok_or_else(|| rehydrate("entry has no source".to_string()))?;
        let source = sources
            .get(source_name)
            .map_err(|e| rehydrate(e.to_string()))?;

        let description = locked
            .description
            .clone()
            .unwrap_or(Description::String(String::new()));
        let id = source
            .parse_id(name, version, &description)
            .map_err(|e| rehydrate(e.to_string()))?;
        Ok(Some(id))
    }

    /// Sort packages by name (for deterministic output)
    pub fn sort_packages(&mut self) {
        self.packages.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Emit the flat name-to-location map consumed by the Keel runtime
    ///
    /// Each locked package is materialized through the cache and mapped to
    /// its `src` directory; the root package maps to the project's own.
    pub fn packages_file(
        &self,
        cache: &SystemCache,
        sources: &SourceRegistry,
        root_name: &str,
    ) -> Result<String, LockfileError> {
        let mut out = String::from("# Generated by keelpm. Do not edit.\n");

        let mut sorted = self.packages.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for locked in &sorted {
            let id = self
                .id_for(&locked.name, sources)?
                .ok_or_else(|| LockfileError::Rehydrate {
                    package: locked.name.clone(),
                    message: "entry disappeared while emitting".to_string(),
                })?;
            let dir = cache
                .materialize(&id, sources)
                .map_err(|e| LockfileError::Rehydrate {
                    package: locked.name.clone(),
                    message: e.to_string(),
                })?;
            out.push_str(&format!("{}:{}/src\n", locked.name, dir.display()));
        }

        out.push_str(&format!("{}:src\n", root_name));
        Ok(out)
    }
}
