//! Package manifest parsing (keel.toml)
//!
//! A manifest declares the package's own identity, its dependencies and
//! dev-dependencies, environment constraints (`[environment]`, resolved
//! against magic packages such as the `keel` SDK), and feature-gated
//! dependency groups (`[features.<name>]`).

use crate::package::{Description, PackageRange};
use crate::semver::{Constraint, SemverError, Version};
use crate::source::{Source, SourceRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during manifest parsing
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read manifest file
    #[error("Failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid manifest: {0}")]
    ValidationError(String),

    /// A dependency carries an unparsable version constraint
    #[error("Invalid version constraint for {package}: {error}")]
    InvalidConstraint {
        package: String,
        error: SemverError,
    },

    /// A dependency description was rejected by its source
    #[error("Invalid description for {package}: {message}")]
    InvalidDescription { package: String, message: String },
}

/// Package manifest (keel.toml)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    /// Package metadata
    pub package: PackageInfo,

    /// Runtime dependencies
    #[serde(default)]
    pub dependencies: BTreeMap<String, Dependency>,

    /// Development-only dependencies; only the root package's are resolved
    #[serde(default, rename = "dev-dependencies")]
    pub dev_dependencies: BTreeMap<String, Dependency>,

    /// Environment constraints, keyed by magic package name
    /// (e.g. `keel = "^3.0.0"` for the SDK)
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Feature-gated dependency groups, keyed by feature name
    #[serde(default)]
    pub features: BTreeMap<String, BTreeMap<String, Dependency>>,

    /// Directory the manifest was read from; not part of the file
    #[serde(skip)]
    pub manifest_dir: Option<PathBuf>,
}

/// Package information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageInfo {
    /// Package name (must be unique within a resolution)
    pub name: String,

    /// Semver version
    pub version: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Authors
    #[serde(default)]
    pub authors: Vec<String>,

    /// License identifier (SPDX)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Repository URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Dependency specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Dependency {
    /// Simple version constraint: "^1.2.0"
    Simple(String),

    /// Detailed dependency specification
    Detailed {
        /// Version constraint
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,

        /// Registry URL override (hosted packages)
        #[serde(skip_serializing_if = "Option::is_none")]
        registry: Option<String>,

        /// Local path dependency
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,

        /// Git repository URL
        #[serde(skip_serializing_if = "Option::is_none")]
        git: Option<String>,

        /// Git branch
        #[serde(skip_serializing_if = "Option::is_none")]
        branch: Option<String>,

        /// Git tag
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<String>,

        /// Git commit hash
        #[serde(skip_serializing_if = "Option::is_none")]
        rev: Option<String>,

        /// Features to enable on the target package
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        features: Vec<String>,
    },
}

impl PackageManifest {
    /// An empty manifest for a named package version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        PackageManifest {
            package: PackageInfo {
                name: name.into(),
                version: version.into(),
                description: None,
                authors: Vec::new(),
                license: None,
                repository: None,
            },
            dependencies: BTreeMap::new(),
            dev_dependencies: BTreeMap::new(),
            environment: BTreeMap::new(),
            features: BTreeMap::new(),
            manifest_dir: None,
        }
    }

    /// Parse a manifest from a file, remembering its directory for
    /// path-dependency resolution
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        let mut manifest = Self::from_str(&content)?;
        manifest.manifest_dir = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Parse a manifest from a string
    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        let manifest: PackageManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.package.name.is_empty() {
            return Err(ManifestError::ValidationError(
                "Package name cannot be empty".to_string(),
            ));
        }

        if !is_valid_package_name(&self.package.name) {
            return Err(ManifestError::ValidationError(format!(
                "Invalid package name: {}. Must contain only alphanumeric characters, hyphens, and underscores",
                self.package.name
            )));
        }

        Version::parse(&self.package.version).map_err(|e| {
            ManifestError::ValidationError(format!(
                "Invalid version {}: {}",
                self.package.version, e
            ))
        })?;

        for (name, dep) in self
            .dependencies
            .iter()
            .chain(&self.dev_dependencies)
            .chain(self.features.values().flatten())
        {
            validate_dependency(name, dep)?;
        }

        for feature in self.features.keys() {
            if feature.is_empty() {
                return Err(ManifestError::ValidationError(
                    "Feature name cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The manifest's own version, parsed
    pub fn version(&self) -> Result<Version, ManifestError> {
        Version::parse(&self.package.version).map_err(|e| ManifestError::InvalidConstraint {
            package: self.package.name.clone(),
            error: e,
        })
    }

    /// Runtime dependencies as solver ranges
    pub fn dependency_ranges(
        &self,
        sources: &SourceRegistry,
    ) -> Result<Vec<PackageRange>, ManifestError> {
        self.ranges_of(&self.dependencies, sources)
    }

    /// Dev-dependencies as solver ranges; callers must only use these for
    /// the root package
    pub fn dev_dependency_ranges(
        &self,
        sources: &SourceRegistry,
    ) -> Result<Vec<PackageRange>, ManifestError> {
        self.ranges_of(&self.dev_dependencies, sources)
    }

    /// The conditional dependency group gated by one feature
    pub fn feature_ranges(
        &self,
        feature: &str,
        sources: &SourceRegistry,
    ) -> Result<Vec<PackageRange>, ManifestError> {
        match self.features.get(feature) {
            Some(group) => self.ranges_of(group, sources),
            None => Ok(Vec::new()),
        }
    }

    /// Declared feature names
    pub fn declared_features(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    /// Environment constraints as ranges over magic packages
    pub fn environment_ranges(&self) -> Result<Vec<PackageRange>, ManifestError> {
        let mut ranges = Vec::new();
        for (name, raw) in &self.environment {
            let constraint =
                Constraint::parse(raw).map_err(|e| ManifestError::InvalidConstraint {
                    package: name.clone(),
                    error: e,
                })?;
            ranges.push(crate::package::PackageRef::magic(name).with_constraint(constraint));
        }
        Ok(ranges)
    }

    fn ranges_of(
        &self,
        deps: &BTreeMap<String, Dependency>,
        sources: &SourceRegistry,
    ) -> Result<Vec<PackageRange>, ManifestError> {
        deps.iter()
            .map(|(name, dep)| dep.to_range(name, self.manifest_dir.as_deref(), sources))
            .collect()
    }
}

impl Dependency {
    /// Get the version constraint (if any)
    pub fn version(&self) -> Option<&str> {
        match self {
            Dependency::Simple(v) => Some(v.as_str()),
            Dependency::Detailed { version, .. } => version.as_deref(),
        }
    }

    /// Check if this is a path dependency
    pub fn is_path(&self) -> bool {
        matches!(self, Dependency::Detailed { path: Some(_), .. })
    }

    /// Check if this is a git dependency
    pub fn is_git(&self) -> bool {
        matches!(self, Dependency::Detailed { git: Some(_), .. })
    }

    /// Lower this dependency to a solver range, dispatching the raw
    /// description to the owning source for canonicalization
    pub fn to_range(
        &self,
        name: &str,
        manifest_dir: Option<&Path>,
        sources: &SourceRegistry,
    ) -> Result<PackageRange, ManifestError> {
        let constraint = match self.version() {
            Some(raw) => Constraint::parse(raw).map_err(|e| ManifestError::InvalidConstraint {
                package: name.to_string(),
                error: e,
            })?,
            None => Constraint::Any,
        };

        let (source_name, raw_description) = self.raw_description(manifest_dir, sources);

        let source = sources.get(&source_name).map_err(|e| {
            ManifestError::InvalidDescription {
                package: name.to_string(),
                message: e.to_string(),
            }
        })?;
        let package = source.parse_ref(name, &raw_description).map_err(|e| {
            ManifestError::InvalidDescription {
                package: name.to_string(),
                message: e.to_string(),
            }
        })?;

        let features: BTreeSet<String> = match self {
            Dependency::Simple(_) => BTreeSet::new(),
            Dependency::Detailed { features, .. } => features.iter().cloned().collect(),
        };

        Ok(package.with_constraint(constraint).with_features(features))
    }

    fn raw_description(
        &self,
        manifest_dir: Option<&Path>,
        sources: &SourceRegistry,
    ) -> (String, Description) {
        match self {
            Dependency::Simple(_) => (
                sources.default_source().to_string(),
                Description::String(String::new()),
            ),
            Dependency::Detailed {
                registry,
                path,
                git,
                branch,
                tag,
                rev,
                ..
            } => {
                if let Some(path) = path {
                    let mut table = toml::Table::new();
                    table.insert("path".into(), Description::String(path.clone()));
                    if let Some(dir) = manifest_dir {
                        table.insert(
                            "relative-to".into(),
                            Description::String(dir.display().to_string()),
                        );
                    }
                    ("path".to_string(), Description::Table(table))
                } else if let Some(git) = git {
                    let mut table = toml::Table::new();
                    table.insert("url".into(), Description::String(git.clone()));
                    if let Some(branch) = branch {
                        table.insert("branch".into(), Description::String(branch.clone()));
                    }
                    if let Some(tag) = tag {
                        table.insert("tag".into(), Description::String(tag.clone()));
                    }
                    if let Some(rev) = rev {
                        table.insert("rev".into(), Description::String(rev.clone()));
                    }
                    ("git".to_string(), Description::Table(table))
                } else {
                    (
                        sources.default_source().to_string(),
                        Description::String(registry.clone().unwrap_or_default()),
                    )
                }
            }
        }
    }
}

/// Validate a package name (alphanumeric, hyphens, underscores)
fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

/// Validate a dependency specification
fn validate_dependency(name: &str, dep: &Dependency) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::ValidationError(
            "Dependency name cannot be empty".to_string(),
        ));
    }

    match dep {
        Dependency::Simple(version) => {
            if version.is_empty() {
                return Err(ManifestError::ValidationError(format!(
                    "Dependency '{}' has empty version",
                    name
                )));
            }
        }
        Dependency::Detailed {
            version,
            path,
            git,
            branch,
            tag,
            rev,
            ..
        } => {
            if version.is_none() && path.is_none() && git.is_none() {
                return Err(ManifestError::ValidationError(format!(
                    "Dependency '{}' must specify version, path, or git",
                    name
                )));
            }

            if path.is_some() && git.is_some() {
                return Err(ManifestError::ValidationError(format!(
                    "Dependency '{}' cannot be both a path and a git dependency",
                    name
                )));
            }

            if git.is_none() && (branch.is_some() || tag.is_some() || rev.is_some()) {
                return Err(ManifestError::ValidationError(format!(
                    "Dependency '{}' sets a git reference without a git url",
                    name
                )));
            }

            let refs = [branch.is_some(), tag.is_some(), rev.is_some()]
                .iter()
                .filter(|&&set| set)
                .count();
            if refs > 1 {
                return Err(ManifestError::ValidationError(format!(
                    "Dependency '{}' can set at most one of branch, tag, rev",
                    name
                )));
            }
        }
    }

    Ok(())
}
