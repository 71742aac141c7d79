//! In-memory source
//!
//! A deterministic source backed by a map instead of a network or
//! filesystem. Solver tests register one under the name the dependencies
//! expect (usually `hosted`) and script exactly which versions exist and
//! what each version depends on.

use super::{Source, SourceError};
use crate::manifest::PackageManifest;
use crate::package::{Description, PackageId, PackageRef};
use crate::semver::Version;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Map-backed source for tests and offline tooling
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    packages: BTreeMap<String, BTreeMap<Version, PackageManifest>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        MemorySource {
            name: name.into(),
            packages: BTreeMap::new(),
        }
    }

    /// Add a version with an empty manifest
    pub fn add(&mut self, package: &str, version: &str) -> &mut Self {
        self.add_with(package, version, |_| {})
    }

    /// Add a version, then let the caller fill in the manifest
    pub fn add_with(
        &mut self,
        package: &str,
        version: &str,
        configure: impl FnOnce(&mut PackageManifest),
    ) -> &mut Self {
        let parsed = Version::parse(version).expect("test version must be valid semver");
        let mut manifest = PackageManifest::new(package, version);
        configure(&mut manifest);
        self.packages
            .entry(package.to_string())
            .or_default()
            .insert(parsed, manifest);
        self
    }

    /// The shared canonical description for every ref of this source
    fn canonical(&self) -> Description {
        Description::String(self.name.clone())
    }

    /// A ref for a package served by this source
    pub fn ref_for(&self, package: &str) -> PackageRef {
        let canonical = self.canonical();
        let hash = self.hash_description(&canonical);
        PackageRef::sourced(package, &self.name, canonical, hash)
    }

    /// An id for a package version served by this source
    pub fn id_for(&self, package: &str, version: &str) -> PackageId {
        self.ref_for(package)
            .with_version(Version::parse(version).expect("test version must be valid semver"))
    }
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_ref(&self, name: &str, _description: &Description) -> Result<PackageRef, SourceError> {
        Ok(self.ref_for(name))
    }

    fn parse_id(
        &self,
        name: &str,
        version: Version,
        _description: &Description,
    ) -> Result<PackageId, SourceError> {
        Ok(self.ref_for(name).with_version(version))
    }

    fn descriptions_equal(&self, _a: &Description, _b: &Description) -> bool {
        // All descriptions collapse to the same canonical form
        true
    }

    fn hash_description(&self, _description: &Description) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name.hash(&mut hasher);
        hasher.finish()
    }

    fn list_versions(&self, package: &PackageRef) -> Result<Vec<PackageId>, SourceError> {
        let versions = match self.packages.get(package.name()) {
            Some(versions) => versions,
            None => return Ok(Vec::new()),
        };
        // Newest first
        Ok(versions
            .keys()
            .rev()
            .map(|v| package.with_version(v.clone()))
            .collect())
    }

    fn describe_dependencies(&self, id: &PackageId) -> Result<PackageManifest, SourceError> {
        self.packages
            .get(id.name())
            .and_then(|versions| versions.get(id.version()))
            .cloned()
            .ok_or_else(|| SourceError::VersionNotFound {
                package: id.name().to_string(),
                version: id.version().to_string(),
            })
    }

    fn materialize(&self, id: &PackageId, _cache_root: &Path) -> Result<PathBuf, SourceError> {
        Err(SourceError::Unavailable(format!(
            "memory source cannot materialize {}",
            id
        )))
    }
}
