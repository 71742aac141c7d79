//! Local path source
//!
//! Packages that live in a directory on disk, typically siblings in a
//! monorepo. The description is the package directory; it is normalized
//! lexically at parse time so `../lib/.` and `../lib` denote the same
//! package. A path package has exactly one version: whatever its manifest
//! declares.

use super::{Source, SourceError};
use crate::manifest::PackageManifest;
use crate::package::{Description, PackageId, PackageRef};
use crate::semver::Version;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Source for packages in local directories
#[derive(Debug)]
pub struct PathSource {
    /// Base for relative descriptions that carry no `relative-to` hint
    project_root: PathBuf,
}

impl PathSource {
    pub fn new(project_root: PathBuf) -> Self {
        PathSource {
            project_root: normalize(&project_root),
        }
    }

    /// Canonical directory for a raw description
    ///
    /// Accepts a bare path string or a table with `path` and an optional
    /// `relative-to` directory (the manifest's own location).
    fn canonical_dir(&self, description: &Description) -> Result<PathBuf, SourceError> {
        let (raw, relative_to) = match description {
            Description::String(s) => (s.as_str(), None),
            Description::Table(table) => {
                let raw = match table.get("path") {
                    Some(Description::String(s)) => s.as_str(),
                    _ => {
                        return Err(SourceError::parse(
                            "path description",
                            "expected a path",
                        ))
                    }
                };
                let relative_to = match table.get("relative-to") {
                    Some(Description::String(s)) => Some(PathBuf::from(s)),
                    _ => None,
                };
                (raw, relative_to)
            }
            _ => {
                return Err(SourceError::parse(
                    "path description",
                    "expected a path",
                ))
            }
        };

        let path = Path::new(raw);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            relative_to
                .unwrap_or_else(|| self.project_root.clone())
                .join(path)
        };
        Ok(normalize(&absolute))
    }

    fn dir_of(&self, package: &PackageRef) -> Result<PathBuf, SourceError> {
        let description = package.description().ok_or_else(|| {
            SourceError::parse("path ref", format!("{} has no description", package.name()))
        })?;
        self.canonical_dir(description)
    }

    fn load_manifest(&self, dir: &Path, expected_name: &str) -> Result<PackageManifest, SourceError> {
        let manifest_path = dir.join("keel.toml");
        if !manifest_path.exists() {
            return Err(SourceError::PackageNotFound(format!(
                "{} (no keel.toml in {})",
                expected_name,
                dir.display()
            )));
        }

        let manifest = PackageManifest::from_file(&manifest_path)
            .map_err(|e| SourceError::parse(manifest_path.display().to_string(), e))?;

        if manifest.package.name != expected_name {
            return Err(SourceError::parse(
                manifest_path.display().to_string(),
                format!(
                    "expected package '{}', found '{}'",
                    expected_name, manifest.package.name
                ),
            ));
        }

        Ok(manifest)
    }
}

impl Source for PathSource {
    fn name(&self) -> &str {
        "path"
    }

    fn parse_ref(&self, name: &str, description: &Description) -> Result<PackageRef, SourceError> {
        let dir = self.canonical_dir(description)?;
        let canonical = Description::String(dir.display().to_string());
        let hash = self.hash_description(&canonical);
        Ok(PackageRef::sourced(name, self.name(), canonical, hash))
    }

    fn parse_id(
        &self,
        name: &str,
        version: Version,
        description: &Description,
    ) -> Result<PackageId, SourceError> {
        Ok(self.parse_ref(name, description)?.with_version(version))
    }

    fn descriptions_equal(&self, a: &Description, b: &Description) -> bool {
        match (self.canonical_dir(a), self.canonical_dir(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn hash_description(&self, description: &Description) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self.canonical_dir(description) {
            Ok(dir) => dir.hash(&mut hasher),
            Err(_) => description.to_string().hash(&mut hasher),
        }
        hasher.finish()
    }

    fn list_versions(&self, package: &PackageRef) -> Result<Vec<PackageId>, SourceError> {
        let dir = self.dir_of(package)?;
        let manifest = self.load_manifest(&dir, package.name())?;
        let version = Version::parse(&manifest.package.version)
            .map_err(|e| SourceError::parse(dir.join("keel.toml").display().to_string(), e))?;
        Ok(vec![package.with_version(version)])
    }

    fn describe_dependencies(&self, id: &PackageId) -> Result<PackageManifest, SourceError> {
        let dir = self.dir_of(id.to_ref())?;
        self.load_manifest(&dir, id.name())
    }

    fn materialize(&self, id: &PackageId, _cache_root: &Path) -> Result<PathBuf, SourceError> {
        let dir = self.dir_of(id.to_ref())?;
        if !dir.is_dir() {
            return Err(SourceError::PackageNotFound(format!(
                "{} (missing directory {})",
                id.name(),
                dir.display()
            )));
        }
        Ok(dir)
    }
}

/// Collapse `.` and `..` components without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                match parts.last() {
                    Some(Component::Normal(_)) => {
                        parts.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => parts.push(component),
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Walk upward from `start` looking for a directory containing keel.toml
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.join("keel.toml").exists() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}
