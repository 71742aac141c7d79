//! Git repository source
//!
//! Packages fetched by cloning a git repository. The description is the
//! repository URL plus at most one of `branch`, `tag`, or `rev`; omitting
//! all three means the remote's default branch. Like path packages, a git
//! package exposes exactly one version, read from the manifest at the
//! requested reference.

use super::{Source, SourceError};
use crate::manifest::PackageManifest;
use crate::package::{Description, PackageId, PackageRef};
use crate::semver::Version;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Source for packages in git repositories
#[derive(Debug)]
pub struct GitSource {
    /// Directory clones are kept under
    root: PathBuf,
}

/// Parsed and canonicalized git description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GitDescription {
    url: String,
    reference: GitReference,
}

/// A git reference (branch, tag, or revision)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GitReference {
    Branch(String),
    Tag(String),
    Rev(String),
    DefaultBranch,
}

impl GitSource {
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".keel")
            .join("cache")
            .join("git");
        GitSource { root }
    }

    /// Keep clones under an explicit directory (tests, alternate caches)
    pub fn with_root(root: PathBuf) -> Self {
        GitSource { root }
    }

    fn parse_description(description: &Description) -> Result<GitDescription, SourceError> {
        let invalid = |message: &str| SourceError::parse("git description", message);

        let table = match description {
            Description::Table(table) => table,
            Description::String(url) => {
                return Ok(GitDescription {
                    url: url.trim_end_matches('/').to_string(),
                    reference: GitReference::DefaultBranch,
                });
            }
            _ => return Err(invalid("expected a url or a table")),
        };

        let url = match table.get("url") {
            Some(Description::String(url)) => url.trim_end_matches('/').to_string(),
            _ => return Err(invalid("missing url")),
        };

        let get = |key: &str| match table.get(key) {
            Some(Description::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid("reference must be a string")),
            None => Ok(None),
        };
        let branch = get("branch")?;
        let tag = get("tag")?;
        let rev = get("rev")?;

        let reference = match (branch, tag, rev) {
            (Some(b), None, None) => GitReference::Branch(b),
            (None, Some(t), None) => GitReference::Tag(t),
            (None, None, Some(r)) => GitReference::Rev(r),
            (None, None, None) => GitReference::DefaultBranch,
            _ => return Err(invalid("at most one of branch, tag, rev")),
        };

        Ok(GitDescription { url, reference })
    }

    fn canonical(description: &GitDescription) -> Description {
        let mut table = toml::Table::new();
        table.insert("url".into(), Description::String(description.url.clone()));
        match &description.reference {
            GitReference::Branch(b) => {
                table.insert("branch".into(), Description::String(b.clone()));
            }
            GitReference::Tag(t) => {
                table.insert("tag".into(), Description::String(t.clone()));
            }
            GitReference::Rev(r) => {
                table.insert("rev".into(), Description::String(r.clone()));
            }
            GitReference::DefaultBranch => {}
        }
        Description::Table(table)
    }

    fn description_of(&self, package: &PackageRef) -> Result<GitDescription, SourceError> {
        let description = package.description().ok_or_else(|| {
            SourceError::parse("git ref", format!("{} has no description", package.name()))
        })?;
        Self::parse_description(description)
    }

    /// Clone the repository at the requested reference, reusing an earlier
    /// checkout when one exists
    fn ensure_checkout(&self, description: &GitDescription) -> Result<PathBuf, SourceError> {
        let mut hasher = DefaultHasher::new();
        description.hash(&mut hasher);
        let dir = self.root.join(format!("{:016x}", hasher.finish()));

        if dir.join(".git").exists() {
            return Ok(dir);
        }
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }

        let target = dir.display().to_string();
        match &description.reference {
            GitReference::Branch(name) | GitReference::Tag(name) => {
                run_git(&[
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    name.as_str(),
                    description.url.as_str(),
                    target.as_str(),
                ])?;
            }
            GitReference::DefaultBranch => {
                run_git(&[
                    "clone",
                    "--depth",
                    "1",
                    description.url.as_str(),
                    target.as_str(),
                ])?;
            }
            GitReference::Rev(rev) => {
                run_git(&["clone", description.url.as_str(), target.as_str()])?;
                run_git(&["-C", target.as_str(), "checkout", rev.as_str()])?;
            }
        }

        Ok(dir)
    }

    fn load_manifest(&self, dir: &Path, expected_name: &str) -> Result<PackageManifest, SourceError> {
        let manifest_path = dir.join("keel.toml");
        if !manifest_path.exists() {
            return Err(SourceError::PackageNotFound(format!(
                "{} (no keel.toml in repository)",
                expected_name
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

impl Default for GitSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for GitSource {
    fn name(&self) -> &str {
        "git"
    }

    fn parse_ref(&self, name: &str, description: &Description) -> Result<PackageRef, SourceError> {
        let parsed = Self::parse_description(description)?;
        let canonical = Self::canonical(&parsed);
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
        match (Self::parse_description(a), Self::parse_description(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn hash_description(&self, description: &Description) -> u64 {
        let mut hasher = DefaultHasher::new();
        match Self::parse_description(description) {
            Ok(parsed) => parsed.hash(&mut hasher),
            Err(_) => description.to_string().hash(&mut hasher),
        }
        hasher.finish()
    }

    fn list_versions(&self, package: &PackageRef) -> Result<Vec<PackageId>, SourceError> {
        let description = self.description_of(package)?;
        let dir = self.ensure_checkout(&description)?;
        let manifest = self.load_manifest(&dir, package.name())?;
        let version = Version::parse(&manifest.package.version)
            .map_err(|e| SourceError::parse(dir.join("keel.toml").display().to_string(), e))?;
        Ok(vec![package.with_version(version)])
    }

    fn describe_dependencies(&self, id: &PackageId) -> Result<PackageManifest, SourceError> {
        let description = self.description_of(id.to_ref())?;
        let dir = self.ensure_checkout(&description)?;
        self.load_manifest(&dir, id.name())
    }

    fn materialize(&self, id: &PackageId, _cache_root: &Path) -> Result<PathBuf, SourceError> {
        let description = self.description_of(id.to_ref())?;
        self.ensure_checkout(&description)
    }
}

fn run_git(args: &[&str]) -> Result<(), SourceError> {
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| SourceError::Unavailable(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(SourceError::Unavailable(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
