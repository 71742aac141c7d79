//! Keel Package Manager Library
//!
//! This crate provides the dependency resolution core of the Keel package
//! manager:
//! - Package identity (refs, ids, ranges) with source-owned descriptions
//! - Source plug-ins (hosted registry, git, local path) behind one trait
//! - Package manifest parsing (keel.toml)
//! - Lockfile management (keel.lock)
//! - Semver parsing and constraint algebra
//! - The backtracking version solver with conflict explanation
//! - The system cache for materialized package content

pub mod cache;
pub mod lockfile;
pub mod manifest;
pub mod package;
pub mod semver;
pub mod solver;
pub mod source;

pub use cache::{CacheError, SystemCache};
pub use lockfile::{LockedPackage, Lockfile, LockfileError, LOCKFILE_VERSION};
pub use manifest::{Dependency, ManifestError, PackageInfo, PackageManifest};
pub use package::{Description, Origin, PackageId, PackageRange, PackageRef};
pub use semver::{Constraint, SemverError, Version, VersionInterval};
pub use solver::{FailureReport, Resolution, SolveError, SolveMode, VersionSolver};
pub use source::{
    find_project_root, GitSource, HostedSource, MemorySource, PathSource, Source, SourceError,
    SourceRegistry, DEFAULT_REGISTRY,
};
