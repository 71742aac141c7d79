//! Version cache
//!
//! Memoizes each ref's candidate list for the lifetime of one resolution.
//! Lists are fetched lazily from the owning source, normalized to
//! newest-first order, and never invalidated mid-solve, so repeated queries
//! during backtracking are free and deterministic.

use crate::package::{PackageId, PackageRef};
use crate::source::{Source, SourceError, SourceRegistry};
use std::collections::HashMap;

/// Lazily fetched, memoized candidate lists per ref
#[derive(Debug, Default)]
pub struct VersionCache {
    versions: HashMap<PackageRef, Vec<PackageId>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The candidates for a ref, newest first
    ///
    /// Ids whose versions compare equal keep the source's listing order
    /// (stable sort), which is the tie-break rule for identical versions
    /// reachable through different ids.
    pub fn list(
        &mut self,
        sources: &SourceRegistry,
        package: &PackageRef,
    ) -> Result<&[PackageId], SourceError> {
        if !self.versions.contains_key(package) {
            let source = sources.source_of(package)?;
            let mut ids = source.list_versions(package)?;
            ids.sort_by(|a, b| b.version().cmp(a.version()));
            tracing::trace!(package = %package, count = ids.len(), "fetched versions");
            self.versions.insert(package.clone(), ids);
        }
        Ok(self.versions[package].as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SourceRegistry};

    #[test]
    fn test_list_is_memoized_and_sorted() {
        let mut hosted = MemorySource::new("hosted");
        hosted.add("http", "1.0.0").add("http", "2.0.0").add("http", "1.5.0");
        let package = hosted.ref_for("http");

        let mut sources = SourceRegistry::new();
        sources.register(Box::new(hosted));

        let mut cache = VersionCache::new();
        let first: Vec<String> = cache
            .list(&sources, &package)
            .unwrap()
            .iter()
            .map(|id| id.version().to_string())
            .collect();
        assert_eq!(first, ["2.0.0", "1.5.0", "1.0.0"]);

        // A second query returns the memoized list
        let again = cache.list(&sources, &package).unwrap().len();
        assert_eq!(again, 3);
    }

    #[test]
    fn test_unknown_source_surfaces() {
        let sources = SourceRegistry::new();
        let orphan = MemorySource::new("hosted").ref_for("http");
        let mut cache = VersionCache::new();
        assert!(cache.list(&sources, &orphan).is_err());
    }
}
