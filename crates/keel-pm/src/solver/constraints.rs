//! Constraint store
//!
//! For every ref the solver has seen, the store keeps the multiset of
//! requirements imposed by selected packages, indexed by cause. Adding a
//! requirement intersects it with the accumulated interval; when the
//! intersection becomes empty the add is rejected and the full cause set is
//! handed back for backtracking. Removing a cause (on backtrack) recomputes
//! the intersection from whatever remains.

use crate::package::{PackageId, PackageRange, PackageRef};
use crate::semver::VersionInterval;
use std::collections::{BTreeSet, HashMap};

/// One requirement imposed on a package, with the id that imposed it
#[derive(Debug, Clone)]
pub struct Imposed {
    pub range: PackageRange,
    pub cause: PackageId,
}

/// The accumulated requirements on a package admit no version
#[derive(Debug, Clone)]
pub struct StoreConflict {
    /// The over-constrained package
    pub package: PackageRef,

    /// Every requirement involved, oldest first; the rejected incoming
    /// requirement is last
    pub requirements: Vec<Imposed>,
}

/// Per-ref accumulated version constraints
#[derive(Debug, Default)]
pub struct ConstraintStore {
    imposed: HashMap<PackageRef, Vec<Imposed>>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intersect a new requirement in
    ///
    /// On an empty intersection the store is left unchanged and the
    /// conflict carries every contributing requirement.
    pub fn add(&mut self, range: PackageRange, cause: PackageId) -> Result<(), StoreConflict> {
        let target = range.to_ref().clone();
        let existing = self.imposed.entry(target.clone()).or_default();

        let mut interval = range.constraint().to_interval();
        for imposed in existing.iter() {
            interval = interval.intersect(&imposed.range.constraint().to_interval());
        }

        if interval.is_empty() {
            let mut requirements = existing.clone();
            requirements.push(Imposed { range, cause });
            return Err(StoreConflict {
                package: target,
                requirements,
            });
        }

        existing.push(Imposed { range, cause });
        Ok(())
    }

    /// Drop every requirement a cause imposed (used on backtrack),
    /// returning the removed ranges
    pub fn remove_cause(&mut self, cause: &PackageId) -> Vec<PackageRange> {
        let mut removed = Vec::new();
        for imposed in self.imposed.values_mut() {
            imposed.retain(|i| {
                if i.cause == *cause {
                    removed.push(i.range.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.imposed.retain(|_, imposed| !imposed.is_empty());
        removed
    }

    /// All requirements currently imposed on a package, oldest first
    pub fn requirements(&self, package: &PackageRef) -> &[Imposed] {
        self.imposed.get(package).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The intersection of every constraint on a package
    pub fn interval(&self, package: &PackageRef) -> VersionInterval {
        self.requirements(package)
            .iter()
            .fold(VersionInterval::any(), |acc, imposed| {
                acc.intersect(&imposed.range.constraint().to_interval())
            })
    }

    /// Whether an id satisfies every requirement on its ref
    pub fn allows(&self, id: &PackageId) -> bool {
        self.requirements(id.to_ref())
            .iter()
            .all(|imposed| imposed.range.constraint().matches(id.version()))
    }

    /// Union of the feature sets requested across all requirements
    pub fn features(&self, package: &PackageRef) -> BTreeSet<String> {
        self.requirements(package)
            .iter()
            .flat_map(|imposed| imposed.range.features().iter().cloned())
            .collect()
    }

    /// A conflict for a package whose candidates are exhausted, built from
    /// the current requirements
    pub fn conflict_for(&self, package: &PackageRef) -> StoreConflict {
        StoreConflict {
            package: package.clone(),
            requirements: self.requirements(package).to_vec(),
        }
    }
}
