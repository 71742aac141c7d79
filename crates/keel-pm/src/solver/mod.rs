//! Version solving
//!
//! A single-threaded backtracking search over package versions. The solver
//! seeds itself from the root manifest, repeatedly propagates forced
//! selections (refs with exactly one allowed candidate), decides among the
//! remaining candidates with lockfile-biased ordering, and expands each
//! selection's manifest into new constraints. An empty intersection
//! triggers a walk back through the derivation graph to the most recent
//! decision that can change the outcome; exhausting the stack produces a
//! human-readable failure report.
//!
//! Given identical inputs and identical source responses, the sequence of
//! selections, conflicts, and the final lockfile is deterministic.

mod candidates;
mod constraints;
mod derivation;
mod report;

pub use report::FailureReport;

use crate::lockfile::{LockedPackage, Lockfile};
use crate::manifest::{ManifestError, PackageManifest};
use crate::package::{PackageId, PackageRange, PackageRef};
use crate::semver::Version;
use crate::source::{Source, SourceError, SourceRegistry};
use candidates::VersionCache;
use constraints::{ConstraintStore, StoreConflict};
use derivation::{DerivationGraph, SelectionKind};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors that can occur during version solving
#[derive(Debug, Error)]
pub enum SolveError {
    /// Malformed root manifest or dependency declaration
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Source failure: unknown source, bad description, or transport error
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A required package has no versions at all
    #[error("No versions of {package} match {constraint}")]
    NoVersions { package: String, constraint: String },

    /// An environment constraint names something the environment lacks
    #[error("The current environment does not define {name}")]
    UnknownEnvironment { name: String },

    /// One package name is required from two incompatible origins
    #[error("{name} is required from conflicting origins: {existing} and {conflicting}")]
    SourceMismatch {
        name: String,
        existing: String,
        conflicting: String,
    },

    /// The search space is exhausted
    #[error("Version solving failed.\n{0}")]
    Unsatisfiable(FailureReport),

    /// A conflict on a magic package (e.g. the SDK version)
    #[error("Version solving failed.\n{0}")]
    SdkIncompatible(FailureReport),
}

impl SolveError {
    /// Whether the failure came from a source transport problem
    pub fn is_transport(&self) -> bool {
        matches!(self, SolveError::Source(e) if e.is_transport())
    }
}

/// What the front-end asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMode {
    /// Honor the lockfile wherever constraints still allow it
    Get,

    /// Ignore the lockfile bias for unlocked packages, preferring newer
    /// versions
    Upgrade,

    /// Like upgrade, but prefer the oldest allowed versions
    Downgrade,
}

/// A successful resolution: one id per package
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The root package's id
    pub root: PackageId,

    /// Selected non-root packages by name
    pub packages: BTreeMap<String, PackageId>,

    /// Direct dependency names of each selected package, restricted to the
    /// resolution
    dependencies: BTreeMap<String, Vec<String>>,
}

impl Resolution {
    /// Emit the resolution as a lockfile
    pub fn to_lockfile(&self) -> Lockfile {
        let mut lockfile = Lockfile::new(Some(self.root.name().to_string()));
        for (name, id) in &self.packages {
            lockfile.add_package(LockedPackage {
                name: name.clone(),
                version: id.version().to_string(),
                source: id.source().map(str::to_string),
                description: id.description().cloned(),
                checksum: None,
                dependencies: self.dependencies.get(name).cloned().unwrap_or_default(),
            });
        }
        lockfile.sort_packages();
        lockfile
    }
}

/// The solver entry point
///
/// Built with a source registry and a root manifest, optionally biased by a
/// prior lockfile, then consumed by [`solve`](VersionSolver::solve).
pub struct VersionSolver<'a> {
    sources: &'a SourceRegistry,
    root: PackageManifest,
    lockfile: Option<Lockfile>,
    mode: SolveMode,
    unlock: BTreeSet<String>,
    environment: BTreeMap<String, Version>,
}

impl<'a> VersionSolver<'a> {
    pub fn new(sources: &'a SourceRegistry, root: PackageManifest) -> Self {
        VersionSolver {
            sources,
            root,
            lockfile: None,
            mode: SolveMode::Get,
            unlock: BTreeSet::new(),
            environment: BTreeMap::new(),
        }
    }

    /// Bias candidate ordering with a prior lockfile
    pub fn with_lockfile(mut self, lockfile: Lockfile) -> Self {
        self.lockfile = Some(lockfile);
        self
    }

    pub fn with_mode(mut self, mode: SolveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Packages whose lockfile pin may be discarded. Empty means "none"
    /// for get and "all" for upgrade/downgrade.
    pub fn with_unlocked(mut self, packages: impl IntoIterator<Item = String>) -> Self {
        self.unlock.extend(packages);
        self
    }

    /// Pin a magic package (e.g. the `keel` SDK) at a version for this
    /// resolution
    pub fn with_environment(mut self, name: impl Into<String>, version: Version) -> Self {
        self.environment.insert(name.into(), version);
        self
    }

    /// Run the search to completion
    pub fn solve(self) -> Result<Resolution, SolveError> {
        Search::run(self)
    }
}

/// One entry on the selection stack
struct Selection {
    id: PackageId,
    kind: SelectionKind,
}

/// Signals whether a registration completed or unwound the stack
enum Outcome {
    Continue,
    Backtracked,
}

/// In-flight search state, owned by one resolution
struct Search<'a> {
    sources: &'a SourceRegistry,
    lockfile: Option<Lockfile>,
    mode: SolveMode,
    unlock: BTreeSet<String>,
    environment: BTreeMap<String, Version>,

    root_id: PackageId,
    constraints: ConstraintStore,
    graph: DerivationGraph,
    versions: VersionCache,
    manifests: HashMap<PackageId, PackageManifest>,

    decisions: Vec<Selection>,
    selected: HashMap<PackageRef, PackageId>,
    pending: VecDeque<PackageRef>,
    pending_set: HashSet<PackageRef>,

    /// Candidates ruled out by backtracking, scoped to the stack depth at
    /// which they were ruled out
    failed: HashMap<PackageRef, Vec<(usize, Version)>>,

    /// Features already expanded per selected ref
    expanded_features: HashMap<PackageRef, BTreeSet<String>>,

    /// One identity per name: the ref each name is bound to, refcounted by
    /// live requirements
    names: HashMap<String, (PackageRef, usize)>,
}

impl<'a> Search<'a> {
    fn run(solver: VersionSolver<'a>) -> Result<Resolution, SolveError> {
        let root_version = solver.root.version()?;
        let root_ref = PackageRef::root(&solver.root.package.name);
        let root_id = root_ref.with_version(root_version);

        let mut search = Search {
            sources: solver.sources,
            lockfile: solver.lockfile,
            mode: solver.mode,
            unlock: solver.unlock,
            environment: solver.environment,
            root_id: root_id.clone(),
            constraints: ConstraintStore::new(),
            graph: DerivationGraph::new(),
            versions: VersionCache::new(),
            manifests: HashMap::new(),
            decisions: Vec::new(),
            selected: HashMap::new(),
            pending: VecDeque::new(),
            pending_set: HashSet::new(),
            failed: HashMap::new(),
            expanded_features: HashMap::new(),
            names: HashMap::new(),
        };

        search.manifests.insert(root_id.clone(), solver.root);
        search.selected.insert(root_ref.clone(), root_id.clone());
        search.names.insert(root_id.name().to_string(), (root_ref, 1));

        search.seed()?;
        search.search()
    }

    /// Register the root's dependencies, dev-dependencies, and environment
    /// constraints, all caused by the root itself
    fn seed(&mut self) -> Result<(), SolveError> {
        let root_id = self.root_id.clone();
        let manifest = self.manifest_for(&root_id)?;

        let mut ranges = manifest.dependency_ranges(self.sources)?;
        ranges.extend(manifest.dev_dependency_ranges(self.sources)?);
        ranges.extend(manifest.environment_ranges()?);

        for range in ranges {
            // The stack is empty, so a conflict here is terminal and
            // register surfaces it as an error
            self.register(range, &root_id)?;
        }
        Ok(())
    }

    fn search(mut self) -> Result<Resolution, SolveError> {
        while let Some((package, allowed)) = self.next_package()? {
            if allowed.is_empty() {
                let conflict = self.constraints.conflict_for(&package);
                self.resolve_conflict(conflict)?;
                continue;
            }

            let kind = if allowed.len() == 1 {
                SelectionKind::Derivation
            } else {
                SelectionKind::Decision
            };
            let choice = self.choose(&package, &allowed);
            self.decide(package, choice, kind)?;
        }
        self.finish()
    }

    /// The next ref to select, with its allowed candidates
    ///
    /// Unit propagation first: any pending ref with at most one allowed
    /// candidate is taken immediately. Otherwise the oldest pending ref.
    /// Refs nothing requires anymore (their causes were backtracked away)
    /// are dropped.
    fn next_package(&mut self) -> Result<Option<(PackageRef, Vec<PackageId>)>, SolveError> {
        let mut idx = 0;
        let mut fallback: Option<(usize, Vec<PackageId>)> = None;

        while idx < self.pending.len() {
            let package = self.pending[idx].clone();
            if self.selected.contains_key(&package)
                || self.constraints.requirements(&package).is_empty()
            {
                self.pending.remove(idx);
                self.pending_set.remove(&package);
                continue;
            }

            let allowed = self.allowed_candidates(&package)?;
            if allowed.len() <= 1 {
                self.pending.remove(idx);
                self.pending_set.remove(&package);
                return Ok(Some((package, allowed)));
            }
            if fallback.is_none() {
                fallback = Some((idx, allowed));
            }
            idx += 1;
        }

        if let Some((idx, allowed)) = fallback {
            if let Some(package) = self.pending.remove(idx) {
                self.pending_set.remove(&package);
                return Ok(Some((package, allowed)));
            }
        }
        Ok(None)
    }

    /// Candidates of a ref that satisfy every accumulated constraint and
    /// are not ruled out at the current depth
    fn allowed_candidates(&mut self, package: &PackageRef) -> Result<Vec<PackageId>, SolveError> {
        let full = self.candidate_list(package)?;
        if full.is_empty() {
            return Err(SolveError::NoVersions {
                package: package.to_string(),
                constraint: self.constraints.interval(package).to_string(),
            });
        }

        let requirements = self.constraints.requirements(package);
        let allow_prerelease = requirements
            .iter()
            .any(|i| i.range.constraint().mentions_prerelease());
        let failed = self.failed.get(package);

        Ok(full
            .into_iter()
            .filter(|id| {
                requirements
                    .iter()
                    .all(|i| i.range.constraint().matches(id.version()))
                    && (allow_prerelease || !id.version().is_prerelease())
                    && failed.map_or(true, |marks| marks.iter().all(|(_, v)| v != id.version()))
            })
            .collect())
    }

    /// The full candidate list: the pinned environment version for magic
    /// refs, the memoized source listing otherwise
    fn candidate_list(&mut self, package: &PackageRef) -> Result<Vec<PackageId>, SolveError> {
        if package.is_magic() {
            return match self.environment.get(package.name()) {
                Some(version) => Ok(vec![package.with_version(version.clone())]),
                None => Err(SolveError::UnknownEnvironment {
                    name: package.name().to_string(),
                }),
            };
        }
        Ok(self.versions.list(self.sources, package)?.to_vec())
    }

    /// Value ordering: the locked id first when the package is not
    /// unlocked, then source preference order (reversed for downgrade)
    fn choose(&self, package: &PackageRef, allowed: &[PackageId]) -> PackageId {
        if !self.unlocked(package.name()) {
            if let Some(lockfile) = &self.lockfile {
                if let Ok(Some(locked)) = lockfile.id_for(package.name(), self.sources) {
                    if let Some(hit) = allowed.iter().find(|id| **id == locked) {
                        return hit.clone();
                    }
                }
            }
        }
        match self.mode {
            SolveMode::Downgrade => allowed[allowed.len() - 1].clone(),
            _ => allowed[0].clone(),
        }
    }

    /// Whether the lockfile pin for a package may be discarded
    fn unlocked(&self, name: &str) -> bool {
        match self.mode {
            SolveMode::Get => self.unlock.contains(name),
            SolveMode::Upgrade | SolveMode::Downgrade => {
                self.unlock.is_empty() || self.unlock.contains(name)
            }
        }
    }

    /// Select an id and expand its manifest into new constraints
    fn decide(
        &mut self,
        package: PackageRef,
        id: PackageId,
        kind: SelectionKind,
    ) -> Result<(), SolveError> {
        tracing::debug!(package = %id, ?kind, depth = self.decisions.len(), "selected");
        self.decisions.push(Selection {
            id: id.clone(),
            kind,
        });
        self.selected.insert(package.clone(), id.clone());

        if id.is_magic() {
            return Ok(());
        }

        let manifest = self.manifest_for(&id)?;
        let active = self.constraints.features(&package);
        self.expanded_features.insert(package, active.clone());

        let mut ranges = manifest.dependency_ranges(self.sources)?;
        ranges.extend(manifest.environment_ranges()?);
        for feature in &active {
            ranges.extend(manifest.feature_ranges(feature, self.sources)?);
        }

        for range in ranges {
            if let Outcome::Backtracked = self.register(range, &id)? {
                // The selection this expansion belonged to was unwound
                return Ok(());
            }
        }
        Ok(())
    }

    /// Impose one requirement: record its derivation, intersect it into the
    /// store, and either queue the target or re-validate an existing
    /// selection against it
    fn register(&mut self, range: PackageRange, cause: &PackageId) -> Result<Outcome, SolveError> {
        let target = range.to_ref().clone();

        if let Some((existing, _)) = self.names.get(target.name()) {
            if *existing != target {
                return Err(SolveError::SourceMismatch {
                    name: target.name().to_string(),
                    existing: origin_label(existing),
                    conflicting: origin_label(&target),
                });
            }
        }

        tracing::trace!(cause = %cause, requirement = %range, "registering");
        self.graph.record(cause, &range);

        match self.constraints.add(range, cause.clone()) {
            Err(conflict) => {
                self.resolve_conflict(conflict)?;
                Ok(Outcome::Backtracked)
            }
            Ok(()) => {
                let entry = self
                    .names
                    .entry(target.name().to_string())
                    .or_insert_with(|| (target.clone(), 0));
                entry.1 += 1;

                if let Some(selected) = self.selected.get(&target).cloned() {
                    if !self.constraints.allows(&selected) {
                        let conflict = self.constraints.conflict_for(&target);
                        self.resolve_conflict(conflict)?;
                        return Ok(Outcome::Backtracked);
                    }
                    return self.expand_new_features(&target, &selected);
                }

                self.queue(target);
                Ok(Outcome::Continue)
            }
        }
    }

    /// Features requested on an already-selected ref may have grown; expand
    /// the newly activated conditional groups with the selection as cause
    fn expand_new_features(
        &mut self,
        target: &PackageRef,
        id: &PackageId,
    ) -> Result<Outcome, SolveError> {
        if id.is_magic() || id.is_root() {
            return Ok(Outcome::Continue);
        }

        let active = self.constraints.features(target);
        let already = self
            .expanded_features
            .get(target)
            .cloned()
            .unwrap_or_default();
        let new: Vec<String> = active.difference(&already).cloned().collect();
        if new.is_empty() {
            return Ok(Outcome::Continue);
        }
        self.expanded_features.insert(target.clone(), active);

        let manifest = self.manifest_for(id)?;
        for feature in new {
            for range in manifest.feature_ranges(&feature, self.sources)? {
                if let Outcome::Backtracked = self.register(range, id)? {
                    return Ok(Outcome::Backtracked);
                }
            }
        }
        Ok(Outcome::Continue)
    }

    /// Unwind the stack past the most recent decision implicated in the
    /// conflict, widening the culprit set through forced selections
    fn resolve_conflict(&mut self, conflict: StoreConflict) -> Result<(), SolveError> {
        tracing::debug!(
            package = %conflict.package,
            requirements = conflict.requirements.len(),
            "conflict"
        );

        if conflict.package.is_magic() {
            let current = self.environment.get(conflict.package.name());
            return Err(SolveError::SdkIncompatible(report::sdk_incompatibility(
                &conflict, current,
            )));
        }

        // Render the report now, while the derivation trail is intact
        let decision_ids: Vec<PackageId> =
            self.decisions.iter().map(|s| s.id.clone()).collect();
        let failure = report::describe(&conflict, &self.graph, &decision_ids);

        let mut culprits: HashSet<PackageId> = conflict
            .requirements
            .iter()
            .map(|i| i.cause.clone())
            .collect();

        loop {
            let Some(selection) = self.decisions.pop() else {
                return Err(SolveError::Unsatisfiable(failure));
            };
            let id = selection.id;
            let target = id.to_ref().clone();

            // What forced this selection, captured before its constraints
            // are removed
            let forcing: Vec<PackageId> = self
                .constraints
                .requirements(&target)
                .iter()
                .map(|i| i.cause.clone())
                .collect();

            self.undo(&id);
            self.queue(target.clone());

            if culprits.contains(&id) {
                match selection.kind {
                    SelectionKind::Decision => {
                        tracing::debug!(
                            package = %id,
                            depth = self.decisions.len(),
                            "backtracked"
                        );
                        self.failed
                            .entry(target)
                            .or_default()
                            .push((self.decisions.len(), id.version().clone()));
                        return Ok(());
                    }
                    SelectionKind::Derivation => {
                        // Reversing a forced selection requires reversing
                        // whatever forced it
                        culprits.extend(forcing);
                    }
                }
            }
        }
    }

    /// Remove every trace of a selection from the working state
    fn undo(&mut self, id: &PackageId) {
        self.selected.remove(id.to_ref());
        self.expanded_features.remove(id.to_ref());
        self.graph.remove_cause(id);

        for range in self.constraints.remove_cause(id) {
            if let Some(entry) = self.names.get_mut(range.to_ref().name()) {
                entry.1 = entry.1.saturating_sub(1);
            }
        }
        self.names.retain(|_, entry| entry.1 > 0);

        // Failure marks scoped beneath the new depth expire with it
        let depth = self.decisions.len();
        self.failed.retain(|_, marks| {
            marks.retain(|(d, _)| *d <= depth);
            !marks.is_empty()
        });
    }

    fn queue(&mut self, package: PackageRef) {
        if package.is_root()
            || self.selected.contains_key(&package)
            || self.pending_set.contains(&package)
        {
            return;
        }
        self.pending.push_back(package.clone());
        self.pending_set.insert(package);
    }

    /// The manifest of an id, read once and cached for the resolution
    fn manifest_for(&mut self, id: &PackageId) -> Result<PackageManifest, SolveError> {
        if let Some(manifest) = self.manifests.get(id) {
            return Ok(manifest.clone());
        }
        let source = self.sources.source_of(id.to_ref())?;
        let manifest = source.describe_dependencies(id)?;
        self.manifests.insert(id.clone(), manifest.clone());
        Ok(manifest)
    }

    fn finish(mut self) -> Result<Resolution, SolveError> {
        let mut packages = BTreeMap::new();
        for (package, id) in &self.selected {
            if package.is_root() || package.is_magic() {
                continue;
            }
            debug_assert!(self.constraints.allows(id));
            packages.insert(package.name().to_string(), id.clone());
        }

        let ids: Vec<PackageId> = packages.values().cloned().collect();
        let mut dependencies = BTreeMap::new();
        for id in &ids {
            let manifest = self.manifest_for(id)?;
            let deps: Vec<String> = manifest
                .dependencies
                .keys()
                .filter(|name| packages.contains_key(*name))
                .cloned()
                .collect();
            dependencies.insert(id.name().to_string(), deps);
        }

        tracing::debug!(packages = packages.len(), "resolution complete");
        Ok(Resolution {
            root: self.root_id,
            packages,
            dependencies,
        })
    }
}

/// A user-facing label for where a ref comes from
fn origin_label(package: &PackageRef) -> String {
    match (package.is_root(), package.is_magic(), package.source()) {
        (true, _, _) => "the root package".to_string(),
        (_, true, _) => "the environment".to_string(),
        (_, _, Some(source)) => format!("source '{}'", source),
        _ => "an unknown origin".to_string(),
    }
}
