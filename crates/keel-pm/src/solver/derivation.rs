//! Derivation graph
//!
//! Records which selection introduced each requirement, forming a DAG from
//! the root through direct dependencies to transitive ones. Backtracking
//! walks it to widen a culprit set past forced selections, and the failure
//! report walks it to explain how each culprit entered the resolution.

use crate::package::{PackageId, PackageRange, PackageRef};
use std::collections::{HashMap, HashSet};

/// How a package version was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Chosen among several allowed candidates; reversible on its own
    Decision,

    /// Forced by unit propagation; reversing it requires reversing a
    /// decision beneath it
    Derivation,
}

/// One dependency edge: `cause`'s manifest requires `range`
#[derive(Debug, Clone)]
pub struct DerivationEdge {
    pub cause: PackageId,
    pub range: PackageRange,
}

/// Cause-indexed record of every requirement in the current assignment
#[derive(Debug, Default)]
pub struct DerivationGraph {
    edges: HashMap<PackageRef, Vec<DerivationEdge>>,
}

impl DerivationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `cause` requires `range`
    pub fn record(&mut self, cause: &PackageId, range: &PackageRange) {
        self.edges
            .entry(range.to_ref().clone())
            .or_default()
            .push(DerivationEdge {
                cause: cause.clone(),
                range: range.clone(),
            });
    }

    /// Drop every edge a cause introduced (used on backtrack)
    pub fn remove_cause(&mut self, cause: &PackageId) {
        for edges in self.edges.values_mut() {
            edges.retain(|e| e.cause != *cause);
        }
        self.edges.retain(|_, edges| !edges.is_empty());
    }

    /// Requirements currently imposed on a package, oldest first
    pub fn requirements_on(&self, package: &PackageRef) -> &[DerivationEdge] {
        self.edges.get(package).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The requirement chain explaining why a package is in the graph,
    /// ending at the root. Cycles terminate the walk.
    pub fn chain_to_root(&self, package: &PackageRef) -> Vec<DerivationEdge> {
        let mut chain = Vec::new();
        let mut seen: HashSet<PackageRef> = HashSet::new();
        let mut current = package.clone();

        while seen.insert(current.clone()) {
            let Some(edge) = self.requirements_on(&current).first() else {
                break;
            };
            chain.push(edge.clone());
            if edge.cause.is_root() {
                break;
            }
            current = edge.cause.to_ref().clone();
        }

        chain
    }
}
