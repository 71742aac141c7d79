//! Failure reports
//!
//! When the search space is exhausted, the final conflict plus the
//! derivation graph is turned into a short human-readable chain: who
//! required what, newest decision first, and why nothing satisfies the
//! combination.

use super::constraints::{Imposed, StoreConflict};
use super::derivation::DerivationGraph;
use crate::package::PackageId;
use crate::semver::Version;
use std::cmp::Reverse;
use std::fmt;

/// A rendered explanation of an unsatisfiable resolution
#[derive(Debug, Clone)]
pub struct FailureReport {
    lines: Vec<String>,
}

impl FailureReport {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Name a cause the way a user knows it: the root by bare name, everything
/// else as "name version"
fn cause_name(cause: &PackageId) -> String {
    if cause.is_root() {
        cause.name().to_string()
    } else {
        cause.to_string()
    }
}

/// Explain a version conflict, culprits newest-decision-first
pub(crate) fn describe(
    conflict: &StoreConflict,
    graph: &DerivationGraph,
    decisions: &[PackageId],
) -> FailureReport {
    let recency = |imposed: &Imposed| {
        Reverse(decisions.iter().position(|d| *d == imposed.cause))
    };
    let mut requirements = conflict.requirements.clone();
    requirements.sort_by_key(recency);

    let mut lines = Vec::new();
    for imposed in &requirements {
        lines.push(format!(
            "{} depends on {} {}.",
            cause_name(&imposed.cause),
            imposed.range.to_ref(),
            imposed.range.constraint()
        ));
    }

    // How each non-root culprit entered the resolution, walking its
    // requirement chain back to the root
    let mut explained: Vec<String> = Vec::new();
    for imposed in &requirements {
        if imposed.cause.is_root() {
            continue;
        }
        for edge in graph.chain_to_root(imposed.cause.to_ref()) {
            let required = edge.range.to_ref().to_string();
            if explained.contains(&required) {
                continue;
            }
            lines.push(format!(
                "{} is required because {} depends on {} {}.",
                required,
                cause_name(&edge.cause),
                edge.range.to_ref(),
                edge.range.constraint()
            ));
            explained.push(required);
        }
    }

    let mut constraints: Vec<String> = Vec::new();
    for imposed in &requirements {
        let text = imposed.range.constraint().to_string();
        if !constraints.contains(&text) {
            constraints.push(text);
        }
    }
    lines.push(match constraints.as_slice() {
        [only] => format!("No version of {} matches {}.", conflict.package, only),
        [a, b] => format!(
            "No version of {} satisfies both {} and {}.",
            conflict.package, a, b
        ),
        many => format!(
            "No version of {} satisfies {}.",
            conflict.package,
            many.join(", ")
        ),
    });

    FailureReport { lines }
}

/// Explain a conflict on a magic package as an environment incompatibility
pub(crate) fn sdk_incompatibility(
    conflict: &StoreConflict,
    current: Option<&Version>,
) -> FailureReport {
    let mut lines = Vec::new();
    for imposed in &conflict.requirements {
        lines.push(format!(
            "{} requires {} {}.",
            cause_name(&imposed.cause),
            conflict.package.name(),
            imposed.range.constraint()
        ));
    }
    lines.push(match current {
        Some(version) => format!(
            "The current {} version is {}.",
            conflict.package.name(),
            version
        ),
        None => format!(
            "The current environment does not provide {}.",
            conflict.package.name()
        ),
    });
    FailureReport { lines }
}
