//! Semantic versioning: parsing, ordering, and constraint algebra
//!
//! Versions follow MAJOR.MINOR.PATCH with optional prerelease and build
//! metadata. Constraints come in the surface forms users write (`^1.2.0`,
//! `~0.3.1`, `>=2.0.0`, `1.*`) and lower to half-open intervals so the solver
//! can intersect requirements from many packages.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while parsing versions or constraints
#[derive(Debug, Error)]
pub enum SemverError {
    /// Invalid version format
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Invalid constraint format
    #[error("Invalid version constraint: {0}")]
    InvalidConstraint(String),
}

/// Semantic version (MAJOR.MINOR.PATCH with optional prerelease/build)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, SemverError> {
        let input = input.trim();
        let input = input.strip_prefix('v').unwrap_or(input);

        // Build metadata comes after '+', prerelease after '-'
        let (rest, build) = match input.split_once('+') {
            Some((v, b)) => (v, Some(b.to_string())),
            None => (input, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((v, p)) => (v, Some(p.to_string())),
            None => (rest, None),
        };

        let mut numbers = core.split('.');
        let major = parse_component(numbers.next(), input)?;
        let minor = parse_component(numbers.next(), input)?;
        let patch = parse_component(numbers.next(), input)?;
        if numbers.next().is_some() {
            return Err(SemverError::InvalidVersion(format!(
                "Expected MAJOR.MINOR.PATCH, got '{}'",
                input
            )));
        }

        Ok(Version {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    /// Create a new version without prerelease or build metadata
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Next major version (resets minor and patch)
    pub fn bump_major(&self) -> Self {
        Version::new(self.major + 1, 0, 0)
    }

    /// Next minor version (resets patch)
    pub fn bump_minor(&self) -> Self {
        Version::new(self.major, self.minor + 1, 0)
    }

    /// Next patch version
    pub fn bump_patch(&self) -> Self {
        Version::new(self.major, self.minor, self.patch + 1)
    }
}

fn parse_component(part: Option<&str>, whole: &str) -> Result<u64, SemverError> {
    let part = part.ok_or_else(|| {
        SemverError::InvalidVersion(format!("Expected MAJOR.MINOR.PATCH, got '{}'", whole))
    })?;
    part.parse()
        .map_err(|_| SemverError::InvalidVersion(format!("Invalid version component '{}'", part)))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            // A prerelease sorts before the release it precedes
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// Comparison operator in a surface constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

/// A version constraint as written in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Any version (`*`)
    Any,

    /// Exact version (`=1.2.3` or `1.2.3`)
    Exact(Version),

    /// Caret range (`^1.2.3` is `>=1.2.3 <2.0.0`)
    Caret(Version),

    /// Tilde range (`~1.2.3` is `>=1.2.3 <1.3.0`)
    Tilde(Version),

    /// Single comparison (`>1.2.3`, `>=1.2.3`, `<1.2.3`, `<=1.2.3`)
    Cmp(CmpOp, Version),

    /// Wildcard (`1.*`, `1.2.*`)
    Wildcard(u64, Option<u64>),
}

impl Constraint {
    /// Parse a constraint string
    pub fn parse(input: &str) -> Result<Self, SemverError> {
        let input = input.trim();

        if input == "*" || input == "any" {
            return Ok(Constraint::Any);
        }

        for (prefix, op) in [
            (">=", CmpOp::GreaterEq),
            ("<=", CmpOp::LessEq),
            (">", CmpOp::Greater),
            ("<", CmpOp::Less),
        ] {
            if let Some(rest) = input.strip_prefix(prefix) {
                return Ok(Constraint::Cmp(op, Version::parse(rest)?));
            }
        }

        if let Some(rest) = input.strip_prefix('^') {
            return Ok(Constraint::Caret(Version::parse(rest)?));
        }
        if let Some(rest) = input.strip_prefix('~') {
            return Ok(Constraint::Tilde(Version::parse(rest)?));
        }
        if let Some(rest) = input.strip_prefix('=') {
            return Ok(Constraint::Exact(Version::parse(rest)?));
        }

        if input.contains('*') {
            return Self::parse_wildcard(input);
        }

        Ok(Constraint::Exact(Version::parse(input)?))
    }

    fn parse_wildcard(input: &str) -> Result<Self, SemverError> {
        let invalid = || SemverError::InvalidConstraint(format!("Invalid wildcard: {}", input));
        let parts: Vec<&str> = input.split('.').collect();

        match parts.as_slice() {
            ["*"] => Ok(Constraint::Any),
            [major, "*"] => {
                let major = major.parse().map_err(|_| invalid())?;
                Ok(Constraint::Wildcard(major, None))
            }
            [major, minor, "*"] => {
                let major = major.parse().map_err(|_| invalid())?;
                let minor = minor.parse().map_err(|_| invalid())?;
                Ok(Constraint::Wildcard(major, Some(minor)))
            }
            _ => Err(invalid()),
        }
    }

    /// Check if a version satisfies this constraint
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::Exact(v) => {
                version.major == v.major
                    && version.minor == v.minor
                    && version.patch == v.patch
                    && version.prerelease == v.prerelease
            }
            Constraint::Caret(v) => {
                // ^1.2.3 is >=1.2.3 <2.0.0; ^0.2.3 is >=0.2.3 <0.3.0;
                // ^0.0.3 is >=0.0.3 <0.0.4
                if v.major > 0 {
                    version >= v && version.major == v.major
                } else if v.minor > 0 {
                    version >= v && version.major == 0 && version.minor == v.minor
                } else {
                    version >= v
                        && version.major == 0
                        && version.minor == 0
                        && version.patch == v.patch
                }
            }
            Constraint::Tilde(v) => {
                version >= v && version.major == v.major && version.minor == v.minor
            }
            Constraint::Cmp(CmpOp::Greater, v) => version > v,
            Constraint::Cmp(CmpOp::GreaterEq, v) => version >= v,
            Constraint::Cmp(CmpOp::Less, v) => version < v,
            Constraint::Cmp(CmpOp::LessEq, v) => version <= v,
            Constraint::Wildcard(major, minor) => match minor {
                Some(m) => version.major == *major && version.minor == *m,
                None => version.major == *major,
            },
        }
    }

    /// Whether this constraint explicitly anchors on a prerelease version
    ///
    /// Prerelease candidates are skipped during resolution unless some
    /// constraint opts into them this way.
    pub fn mentions_prerelease(&self) -> bool {
        match self {
            Constraint::Any | Constraint::Wildcard(..) => false,
            Constraint::Exact(v)
            | Constraint::Caret(v)
            | Constraint::Tilde(v)
            | Constraint::Cmp(_, v) => v.is_prerelease(),
        }
    }

    /// Lower this constraint to an interval
    pub fn to_interval(&self) -> VersionInterval {
        match self {
            Constraint::Any => VersionInterval::any(),
            Constraint::Exact(v) => VersionInterval {
                min: Some(v.clone()),
                max: Some(v.clone()),
                include_min: true,
                include_max: true,
            },
            Constraint::Caret(v) => {
                let upper = if v.major > 0 {
                    v.bump_major()
                } else if v.minor > 0 {
                    v.bump_minor()
                } else {
                    v.bump_patch()
                };
                VersionInterval::between(v.clone(), upper)
            }
            Constraint::Tilde(v) => VersionInterval::between(v.clone(), v.bump_minor()),
            Constraint::Cmp(CmpOp::Greater, v) => VersionInterval {
                min: Some(v.clone()),
                max: None,
                include_min: false,
                include_max: false,
            },
            Constraint::Cmp(CmpOp::GreaterEq, v) => VersionInterval {
                min: Some(v.clone()),
                max: None,
                include_min: true,
                include_max: false,
            },
            Constraint::Cmp(CmpOp::Less, v) => VersionInterval {
                min: None,
                max: Some(v.clone()),
                include_min: false,
                include_max: false,
            },
            Constraint::Cmp(CmpOp::LessEq, v) => VersionInterval {
                min: None,
                max: Some(v.clone()),
                include_min: false,
                include_max: true,
            },
            Constraint::Wildcard(major, minor) => match minor {
                Some(m) => VersionInterval::between(
                    Version::new(*major, *m, 0),
                    Version::new(*major, *m + 1, 0),
                ),
                None => VersionInterval::between(
                    Version::new(*major, 0, 0),
                    Version::new(*major + 1, 0, 0),
                ),
            },
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Any => write!(f, "any"),
            Constraint::Exact(v) => write!(f, "{}", v),
            Constraint::Caret(v) => write!(f, "^{}", v),
            Constraint::Tilde(v) => write!(f, "~{}", v),
            Constraint::Cmp(CmpOp::Greater, v) => write!(f, ">{}", v),
            Constraint::Cmp(CmpOp::GreaterEq, v) => write!(f, ">={}", v),
            Constraint::Cmp(CmpOp::Less, v) => write!(f, "<{}", v),
            Constraint::Cmp(CmpOp::LessEq, v) => write!(f, "<={}", v),
            Constraint::Wildcard(major, Some(minor)) => write!(f, "{}.{}.*", major, minor),
            Constraint::Wildcard(major, None) => write!(f, "{}.*", major),
        }
    }
}

/// A contiguous interval of versions, possibly unbounded on either side
///
/// Intervals close under intersection, which is what the constraint store
/// folds accumulated requirements into. An empty intersection is how a
/// version conflict is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInterval {
    pub min: Option<Version>,
    pub max: Option<Version>,
    pub include_min: bool,
    pub include_max: bool,
}

impl VersionInterval {
    /// The interval containing every version
    pub fn any() -> Self {
        VersionInterval {
            min: None,
            max: None,
            include_min: false,
            include_max: false,
        }
    }

    /// `[min, max)`
    pub fn between(min: Version, max: Version) -> Self {
        VersionInterval {
            min: Some(min),
            max: Some(max),
            include_min: true,
            include_max: false,
        }
    }

    /// Check if a version falls inside the interval
    pub fn allows(&self, version: &Version) -> bool {
        if let Some(ref min) = self.min {
            match version.cmp(min) {
                Ordering::Less => return false,
                Ordering::Equal if !self.include_min => return false,
                _ => {}
            }
        }
        if let Some(ref max) = self.max {
            match version.cmp(max) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.include_max => return false,
                _ => {}
            }
        }
        true
    }

    /// Intersect two intervals
    pub fn intersect(&self, other: &Self) -> Self {
        let (min, include_min) = match (&self.min, &other.min) {
            (None, None) => (None, false),
            (Some(a), None) => (Some(a.clone()), self.include_min),
            (None, Some(b)) => (Some(b.clone()), other.include_min),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Greater => (Some(a.clone()), self.include_min),
                Ordering::Less => (Some(b.clone()), other.include_min),
                Ordering::Equal => (Some(a.clone()), self.include_min && other.include_min),
            },
        };
        let (max, include_max) = match (&self.max, &other.max) {
            (None, None) => (None, false),
            (Some(a), None) => (Some(a.clone()), self.include_max),
            (None, Some(b)) => (Some(b.clone()), other.include_max),
            (Some(a), Some(b)) => match a.cmp(b) {
                Ordering::Less => (Some(a.clone()), self.include_max),
                Ordering::Greater => (Some(b.clone()), other.include_max),
                Ordering::Equal => (Some(a.clone()), self.include_max && other.include_max),
            },
        };

        VersionInterval {
            min,
            max,
            include_min,
            include_max,
        }
    }

    /// Check if no version can fall inside the interval
    pub fn is_empty(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => match min.cmp(max) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.include_min && self.include_max),
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for VersionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (None, None) => write!(f, "any"),
            (Some(min), None) => {
                write!(f, "{}{}", if self.include_min { ">=" } else { ">" }, min)
            }
            (None, Some(max)) => {
                write!(f, "{}{}", if self.include_max { "<=" } else { "<" }, max)
            }
            (Some(min), Some(max)) => write!(
                f,
                "{}{} {}{}",
                if self.include_min { ">=" } else { ">" },
                min,
                if self.include_max { "<=" } else { "<" },
                max
            ),
        }
    }
}
