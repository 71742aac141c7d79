//! Package identity
//!
//! Three related names for a package, in increasing order of precision:
//!
//! - [`PackageRef`] says *which* package (name plus origin, no version)
//! - [`PackageId`] pins a ref to one concrete, retrievable version
//! - [`PackageRange`] pairs a ref with a version constraint and a feature set
//!
//! The root package and magic packages (synthetic refs carrying environment
//! constraints, e.g. the SDK) are separate [`Origin`] variants, so a ref
//! without a real source cannot be asked for a description by accident.

use crate::semver::{Constraint, Version};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque source-specific data locating a package (URL, path, git coordinate)
///
/// Only the owning source may interpret, compare, or hash a description.
pub type Description = toml::Value;

/// Where a package comes from
#[derive(Debug, Clone)]
pub enum Origin {
    /// The project being resolved; exactly one per resolution
    Root,

    /// A synthetic package injecting environment constraints (never fetched)
    Magic,

    /// A package served by a named source plug-in
    Source {
        /// Registered source name (`hosted`, `git`, `path`, ...)
        source: String,

        /// Canonicalized description, produced by the source's `parse_ref`
        description: Description,

        /// Source-computed description hash, captured at parse time
        description_hash: u64,
    },
}

/// A package identity without a version
#[derive(Debug, Clone)]
pub struct PackageRef {
    name: String,
    origin: Origin,
}

impl PackageRef {
    /// The root project's ref
    pub fn root(name: impl Into<String>) -> Self {
        PackageRef {
            name: name.into(),
            origin: Origin::Root,
        }
    }

    /// A magic ref for an environment constraint (e.g. the `keel` SDK)
    pub fn magic(name: impl Into<String>) -> Self {
        PackageRef {
            name: name.into(),
            origin: Origin::Magic,
        }
    }

    /// A ref owned by a source
    ///
    /// Only sources construct these (from `parse_ref`), with a description
    /// they have already canonicalized and hashed.
    pub fn sourced(
        name: impl Into<String>,
        source: impl Into<String>,
        description: Description,
        description_hash: u64,
    ) -> Self {
        PackageRef {
            name: name.into(),
            origin: Origin::Source {
                source: source.into(),
                description,
                description_hash,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_root(&self) -> bool {
        matches!(self.origin, Origin::Root)
    }

    pub fn is_magic(&self) -> bool {
        matches!(self.origin, Origin::Magic)
    }

    /// The owning source's registered name, if any
    pub fn source(&self) -> Option<&str> {
        match &self.origin {
            Origin::Source { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The canonical description, if this ref is owned by a source
    pub fn description(&self) -> Option<&Description> {
        match &self.origin {
            Origin::Source { description, .. } => Some(description),
            _ => None,
        }
    }

    /// Pin this ref to a concrete version
    pub fn with_version(&self, version: Version) -> PackageId {
        PackageId {
            package: self.clone(),
            version,
        }
    }

    /// Turn this ref into a range with the given constraint and no features
    pub fn with_constraint(&self, constraint: Constraint) -> PackageRange {
        PackageRange {
            package: self.clone(),
            constraint,
            features: BTreeSet::new(),
        }
    }
}

impl PartialEq for PackageRef {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        match (&self.origin, &other.origin) {
            (Origin::Root, Origin::Root) => true,
            (Origin::Magic, Origin::Magic) => true,
            (
                Origin::Source {
                    source: sa,
                    description: da,
                    ..
                },
                Origin::Source {
                    source: sb,
                    description: db,
                    ..
                },
            ) => sa == sb && da == db,
            _ => false,
        }
    }
}

impl Eq for PackageRef {}

impl Hash for PackageRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        match &self.origin {
            Origin::Root => state.write_u8(0),
            Origin::Magic => state.write_u8(1),
            Origin::Source {
                source,
                description_hash,
                ..
            } => {
                state.write_u8(2);
                source.hash(state);
                // The source-owned hash gets mixed through the hasher rather
                // than XORed in, so name/source collisions don't cancel out
                state.write_u64(*description_hash);
            }
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::Source { source, .. } if source != "hosted" => {
                write!(f, "{} from {}", self.name, source)
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

/// A fully resolved, retrievable package coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    package: PackageRef,
    version: Version,
}

impl PackageId {
    pub fn name(&self) -> &str {
        self.package.name()
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_root(&self) -> bool {
        self.package.is_root()
    }

    pub fn is_magic(&self) -> bool {
        self.package.is_magic()
    }

    pub fn source(&self) -> Option<&str> {
        self.package.source()
    }

    pub fn description(&self) -> Option<&Description> {
        self.package.description()
    }

    /// The versionless identity of this id
    pub fn to_ref(&self) -> &PackageRef {
        &self.package
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package, self.version)
    }
}

/// A constraint over versions of one package, plus requested features
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRange {
    package: PackageRef,
    constraint: Constraint,
    features: BTreeSet<String>,
}

impl PackageRange {
    pub fn name(&self) -> &str {
        self.package.name()
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Requested features of the target package (unordered set)
    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    /// The versionless identity this range constrains
    pub fn to_ref(&self) -> &PackageRef {
        &self.package
    }

    /// Replace the constraint, keeping identity and features
    pub fn with_constraint(&self, constraint: Constraint) -> Self {
        PackageRange {
            package: self.package.clone(),
            constraint,
            features: self.features.clone(),
        }
    }

    /// Union-merge additional features; an empty set is the identity
    pub fn with_features(self, features: BTreeSet<String>) -> Self {
        if features.is_empty() {
            return self;
        }
        let mut merged = self.features;
        merged.extend(features);
        PackageRange {
            package: self.package,
            constraint: self.constraint,
            features: merged,
        }
    }

    /// Whether this range and the id name the same package
    pub fn same_package(&self, id: &PackageId) -> bool {
        self.package == *id.to_ref()
    }

    /// Whether the id satisfies this range
    pub fn allows(&self, id: &PackageId) -> bool {
        self.same_package(id) && self.constraint.matches(id.version())
    }
}

impl fmt::Display for PackageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package, self.constraint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(r: &PackageRef) -> u64 {
        let mut h = DefaultHasher::new();
        r.hash(&mut h);
        h.finish()
    }

    fn hosted_ref(name: &str, url: &str) -> PackageRef {
        // Stand-in for HostedSource::parse_ref: canonical description plus a
        // hash derived from it
        let desc = Description::String(url.to_string());
        let mut h = DefaultHasher::new();
        url.hash(&mut h);
        PackageRef::sourced(name, "hosted", desc, h.finish())
    }

    #[test]
    fn test_ref_equality_by_origin() {
        assert_eq!(PackageRef::root("app"), PackageRef::root("app"));
        assert_eq!(PackageRef::magic("keel"), PackageRef::magic("keel"));
        assert_ne!(PackageRef::root("app"), PackageRef::magic("app"));
        assert_ne!(
            PackageRef::root("app"),
            hosted_ref("app", "https://pkg.keel-lang.org/api/v1")
        );
    }

    #[test]
    fn test_equal_refs_hash_equal() {
        let a = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        let b = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_distinct_descriptions_are_distinct_refs() {
        let a = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        let b = hosted_ref("http", "https://mirror.example.com/api/v1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_embeds_ref() {
        let r = PackageRef::root("app");
        let id = r.with_version(Version::new(1, 0, 0));
        assert_eq!(*id.to_ref(), r);
        assert_eq!(id.to_ref().name(), "app");
    }

    #[test]
    fn test_range_allows_implies_same_package() {
        let r = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        let range = r.with_constraint(Constraint::parse("^1.0.0").unwrap());
        let id = r.with_version(Version::new(1, 5, 0));
        assert!(range.allows(&id));
        assert!(range.same_package(&id));

        let other = PackageRef::root("http").with_version(Version::new(1, 5, 0));
        assert!(!range.allows(&other));
    }

    #[test]
    fn test_with_features_empty_is_identity() {
        let r = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        let range = r.with_constraint(Constraint::Any);
        let same = range.clone().with_features(BTreeSet::new());
        assert_eq!(range, same);
    }

    #[test]
    fn test_with_features_unions() {
        let r = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        let range = r
            .with_constraint(Constraint::Any)
            .with_features(["tls".to_string()].into());
        let merged = range.with_features(["http2".to_string(), "tls".to_string()].into());
        assert_eq!(
            merged.features().iter().cloned().collect::<Vec<_>>(),
            vec!["http2".to_string(), "tls".to_string()]
        );
    }

    #[test]
    fn test_feature_order_irrelevant_for_equality() {
        let r = hosted_ref("http", "https://pkg.keel-lang.org/api/v1");
        let a = r
            .with_constraint(Constraint::Any)
            .with_features(["a".to_string(), "b".to_string()].into());
        let b = r
            .with_constraint(Constraint::Any)
            .with_features(["b".to_string()].into())
            .with_features(["a".to_string()].into());
        assert_eq!(a, b);
    }
}
