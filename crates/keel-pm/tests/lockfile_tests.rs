//! Integration tests for lockfile round-trips and rehydration

use keel_pm::{
    Description, LockedPackage, Lockfile, MemorySource, PathSource, SourceRegistry, SystemCache,
    Version, LOCKFILE_VERSION,
};
use std::path::Path;

fn hosted_entry(name: &str, version: &str) -> LockedPackage {
    LockedPackage {
        name: name.to_string(),
        version: version.to_string(),
        source: Some("hosted".to_string()),
        description: Some(Description::String(
            "https://pkg.keel-lang.org/api/v1".to_string(),
        )),
        checksum: None,
        dependencies: Vec::new(),
    }
}

fn path_entry(name: &str, version: &str, dir: &Path) -> LockedPackage {
    LockedPackage {
        name: name.to_string(),
        version: version.to_string(),
        source: Some("path".to_string()),
        description: Some(Description::String(dir.display().to_string())),
        checksum: None,
        dependencies: Vec::new(),
    }
}

fn write_package(dir: &Path, name: &str, version: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("keel.toml"),
        format!("[package]\nname = \"{}\"\nversion = \"{}\"\n", name, version),
    )
    .unwrap();
}

#[test]
fn test_serialization_is_deterministic_and_sorted() {
    let mut a = Lockfile::new(Some("app".to_string()));
    a.add_package(hosted_entry("zeta", "1.0.0"));
    a.add_package(hosted_entry("alpha", "2.0.0"));

    let mut b = Lockfile::new(Some("app".to_string()));
    b.add_package(hosted_entry("alpha", "2.0.0"));
    b.add_package(hosted_entry("zeta", "1.0.0"));

    // Same logical content serializes identically regardless of insertion
    // order
    assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
}

#[test]
fn test_parse_serialize_parse_is_identity() {
    let mut lock = Lockfile::new(Some("app".to_string()));
    lock.add_package(hosted_entry("alpha", "2.0.0"));
    lock.add_package({
        let mut entry = hosted_entry("beta", "0.4.1");
        entry.checksum = Some("ab".repeat(32));
        entry.dependencies = vec!["alpha".to_string()];
        entry
    });
    lock.sort_packages();

    let once = lock.serialize().unwrap();
    let parsed = Lockfile::from_str(&once).unwrap();
    assert_eq!(parsed, lock);
    assert_eq!(parsed.serialize().unwrap(), once);
}

#[test]
fn test_version_field_guards_compatibility() {
    let mut lock = Lockfile::new(None);
    lock.version = LOCKFILE_VERSION + 1;
    let serialized = toml::to_string_pretty(&lock).unwrap();
    assert!(Lockfile::from_str(&serialized).is_err());
}

#[test]
fn test_rehydration_round_trip() {
    let mut sources = SourceRegistry::new();
    sources.register(Box::new(MemorySource::new("hosted")));

    let mut lock = Lockfile::new(Some("app".to_string()));
    lock.add_package(hosted_entry("http", "1.4.2"));

    let id = lock.id_for("http", &sources).unwrap().unwrap();
    assert_eq!(id.name(), "http");
    assert_eq!(id.version(), &Version::new(1, 4, 2));
    assert_eq!(id.source(), Some("hosted"));
}

#[test]
fn test_packages_file_lists_every_package_and_the_root() {
    let workspace = tempfile::tempdir().unwrap();
    let utils_dir = workspace.path().join("utils");
    let logging_dir = workspace.path().join("logging");
    write_package(&utils_dir, "utils", "1.0.0");
    write_package(&logging_dir, "logging", "0.2.0");

    let mut sources = SourceRegistry::new();
    sources.register(Box::new(PathSource::new(workspace.path().to_path_buf())));

    let mut lock = Lockfile::new(Some("app".to_string()));
    lock.add_package(path_entry("utils", "1.0.0", &utils_dir));
    lock.add_package(path_entry("logging", "0.2.0", &logging_dir));

    let cache = SystemCache::with_root(workspace.path().join("cache")).unwrap();
    let text = lock.packages_file(&cache, &sources, "app").unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with('#'));
    assert!(lines[1].starts_with("logging:"));
    assert!(lines[1].ends_with("/src"));
    assert!(lines[2].starts_with("utils:"));
    assert_eq!(lines[3], "app:src");
}

#[test]
fn test_packages_file_fails_on_missing_package() {
    let workspace = tempfile::tempdir().unwrap();

    let mut sources = SourceRegistry::new();
    sources.register(Box::new(PathSource::new(workspace.path().to_path_buf())));

    let mut lock = Lockfile::new(Some("app".to_string()));
    lock.add_package(path_entry(
        "ghost",
        "1.0.0",
        &workspace.path().join("nowhere"),
    ));

    let cache = SystemCache::with_root(workspace.path().join("cache")).unwrap();
    assert!(lock.packages_file(&cache, &sources, "app").is_err());
}
