//! Integration tests for version solving

use keel_pm::{
    Dependency, LockedPackage, Lockfile, MemorySource, PackageManifest, SolveError, SolveMode,
    Source, SourceRegistry, Version, VersionSolver,
};

fn registry(configure: impl FnOnce(&mut MemorySource)) -> SourceRegistry {
    let mut hosted = MemorySource::new("hosted");
    configure(&mut hosted);
    let mut sources = SourceRegistry::new();
    sources.register(Box::new(hosted));
    sources
}

fn root(deps: &[(&str, &str)]) -> PackageManifest {
    let mut manifest = PackageManifest::new("my-app", "1.0.0");
    for (name, constraint) in deps {
        manifest
            .dependencies
            .insert(name.to_string(), Dependency::Simple(constraint.to_string()));
    }
    manifest
}

fn locked(name: &str, version: &str) -> LockedPackage {
    LockedPackage {
        name: name.to_string(),
        version: version.to_string(),
        source: Some("hosted".to_string()),
        description: None,
        checksum: None,
        dependencies: Vec::new(),
    }
}

#[test]
fn test_trivial_resolution() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "1.1.0").add("foo", "2.0.0");
    });

    let resolution = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .solve()
        .unwrap();

    assert_eq!(resolution.packages.len(), 1);
    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 1, 0));
}

#[test]
fn test_transitive_chain() {
    let sources = registry(|hosted| {
        hosted.add_with("a", "1.0.0", |m| {
            m.dependencies
                .insert("b".into(), Dependency::Simple("^2.0.0".into()));
        });
        hosted.add_with("b", "2.1.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("~0.4.0".into()));
        });
        hosted.add("c", "0.4.2").add("c", "0.5.0");
    });

    let resolution = VersionSolver::new(&sources, root(&[("a", "^1.0.0")]))
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["a"].version(), &Version::new(1, 0, 0));
    assert_eq!(resolution.packages["b"].version(), &Version::new(2, 1, 0));
    assert_eq!(resolution.packages["c"].version(), &Version::new(0, 4, 2));
}

#[test]
fn test_backtrack_rules_out_newest() {
    let sources = registry(|hosted| {
        hosted.add_with("a", "1.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("^1.0.0".into()));
        });
        hosted.add_with("a", "2.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("^2.0.0".into()));
        });
        hosted.add_with("b", "1.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("^1.0.0".into()));
        });
        hosted.add("c", "1.0.0").add("c", "2.0.0");
    });

    let resolution = VersionSolver::new(&sources, root(&[("a", "*"), ("b", "*")]))
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["a"].version(), &Version::new(1, 0, 0));
    assert_eq!(resolution.packages["b"].version(), &Version::new(1, 0, 0));
    assert_eq!(resolution.packages["c"].version(), &Version::new(1, 0, 0));
}

#[test]
fn test_unsatisfiable_explanation() {
    let sources = registry(|hosted| {
        hosted.add_with("a", "1.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("^1.0.0".into()));
        });
        hosted.add_with("b", "1.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("^2.0.0".into()));
        });
        hosted.add("c", "1.0.0").add("c", "2.0.0");
    });

    let err = VersionSolver::new(&sources, root(&[("a", "^1.0.0"), ("b", "^1.0.0")]))
        .solve()
        .unwrap_err();

    let SolveError::Unsatisfiable(report) = err else {
        panic!("expected Unsatisfiable, got {:?}", err);
    };
    let text = report.to_string();
    assert!(text.contains("a 1.0.0"), "{}", text);
    assert!(text.contains("b 1.0.0"), "{}", text);
    assert!(text.contains("No version of c satisfies both"), "{}", text);
}

#[test]
fn test_get_honors_lockfile() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "1.1.0").add("foo", "2.0.0");
    });

    let mut lockfile = Lockfile::new(Some("my-app".to_string()));
    lockfile.add_package(locked("foo", "1.0.0"));

    let resolution = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .with_lockfile(lockfile)
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 0, 0));
}

#[test]
fn test_upgrade_ignores_lockfile() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "1.1.0").add("foo", "2.0.0");
    });

    let mut lockfile = Lockfile::new(Some("my-app".to_string()));
    lockfile.add_package(locked("foo", "1.0.0"));

    let resolution = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .with_lockfile(lockfile)
        .with_mode(SolveMode::Upgrade)
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 1, 0));
}

#[test]
fn test_upgrade_with_explicit_unlock_set() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "1.1.0");
        hosted.add("bar", "1.0.0").add("bar", "1.1.0");
    });

    let mut lockfile = Lockfile::new(Some("my-app".to_string()));
    lockfile.add_package(locked("foo", "1.0.0"));
    lockfile.add_package(locked("bar", "1.0.0"));

    let resolution = VersionSolver::new(
        &sources,
        root(&[("foo", "^1.0.0"), ("bar", "^1.0.0")]),
    )
    .with_lockfile(lockfile)
    .with_mode(SolveMode::Upgrade)
    .with_unlocked(["foo".to_string()])
    .solve()
    .unwrap();

    // Only foo was unlocked; bar keeps its pin
    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 1, 0));
    assert_eq!(resolution.packages["bar"].version(), &Version::new(1, 0, 0));
}

#[test]
fn test_lockfile_pin_outside_constraints_is_discarded() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "2.0.0");
    });

    let mut lockfile = Lockfile::new(Some("my-app".to_string()));
    lockfile.add_package(locked("foo", "1.0.0"));

    // The manifest moved on to ^2.0.0; the pin no longer applies
    let resolution = VersionSolver::new(&sources, root(&[("foo", "^2.0.0")]))
        .with_lockfile(lockfile)
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["foo"].version(), &Version::new(2, 0, 0));
}

#[test]
fn test_lockfile_pin_no_longer_listed_is_discarded() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.1.0");
    });

    let mut lockfile = Lockfile::new(Some("my-app".to_string()));
    lockfile.add_package(locked("foo", "1.0.0"));

    let resolution = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .with_lockfile(lockfile)
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 1, 0));
}

#[test]
fn test_downgrade_prefers_oldest() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "1.1.0").add("foo", "1.2.0");
    });

    let resolution = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .with_mode(SolveMode::Downgrade)
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 0, 0));
}

#[test]
fn test_dev_dependencies_of_root_are_resolved() {
    let sources = registry(|hosted| {
        hosted.add("checker", "1.0.0");
    });

    let mut manifest = root(&[]);
    manifest
        .dev_dependencies
        .insert("checker".to_string(), Dependency::Simple("^1.0.0".to_string()));

    let resolution = VersionSolver::new(&sources, manifest).solve().unwrap();
    assert!(resolution.packages.contains_key("checker"));
}

#[test]
fn test_dev_dependencies_of_libraries_are_invisible() {
    let sources = registry(|hosted| {
        hosted.add_with("x", "1.0.0", |m| {
            // y ^9.0.0 exists nowhere; as a dev-dep of a non-root package
            // it must not affect resolution
            m.dev_dependencies
                .insert("y".into(), Dependency::Simple("^9.0.0".into()));
        });
    });

    let resolution = VersionSolver::new(&sources, root(&[("x", "^1.0.0")]))
        .solve()
        .unwrap();

    assert!(resolution.packages.contains_key("x"));
    assert!(!resolution.packages.contains_key("y"));
}

#[test]
fn test_dependency_cycles_resolve() {
    let sources = registry(|hosted| {
        hosted.add_with("a", "1.0.0", |m| {
            m.dependencies
                .insert("b".into(), Dependency::Simple("^1.0.0".into()));
        });
        hosted.add_with("b", "1.0.0", |m| {
            m.dependencies
                .insert("a".into(), Dependency::Simple("^1.0.0".into()));
        });
    });

    let resolution = VersionSolver::new(&sources, root(&[("a", "^1.0.0")]))
        .solve()
        .unwrap();

    assert_eq!(resolution.packages["a"].version(), &Version::new(1, 0, 0));
    assert_eq!(resolution.packages["b"].version(), &Version::new(1, 0, 0));
}

#[test]
fn test_feature_gated_dependencies() {
    let sources = registry(|hosted| {
        hosted.add_with("http", "1.0.0", |m| {
            let mut tls = std::collections::BTreeMap::new();
            tls.insert(
                "certs".to_string(),
                Dependency::Simple("^0.2.0".to_string()),
            );
            m.features.insert("tls".to_string(), tls);
        });
        hosted.add("certs", "0.2.4");
    });

    // Without the feature, the conditional group stays out
    let bare = VersionSolver::new(&sources, root(&[("http", "^1.0.0")]))
        .solve()
        .unwrap();
    assert!(!bare.packages.contains_key("certs"));

    // Requesting the feature pulls it in
    let mut manifest = root(&[]);
    manifest.dependencies.insert(
        "http".to_string(),
        Dependency::Detailed {
            version: Some("^1.0.0".to_string()),
            registry: None,
            path: None,
            git: None,
            branch: None,
            tag: None,
            rev: None,
            features: vec!["tls".to_string()],
        },
    );
    let with_tls = VersionSolver::new(&sources, manifest).solve().unwrap();
    assert_eq!(
        with_tls.packages["certs"].version(),
        &Version::new(0, 2, 4)
    );
}

#[test]
fn test_features_activated_by_a_later_dependent() {
    // http is decided before anything requests its tls feature; the
    // conditional group must still expand when the feature arrives
    let sources = registry(|hosted| {
        hosted.add_with("http", "1.0.0", |m| {
            let mut tls = std::collections::BTreeMap::new();
            tls.insert(
                "certs".to_string(),
                Dependency::Simple("^0.2.0".to_string()),
            );
            m.features.insert("tls".to_string(), tls);
        });
        hosted.add_with("z-client", "1.0.0", |m| {
            m.dependencies.insert(
                "http".to_string(),
                Dependency::Detailed {
                    version: Some("^1.0.0".to_string()),
                    registry: None,
                    path: None,
                    git: None,
                    branch: None,
                    tag: None,
                    rev: None,
                    features: vec!["tls".to_string()],
                },
            );
        });
        hosted.add("certs", "0.2.4");
    });

    let resolution = VersionSolver::new(
        &sources,
        root(&[("http", "^1.0.0"), ("z-client", "^1.0.0")]),
    )
    .solve()
    .unwrap();

    assert!(resolution.packages.contains_key("certs"));
}

#[test]
fn test_environment_constraints_satisfied() {
    let sources = registry(|hosted| {
        hosted.add_with("foo", "1.0.0", |m| {
            m.environment.insert("keel".to_string(), "^3.0.0".to_string());
        });
    });

    let resolution = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .with_environment("keel", Version::new(3, 2, 0))
        .solve()
        .unwrap();

    // Magic packages never appear in the result
    assert_eq!(resolution.packages.len(), 1);
    assert!(resolution.packages.contains_key("foo"));
}

#[test]
fn test_sdk_incompatibility_backs_off_to_error() {
    let sources = registry(|hosted| {
        hosted.add_with("foo", "1.0.0", |m| {
            m.environment.insert("keel".to_string(), "^4.0.0".to_string());
        });
    });

    let err = VersionSolver::new(&sources, root(&[("foo", "^1.0.0")]))
        .with_environment("keel", Version::new(3, 2, 0))
        .solve()
        .unwrap_err();

    let SolveError::SdkIncompatible(report) = err else {
        panic!("expected SdkIncompatible, got {:?}", err);
    };
    let text = report.to_string();
    assert!(text.contains("foo 1.0.0 requires keel ^4.0.0."), "{}", text);
    assert!(text.contains("The current keel version is 3.2.0."), "{}", text);
}

#[test]
fn test_every_requirement_is_satisfied_in_the_result() {
    let sources = registry(|hosted| {
        hosted.add_with("a", "1.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple("^1.0.0".into()));
        });
        hosted.add_with("b", "1.0.0", |m| {
            m.dependencies
                .insert("c".into(), Dependency::Simple(">=1.2.0".into()));
        });
        hosted.add("c", "1.0.0").add("c", "1.2.0").add("c", "1.5.0");
    });

    let resolution = VersionSolver::new(&sources, root(&[("a", "^1.0.0"), ("b", "^1.0.0")]))
        .solve()
        .unwrap();

    // Re-walk every selected manifest and check its requirements against
    // the selected ids
    let hosted = sources.get("hosted").unwrap();
    for id in resolution.packages.values() {
        let manifest = hosted.describe_dependencies(id).unwrap();
        for range in manifest.dependency_ranges(&sources).unwrap() {
            let selected = &resolution.packages[range.to_ref().name()];
            assert!(
                range.allows(selected),
                "{} does not allow {}",
                range,
                selected
            );
        }
    }
    assert_eq!(resolution.packages["c"].version(), &Version::new(1, 5, 0));
}

#[test]
fn test_identical_inputs_produce_identical_lockfiles() {
    let run = || {
        let sources = registry(|hosted| {
            hosted.add("x", "1.0.0").add("x", "1.1.0");
            hosted.add_with("y", "2.0.0", |m| {
                m.dependencies
                    .insert("x".into(), Dependency::Simple("^1.0.0".into()));
            });
            hosted.add("z", "0.1.0");
        });
        VersionSolver::new(&sources, root(&[("y", "^2.0.0"), ("z", "*"), ("x", "*")]))
            .solve()
            .unwrap()
            .to_lockfile()
            .serialize()
            .unwrap()
    };

    let first = run();
    assert_eq!(first, run());
    assert_eq!(first, run());
}

#[test]
fn test_emitted_lockfile_round_trips() {
    let sources = registry(|hosted| {
        hosted.add_with("a", "1.0.0", |m| {
            m.dependencies
                .insert("b".into(), Dependency::Simple("^1.0.0".into()));
        });
        hosted.add("b", "1.4.0");
    });

    let lockfile = VersionSolver::new(&sources, root(&[("a", "^1.0.0")]))
        .solve()
        .unwrap()
        .to_lockfile();

    let parsed = Lockfile::from_str(&lockfile.serialize().unwrap()).unwrap();
    assert_eq!(parsed, {
        let mut sorted = lockfile.clone();
        sorted.sort_packages();
        sorted
    });
    assert_eq!(parsed.get_package("a").unwrap().dependencies, vec!["b"]);
}

#[test]
fn test_get_with_unlock_set_releases_only_those_pins() {
    let sources = registry(|hosted| {
        hosted.add("foo", "1.0.0").add("foo", "1.1.0");
        hosted.add("bar", "1.0.0").add("bar", "1.1.0");
    });

    let mut lockfile = Lockfile::new(Some("my-app".to_string()));
    lockfile.add_package(locked("foo", "1.0.0"));
    lockfile.add_package(locked("bar", "1.0.0"));

    let resolution = VersionSolver::new(
        &sources,
        root(&[("foo", "^1.0.0"), ("bar", "^1.0.0")]),
    )
    .with_lockfile(lockfile)
    .with_unlocked(["foo".to_string()])
    .solve()
    .unwrap();

    assert_eq!(resolution.packages["foo"].version(), &Version::new(1, 1, 0));
    assert_eq!(resolution.packages["bar"].version(), &Version::new(1, 0, 0));
}

#[test]
fn test_one_name_from_two_sources_is_rejected() {
    let workspace = tempfile::tempdir().unwrap();
    let x_dir = workspace.path().join("x");
    std::fs::create_dir_all(&x_dir).unwrap();
    std::fs::write(
        x_dir.join("keel.toml"),
        "[package]\nname = \"x\"\nversion = \"1.0.0\"\n",
    )
    .unwrap();

    let mut hosted = MemorySource::new("hosted");
    hosted.add("x", "1.0.0");
    hosted.add_with("a", "1.0.0", |m| {
        m.dependencies.insert(
            "x".to_string(),
            Dependency::Detailed {
                version: None,
                registry: None,
                path: Some(x_dir.display().to_string()),
                git: None,
                branch: None,
                tag: None,
                rev: None,
                features: Vec::new(),
            },
        );
    });

    let mut sources = SourceRegistry::new();
    sources.register(Box::new(hosted));
    sources.register(Box::new(keel_pm::PathSource::new(
        workspace.path().to_path_buf(),
    )));

    // The root wants x from the registry; a wants the same name from disk
    let err = VersionSolver::new(&sources, root(&[("x", "^1.0.0"), ("a", "^1.0.0")]))
        .solve()
        .unwrap_err();
    assert!(matches!(err, SolveError::SourceMismatch { name, .. } if name == "x"));
}
