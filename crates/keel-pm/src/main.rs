//! Keel package manager CLI (keelpm)

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use keel_pm::{
    find_project_root, Lockfile, PackageManifest, SolveError, SolveMode, SourceError,
    SourceRegistry, Version, VersionSolver,
};
use std::process;

/// The SDK version this build of keelpm ships with; overridable with
/// KEEL_SDK_VERSION for testing against other toolchains
const SDK_VERSION: &str = "3.2.0";

const EXIT_USAGE: i32 = 64;
const EXIT_DATA: i32 = 65;
const EXIT_UNAVAILABLE: i32 = 69;

#[derive(Parser)]
#[command(name = "keelpm")]
#[command(about = "Keel package manager", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve dependencies, honoring keel.lock where possible
    Get {
        /// Packages to unlock (default: none)
        packages: Vec<String>,
    },
    /// Re-resolve, preferring the newest allowed versions
    Upgrade {
        /// Packages to unlock (default: all)
        packages: Vec<String>,
    },
    /// Re-resolve, preferring the oldest allowed versions
    Downgrade {
        /// Packages to unlock (default: all)
        packages: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::try_parse().unwrap_or_else(|err| {
        if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
            err.exit();
        }
        let _ = err.print();
        process::exit(EXIT_USAGE);
    });

    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let (mode, unlock) = match cli.command {
        Commands::Get { packages } => (SolveMode::Get, packages),
        Commands::Upgrade { packages } => (SolveMode::Upgrade, packages),
        Commands::Downgrade { packages } => (SolveMode::Downgrade, packages),
    };

    let cwd = std::env::current_dir().context("could not determine working directory")?;
    let project_root = find_project_root(&cwd)
        .context("no keel.toml found in this directory or any parent")?;
    let manifest = PackageManifest::from_file(&project_root.join("keel.toml"))?;
    let sources = SourceRegistry::with_defaults(project_root.clone())?;

    let lock_path = project_root.join("keel.lock");
    let mut solver = VersionSolver::new(&sources, manifest)
        .with_mode(mode)
        .with_unlocked(unlock)
        .with_environment("keel", sdk_version());
    if lock_path.exists() {
        solver = solver.with_lockfile(Lockfile::from_file(&lock_path)?);
    }

    let resolution = solver.solve()?;
    let lockfile = resolution.to_lockfile();
    lockfile.to_file(&lock_path).context("failed to write keel.lock")?;

    println!("Resolved {} packages.", resolution.packages.len());
    Ok(())
}

fn sdk_version() -> Version {
    std::env::var("KEEL_SDK_VERSION")
        .ok()
        .and_then(|raw| Version::parse(&raw).ok())
        .unwrap_or_else(|| {
            Version::parse(SDK_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0))
        })
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(solve) = err.downcast_ref::<SolveError>() {
        return if solve.is_transport() {
            EXIT_UNAVAILABLE
        } else {
            EXIT_DATA
        };
    }
    if let Some(source) = err.downcast_ref::<SourceError>() {
        return if source.is_transport() {
            EXIT_UNAVAILABLE
        } else {
            EXIT_DATA
        };
    }
    EXIT_DATA
}
