//! AetherOS live ISO builder CLI
//!
//! # Usage
//!
//! ```bash
//! # Build into ~/aetheros-build (needs root)
//! sudo aetheros-builder
//!
//! # Build into a specific workdir with a config file
//! sudo aetheros-builder /srv/build --config aetheros.toml
//!
//! # Only check host prerequisites
//! aetheros-builder check
//!
//! # Show what the last build in a workdir did
//! aetheros-builder /srv/build status
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aetheros_builder::pipeline::{load_manifest, paths, BuildPaths, BuildStatus};
use aetheros_builder::process::HostRunner;
use aetheros_builder::{preflight, BuildConfig, Pipeline};

#[derive(Parser)]
#[command(name = "aetheros-builder")]
#[command(author, version, about = "AetherOS live ISO builder", long_about = None)]
struct Cli {
    /// Build directory (default: ~/aetheros-build)
    workdir: Option<PathBuf>,

    /// TOML build configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the profile name (ISO prefix and volume id)
    #[arg(long, value_name = "NAME")]
    profile: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host preflight checks only
    Check,
    /// Show the manifest of the last build in the workdir
    Status,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = BuildConfig::load_or_default(cli.config.as_deref())?;
    if let Some(profile) = cli.profile {
        config.profile = profile;
        config.validate()?;
    }
    let workdir = cli.workdir.unwrap_or_else(paths::default_workdir);

    match cli.command {
        Some(Commands::Check) => cmd_check(&config),
        Some(Commands::Status) => cmd_status(&workdir),
        None => cmd_build(&config, workdir),
    }
}

fn cmd_check(config: &BuildConfig) -> Result<()> {
    let report = preflight::run_checks(config);
    report.print_summary();
    if !report.is_ok() {
        bail!("{} preflight check(s) failed", report.errors().len());
    }
    Ok(())
}

fn cmd_status(workdir: &std::path::Path) -> Result<()> {
    let manifest = BuildPaths::new(workdir).manifest();
    let Some(report) = load_manifest(&manifest)? else {
        println!("No build recorded in {}", workdir.display());
        return Ok(());
    };

    let status = match report.status {
        BuildStatus::Success => "success",
        BuildStatus::Failed => "FAILED",
        BuildStatus::Running => "interrupted",
    };
    println!("=== {} {} ({}) ===", report.profile, report.build_date, status);
    println!("  started:  {}", report.started_at_utc);
    if let Some(finished) = &report.finished_at_utc {
        println!("  finished: {}", finished);
    }
    for record in &report.stages {
        println!(
            "  [{}] {:<10} {:>8.1}s",
            if record.ok { "OK" } else { "FAIL" },
            record.stage.name(),
            record.duration_ms as f64 / 1000.0
        );
    }
    if let Some(kernel) = &report.kernel_version {
        println!("  kernel:   {}", kernel);
    }
    if let Some(iso) = &report.iso {
        println!("  ISO:      {}", iso.display());
    }
    if let Some(sha) = &report.sha256 {
        println!("  SHA256:   {}", sha);
    }
    if let Some(err) = &report.error {
        println!("  error:    {}", err);
    }
    Ok(())
}

fn cmd_build(config: &BuildConfig, workdir: PathBuf) -> Result<()> {
    preflight::check_all(config)?;

    let runner = HostRunner;
    let report = Pipeline::new(config, &workdir, &runner).run()?;

    println!("\n=== Build Complete ===");
    if let Some(iso) = &report.iso {
        println!("  ISO:    {}", iso.display());
    }
    if let Some(sha) = &report.sha256 {
        println!("  SHA256: {}", sha);
    }
    if let Some(unmount) = &report.unmount {
        for leaked in &unmount.leaked {
            println!("  still mounted: {}", leaked.display());
        }
    }
    Ok(())
}
