//! Preflight checks for build prerequisites.
//!
//! Validates that the host can run the build BEFORE anything is mutated:
//! the process must be root, every external tool must be in PATH, the
//! host files the build copies from must exist and both package lists must
//! parse.
//!
//! # Example
//!
//! ```rust,ignore
//! use aetheros_builder::preflight;
//!
//! let report = preflight::run_checks(&config);
//! report.print_summary();
//!
//! preflight::check_all(&config)?;
//! ```

use anyhow::{bail, Result};

use crate::config::BuildConfig;
use crate::packages::PackageList;
use crate::process;

/// Required host tools for building the live ISO.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("debootstrap", "debootstrap"),
    ("chroot", "coreutils"),
    ("mount", "mount"),
    ("umount", "mount"),
    ("mksquashfs", "squashfs-tools"),
    ("grub-mkstandalone", "grub-common"),
    ("mkfs.vfat", "dosfstools"),
    ("mmd", "mtools"),
    ("mcopy", "mtools"),
    ("xorriso", "xorriso"),
];

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    /// How to fix a failed check.
    pub suggestion: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// All preflight results for one config.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let status = if check.passed { "[OK]" } else { "[FAIL]" };
            println!("{} {}: {}", status, check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("     Suggestion: {}", suggestion);
            }
        }

        println!();
        if self.is_ok() {
            println!(
                "All preflight checks passed ({}/{})",
                self.passed_count(),
                self.checks.len()
            );
        } else {
            println!(
                "Preflight checks failed: {} of {} passed",
                self.passed_count(),
                self.checks.len()
            );
        }
    }
}

/// Whether the current process runs with effective uid 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn check_root() -> CheckResult {
    if is_root() {
        CheckResult::pass("root", "running as root")
    } else {
        CheckResult::fail(
            "root",
            "not running as root (debootstrap, chroot and mount need it)",
            "re-run with sudo",
        )
    }
}

fn check_tools(tools: &[(&str, &str)]) -> Vec<CheckResult> {
    tools
        .iter()
        .map(|(tool, package)| match process::which(tool) {
            Some(path) => CheckResult::pass(format!("{} tool", tool), format!("found at {}", path)),
            None => CheckResult::fail(
                format!("{} tool", tool),
                "not found in PATH",
                format!("install package '{}'", package),
            ),
        })
        .collect()
}

fn check_host_files(config: &BuildConfig) -> Vec<CheckResult> {
    [
        (config.host.resolv_conf.clone(), "resolvconf"),
        (config.cdboot_img(), "grub-pc-bin"),
        (config.boot_hybrid_img(), "grub-pc-bin"),
    ]
    .into_iter()
    .map(|(path, package)| {
        let name = format!("host file {}", path.display());
        if path.is_file() {
            CheckResult::pass(name, "present")
        } else {
            CheckResult::fail(name, "missing", format!("install package '{}'", package))
        }
    })
    .collect()
}

fn check_package_lists(config: &BuildConfig) -> Vec<CheckResult> {
    [&config.packages.include, &config.packages.exclude]
        .into_iter()
        .map(|path| {
            let name = format!("package list {}", path.display());
            if !path.is_file() {
                return CheckResult::fail(
                    name,
                    "missing",
                    "create it or set [packages] in the config",
                );
            }
            match PackageList::load(path) {
                Ok(list) => CheckResult::pass(name, format!("{} package(s)", list.len())),
                Err(err) => CheckResult::fail(
                    name,
                    format!("{:#}", err),
                    "put one package name per line",
                ),
            }
        })
        .collect()
}

/// Run every preflight check.
pub fn run_checks(config: &BuildConfig) -> PreflightReport {
    let mut report = PreflightReport::default();
    report.checks.push(check_root());
    report.checks.extend(check_tools(REQUIRED_TOOLS));
    report.checks.extend(check_host_files(config));
    report.checks.extend(check_package_lists(config));
    report
}

/// Fail with every unmet prerequisite listed.
pub fn check_all(config: &BuildConfig) -> Result<()> {
    let report = run_checks(config);
    fail_on_errors(&report.checks, "Preflight checks failed")
}

fn fail_on_errors(checks: &[CheckResult], headline: &str) -> Result<()> {
    let failed: Vec<&CheckResult> = checks.iter().filter(|c| !c.passed).collect();
    if failed.is_empty() {
        return Ok(());
    }

    let msg = failed
        .iter()
        .map(|c| match &c.suggestion {
            Some(s) => format!("  {}: {} ({})", c.name, c.message, s),
            None => format!("  {}: {}", c.name, c.message),
        })
        .collect::<Vec<_>>()
        .join("\n");
    bail!("{}:\n{}", headline, msg);
}
