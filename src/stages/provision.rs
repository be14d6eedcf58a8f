//! Stage 3: provision the chroot with apt.
//!
//! Sequence: update, full-upgrade, install the include list (no recommends,
//! no suggests), purge the exclude list and the bloat package, autoremove,
//! verify the result against dpkg, clear apt caches, set the default
//! systemd target.
//!
//! Purges are typed: a package that is not installed is
//! [`PurgeOutcome::AlreadyAbsent`] and not an error, while a purge that apt
//! refuses, or a dpkg query that fails for any other reason than "no such
//! package", is [`PurgeOutcome::ToolFailure`] and aborts the stage.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::StageContext;
use crate::packages::PackageList;

/// `dpkg-query -W` exit status when no package matches.
const DPKG_QUERY_NO_MATCH: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PurgeOutcome {
    Removed,
    AlreadyAbsent,
    ToolFailure { code: Option<i32>, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeRecord {
    pub package: String,
    #[serde(flatten)]
    pub outcome: PurgeOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// Include-list packages dpkg reports as installed after autoremove.
    pub installed: Vec<String>,
    pub purged: Vec<PurgeRecord>,
}

/// What dpkg knows about one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageState {
    Installed,
    /// Known to dpkg but not fully installed (`config-files`, `half-installed`, ...).
    Partial(String),
    Absent,
}

#[derive(Debug)]
enum DpkgAnswer {
    State(PackageState),
    Failed { code: Option<i32>, stderr: String },
}

/// Load the configured package lists and provision.
pub fn run(ctx: &StageContext<'_>) -> Result<ProvisionReport> {
    let include = PackageList::load(&ctx.config.packages.include)?;
    let exclude = PackageList::load(&ctx.config.packages.exclude)?;
    run_with_lists(ctx, &include, &exclude)
}

pub fn run_with_lists(
    ctx: &StageContext<'_>,
    include: &PackageList,
    exclude: &PackageList,
) -> Result<ProvisionReport> {
    let mut report = ProvisionReport::default();

    apt_get(ctx, &["update"], "refreshing package metadata failed")?;
    apt_get(ctx, &["-y", "full-upgrade"], "full-upgrade failed")?;

    if include.is_empty() {
        info!("include list is empty, nothing to install");
    } else {
        info!("installing {} package(s)", include.len());
        ctx.chroot_cmd("apt-get")
            .args(["install", "-y", "--no-install-recommends", "--no-install-suggests"])
            .args(include.iter())
            .error_msg("installing the include list failed; every entry must be a valid package name")
            .run_interactive(ctx.runner)?;
    }

    let bloat = ctx.config.packages.bloat.trim();
    let mut to_purge: Vec<&str> = exclude.iter().collect();
    if !bloat.is_empty() && !to_purge.contains(&bloat) {
        to_purge.push(bloat);
    }

    for package in &to_purge {
        let outcome = purge_package(ctx, package)?;
        match &outcome {
            PurgeOutcome::Removed => info!("purged {}", package),
            PurgeOutcome::AlreadyAbsent => info!("{} not installed, nothing to purge", package),
            PurgeOutcome::ToolFailure { code, stderr } => bail!(
                "purging '{}' failed (exit {:?}): {}",
                package,
                code,
                stderr.trim()
            ),
        }
        report.purged.push(PurgeRecord {
            package: package.to_string(),
            outcome,
        });
    }

    apt_get(ctx, &["-y", "autoremove", "--purge"], "autoremove failed")?;
    report.installed = verify_package_state(ctx, include, &to_purge)?;

    apt_get(ctx, &["clean"], "apt-get clean failed")?;
    clear_apt_lists(&ctx.paths.chroot)?;

    ctx.chroot_cmd("systemctl")
        .args(["set-default", ctx.config.default_target.as_str()])
        .error_msg(format!(
            "setting default target '{}' failed",
            ctx.config.default_target
        ))
        .run(ctx.runner)?;

    Ok(report)
}

fn apt_get(ctx: &StageContext<'_>, args: &[&str], error_msg: &str) -> Result<()> {
    ctx.chroot_cmd("apt-get")
        .args(args)
        .error_msg(error_msg)
        .run_interactive(ctx.runner)?;
    Ok(())
}

fn ask_dpkg(ctx: &StageContext<'_>, package: &str) -> Result<DpkgAnswer> {
    let query = ctx
        .chroot_cmd("dpkg-query")
        .args(["-W", "-f=${Status}", package])
        .run_status(ctx.runner)?;

    Ok(match query.code {
        Some(0) => DpkgAnswer::State(classify_status(&query.stdout)),
        Some(DPKG_QUERY_NO_MATCH) => DpkgAnswer::State(PackageState::Absent),
        code => DpkgAnswer::Failed {
            code,
            stderr: query.stderr,
        },
    })
}

/// Ask dpkg inside the chroot for a package's state.
///
/// Fails when the query itself fails (chroot or dpkg-query broken), which is
/// never read as "not installed".
pub fn query_package(ctx: &StageContext<'_>, package: &str) -> Result<PackageState> {
    match ask_dpkg(ctx, package)? {
        DpkgAnswer::State(state) => Ok(state),
        DpkgAnswer::Failed { code, stderr } => bail!(
            "querying dpkg for '{}' failed (exit {:?}): {}",
            package,
            code,
            stderr.trim()
        ),
    }
}

/// Purge one package, distinguishing "not installed" from a real failure.
pub fn purge_package(ctx: &StageContext<'_>, package: &str) -> Result<PurgeOutcome> {
    match ask_dpkg(ctx, package)? {
        DpkgAnswer::State(PackageState::Absent) => return Ok(PurgeOutcome::AlreadyAbsent),
        DpkgAnswer::State(_) => {}
        DpkgAnswer::Failed { code, stderr } => return Ok(PurgeOutcome::ToolFailure { code, stderr }),
    }

    let result = ctx
        .chroot_cmd("apt-get")
        .args(["-y", "purge", package])
        .run_status(ctx.runner)?;

    if result.success() {
        Ok(PurgeOutcome::Removed)
    } else {
        Ok(PurgeOutcome::ToolFailure {
            code: result.code,
            stderr: result.stderr,
        })
    }
}

/// Every include entry must be installed and every purged entry gone.
///
/// Purges and autoremove can take include-list packages with them, so this
/// runs after both. Returns the include list as confirmed by dpkg.
fn verify_package_state(
    ctx: &StageContext<'_>,
    include: &PackageList,
    purged: &[&str],
) -> Result<Vec<String>> {
    let mut violations = Vec::new();
    let mut installed = Vec::with_capacity(include.len());

    for package in include.iter() {
        match query_package(ctx, package)? {
            PackageState::Installed => installed.push(package.to_string()),
            PackageState::Partial(status) => {
                violations.push(format!("{} is only partially installed ({})", package, status))
            }
            PackageState::Absent => violations.push(format!("{} is not installed", package)),
        }
    }
    for package in purged {
        match query_package(ctx, package)? {
            PackageState::Absent => {}
            PackageState::Installed => violations.push(format!("{} is still installed", package)),
            PackageState::Partial(status) => {
                violations.push(format!("{} is still present ({})", package, status))
            }
        }
    }

    if !violations.is_empty() {
        bail!(
            "chroot package state does not match the package lists:\n  {}",
            violations.join("\n  ")
        );
    }
    Ok(installed)
}

/// Read a dpkg `${Status}` string ("want eflag status").
fn classify_status(status: &str) -> PackageState {
    match status.split_whitespace().last() {
        None | Some("not-installed") => PackageState::Absent,
        Some("installed") => PackageState::Installed,
        Some(other) => PackageState::Partial(other.to_string()),
    }
}

/// Remove downloaded package indexes; apt recreates them on the next update.
fn clear_apt_lists(chroot: &Path) -> Result<()> {
    let lists = chroot.join("var/lib/apt/lists");
    for dir in [lists.clone(), lists.join("partial")] {
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir).with_context(|| format!("reading '{}'", dir.display()))? {
            let path = entry?.path();
            let keep = path.file_name().map_or(false, |n| n == "lock");
            if path.is_file() && !keep {
                fs::remove_file(&path)
                    .with_context(|| format!("removing '{}'", path.display()))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::process::{Cmd, CommandResult};
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    /// In-memory dpkg database behind the chroot's `apt-get` and `dpkg-query`.
    ///
    /// `apt-get install` adds its package arguments, `apt-get purge` removes
    /// them, `dpkg-query -W` answers from the set (exit 1 when absent).
    #[derive(Clone, Default)]
    pub(crate) struct FakeDpkg {
        installed: Rc<RefCell<BTreeSet<String>>>,
    }

    impl FakeDpkg {
        pub(crate) fn with_installed(packages: &[&str]) -> Self {
            let dpkg = Self::default();
            for p in packages {
                dpkg.insert(p);
            }
            dpkg
        }

        pub(crate) fn insert(&self, package: &str) {
            self.installed.borrow_mut().insert(package.to_string());
        }

        pub(crate) fn remove(&self, package: &str) {
            self.installed.borrow_mut().remove(package);
        }

        pub(crate) fn is_installed(&self, package: &str) -> bool {
            self.installed.borrow().contains(package)
        }

        /// Answer `cmd` if it is an apt-get or dpkg-query run inside the chroot.
        pub(crate) fn answer(&self, cmd: &Cmd) -> Option<CommandResult> {
            if cmd.program() != "chroot" {
                return None;
            }
            let args = cmd.args_lossy();
            let rest = args.get(2..).unwrap_or_default();
            match args.get(1).map(String::as_str) {
                Some("dpkg-query") => {
                    let package = rest.last().map(String::as_str).unwrap_or_default();
                    if self.is_installed(package) {
                        Some(CommandResult::exited(0).with_stdout("install ok installed"))
                    } else {
                        Some(CommandResult::exited(1))
                    }
                }
                Some("apt-get") => {
                    let verb = rest.iter().position(|a| a == "install" || a == "purge");
                    if let Some(pos) = verb {
                        let names = rest[pos + 1..].iter().filter(|a| !a.starts_with('-'));
                        for name in names {
                            if rest[pos] == "install" {
                                self.insert(name);
                            } else {
                                self.remove(name);
                            }
                        }
                    }
                    Some(CommandResult::exited(0))
                }
                _ => None,
            }
        }
    }
}
