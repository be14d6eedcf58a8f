//! Build driver.
//!
//! [`Pipeline::run`] executes the eight stages of [`Stage::ALL`] in order,
//! stops at the first failing stage, and always runs the unmount stage once
//! the bind mounts exist. The outcome is returned as a [`BuildReport`] and
//! written to `<workdir>/build-manifest.json`.

pub mod lock;
pub mod manifest;
pub mod paths;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, info_span, warn};

use crate::config::BuildConfig;
use crate::process::Runner;
use crate::stages::mounts::MountGuard;
use crate::stages::{bootloader, bootstrap, iso, kernel, mounts, pack, provision};
use crate::stages::{Stage, StageContext};

pub use lock::WorkdirLock;
pub use manifest::{load_manifest, BuildReport, BuildStatus, StageRecord};
pub use paths::BuildPaths;

pub struct Pipeline<'a> {
    config: &'a BuildConfig,
    paths: BuildPaths,
    runner: &'a dyn Runner,
    build_date: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a BuildConfig, workdir: &Path, runner: &'a dyn Runner) -> Self {
        Self {
            config,
            paths: BuildPaths::new(workdir),
            runner,
            build_date: paths::today(),
        }
    }

    /// Pin the `YYYYMMDD` used in the ISO name.
    pub fn with_build_date(mut self, build_date: impl Into<String>) -> Self {
        self.build_date = build_date.into();
        self
    }

    pub fn paths(&self) -> &BuildPaths {
        &self.paths
    }

    /// Run the whole build under the workdir lock.
    ///
    /// The manifest is written on failure too; the returned error is the
    /// first stage failure.
    pub fn run(&self) -> Result<BuildReport> {
        fs::create_dir_all(&self.paths.workdir).with_context(|| {
            format!("creating workdir '{}'", self.paths.workdir.display())
        })?;
        let _lock = WorkdirLock::acquire(&self.paths.lock_file())?;

        let mut report = BuildReport {
            profile: self.config.profile.clone(),
            release: self.config.release.clone(),
            build_date: self.build_date.clone(),
            status: BuildStatus::Running,
            error: None,
            iso: None,
            sha256: None,
            kernel_version: None,
            filesystem_size: None,
            bootstrap: None,
            stages: Vec::new(),
            installed: Vec::new(),
            purged: Vec::new(),
            unmount: None,
            started_at_utc: now_rfc3339(),
            finished_at_utc: None,
        };

        info!(
            "building {} ({}) in {}",
            self.config.profile,
            self.config.release,
            self.paths.workdir.display()
        );
        let result = self.run_stages(&mut report);
        report.finished_at_utc = Some(now_rfc3339());
        let manifest_path = self.paths.manifest();

        match result {
            Ok(()) => {
                report.status = BuildStatus::Success;
                manifest::write_manifest(&manifest_path, &report)?;
                Ok(report)
            }
            Err(err) => {
                report.status = BuildStatus::Failed;
                report.error = Some(format!("{:#}", err));
                if let Err(write_err) = manifest::write_manifest(&manifest_path, &report) {
                    warn!("could not record failed build: {:#}", write_err);
                }
                Err(err)
            }
        }
    }

    fn run_stages(&self, report: &mut BuildReport) -> Result<()> {
        let ctx = StageContext::new(self.config, &self.paths, self.runner);

        let outcome = stage(report, Stage::Bootstrap, || bootstrap::run(&ctx))?;
        report.bootstrap = Some(outcome);

        let mut guard: MountGuard<'_> = stage(report, Stage::Mount, || mounts::mount_all(&ctx))?;
        let mounted = self.run_mounted(&ctx, &mut guard, report);

        let unmount = stage(report, Stage::Unmount, || Ok(guard.release()))?;
        if !unmount.leaked.is_empty() {
            warn!(
                "{} mount(s) still attached under {}",
                unmount.leaked.len(),
                self.paths.chroot.display()
            );
        }
        report.unmount = Some(unmount);

        mounted
    }

    /// Stages 3-7, which need the bind mounts (provision) or run while they exist.
    ///
    /// The chroot's own resolv.conf is put back before packing so the host
    /// resolver never ends up in the image.
    fn run_mounted(
        &self,
        ctx: &StageContext<'_>,
        guard: &mut MountGuard<'_>,
        report: &mut BuildReport,
    ) -> Result<()> {
        let provisioned = stage(report, Stage::Provision, || {
            let provisioned = provision::run(ctx)?;
            guard.restore_resolv_conf()?;
            Ok(provisioned)
        })?;
        report.installed = provisioned.installed;
        report.purged = provisioned.purged;

        let packed = stage(report, Stage::Pack, || pack::run(ctx))?;
        report.filesystem_size = Some(packed.filesystem_size);

        stage(report, Stage::Bootloader, || bootloader::run(ctx))?;

        let staged = stage(report, Stage::Kernel, || kernel::run(ctx))?;
        report.kernel_version = Some(staged.version);

        let mastered = stage(report, Stage::Iso, || iso::run(ctx, &self.build_date))?;
        report.iso = Some(mastered.iso);
        report.sha256 = Some(mastered.sha256);

        Ok(())
    }
}

/// Run one stage inside its span, recording duration and outcome.
fn stage<T>(
    report: &mut BuildReport,
    which: Stage,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let span = info_span!("stage", name = which.name());
    let _enter = span.enter();
    info!(
        "[{}/{}] {}",
        which.number(),
        Stage::ALL.len(),
        which.description()
    );

    let started = Instant::now();
    let result = f();
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    report.stages.push(StageRecord {
        stage: which,
        duration_ms,
        ok: result.is_ok(),
    });
    result.with_context(|| format!("stage '{}' failed", which))
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
