//! Stage 2 (bind mounts) and stage 8 (release).
//!
//! [`mount_all`] binds the host's `/dev`, `/run`, `/proc` and `/sys` into the
//! chroot and returns a [`MountGuard`]. The guard owns every mount that
//! succeeded: [`MountGuard::release`] unmounts them in reverse order, and
//! dropping an unreleased guard does the same, so a failing stage can never
//! leak host mounts.
//!
//! The host resolver config is copied over the chroot's `etc/resolv.conf`
//! for the duration of provisioning; [`MountGuard::restore_resolv_conf`]
//! puts the chroot's own entry back so the host file never reaches the image.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::StageContext;
use crate::process::{Cmd, Runner};

/// Host pseudo-filesystems bound into the chroot, in mount order.
pub const BIND_MOUNTS: &[&str] = &["dev", "run", "proc", "sys"];

/// Result of releasing the bind mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmountReport {
    pub unmounted: Vec<PathBuf>,
    /// Mounts that survived both a normal and a lazy unmount.
    pub leaked: Vec<PathBuf>,
}

/// The chroot's `etc/resolv.conf` before the host copy replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvConf {
    /// Usually `../run/systemd/resolve/stub-resolv.conf`.
    Symlink(PathBuf),
    File {
        contents: Vec<u8>,
        permissions: fs::Permissions,
    },
    Missing,
}

/// Scoped ownership of the chroot's bind mounts.
pub struct MountGuard<'a> {
    runner: &'a dyn Runner,
    mounted: Vec<PathBuf>,
    /// Chroot root and the resolver entry to put back.
    resolv: Option<(PathBuf, ResolvConf)>,
}

impl<'a> MountGuard<'a> {
    fn new(runner: &'a dyn Runner) -> Self {
        Self {
            runner,
            mounted: Vec::new(),
            resolv: None,
        }
    }

    /// Put the chroot's original `etc/resolv.conf` back. No-op once done.
    pub fn restore_resolv_conf(&mut self) -> Result<()> {
        if let Some((chroot, original)) = self.resolv.take() {
            restore_resolv_conf(&chroot, &original)?;
            debug!("restored {}/etc/resolv.conf", chroot.display());
        }
        Ok(())
    }

    /// Mount points currently held, in mount order.
    pub fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Unmount everything in reverse order.
    ///
    /// Best-effort: a failed unmount is retried lazily and otherwise only
    /// reported. Calling it again is a no-op.
    pub fn release(&mut self) -> UnmountReport {
        let mut report = UnmountReport::default();

        if let Err(err) = self.restore_resolv_conf() {
            warn!("could not restore chroot resolv.conf: {:#}", err);
        }

        while let Some(target) = self.mounted.pop() {
            if unmount(self.runner, &target) {
                debug!("unmounted {}", target.display());
                report.unmounted.push(target);
            } else {
                warn!("could not unmount {}; it is still mounted", target.display());
                report.leaked.push(target);
            }
        }

        report
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if !self.mounted.is_empty() || self.resolv.is_some() {
            warn!(
                "releasing {} bind mount(s) left behind by an aborted build",
                self.mounted.len()
            );
            let _ = self.release();
        }
    }
}

fn unmount(runner: &dyn Runner, target: &Path) -> bool {
    let plain = Cmd::new("umount").arg_path(target).run_status(runner);
    if matches!(&plain, Ok(r) if r.success()) {
        return true;
    }

    warn!("umount {} failed, retrying lazily", target.display());
    let lazy = Cmd::new("umount")
        .arg("--lazy")
        .arg_path(target)
        .run_status(runner);
    matches!(lazy, Ok(r) if r.success())
}

/// Bind the host pseudo-filesystems and resolver config into the chroot.
pub fn mount_all<'a>(ctx: &StageContext<'a>) -> Result<MountGuard<'a>> {
    let chroot = &ctx.paths.chroot;
    let mut guard = MountGuard::new(ctx.runner);

    for name in BIND_MOUNTS {
        let source = Path::new("/").join(name);
        let target = chroot.join(name);
        fs::create_dir_all(&target)
            .with_context(|| format!("creating mount point '{}'", target.display()))?;

        Cmd::new("mount")
            .arg("--bind")
            .arg_path(&source)
            .arg_path(&target)
            .error_msg(format!("bind-mounting {} into the chroot failed", source.display()))
            .run(ctx.runner)?;
        guard.mounted.push(target);
    }
    info!("bound {} into {}", BIND_MOUNTS.join(", "), chroot.display());

    let original = install_resolv_conf(&ctx.config.host.resolv_conf, chroot)?;
    guard.resolv = Some((chroot.clone(), original));

    Ok(guard)
}

/// Copy the host resolver config into the chroot, returning what it replaced.
///
/// A symlinked `etc/resolv.conf` (systemd-resolved) is replaced rather than
/// written through, since `/run` is bound to the host.
pub fn install_resolv_conf(host_resolv: &Path, chroot: &Path) -> Result<ResolvConf> {
    let target = chroot.join("etc/resolv.conf");
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let original = if target.is_symlink() {
        ResolvConf::Symlink(
            fs::read_link(&target)
                .with_context(|| format!("reading link '{}'", target.display()))?,
        )
    } else if target.exists() {
        ResolvConf::File {
            contents: fs::read(&target)
                .with_context(|| format!("reading '{}'", target.display()))?,
            permissions: fs::metadata(&target)?.permissions(),
        }
    } else {
        ResolvConf::Missing
    };

    if original != ResolvConf::Missing {
        fs::remove_file(&target)
            .with_context(|| format!("removing '{}'", target.display()))?;
    }
    fs::copy(host_resolv, &target).with_context(|| {
        format!(
            "copying '{}' to '{}'",
            host_resolv.display(),
            target.display()
        )
    })?;
    Ok(original)
}

/// Replace the host copy with the chroot's original resolver entry.
pub fn restore_resolv_conf(chroot: &Path, original: &ResolvConf) -> Result<()> {
    let target = chroot.join("etc/resolv.conf");
    if target.is_symlink() || target.exists() {
        fs::remove_file(&target)
            .with_context(|| format!("removing '{}'", target.display()))?;
    }

    match original {
        ResolvConf::Symlink(link) => std::os::unix::fs::symlink(link, &target)
            .with_context(|| format!("relinking '{}'", target.display()))?,
        ResolvConf::File {
            contents,
            permissions,
        } => {
            fs::write(&target, contents)
                .with_context(|| format!("writing '{}'", target.display()))?;
            fs::set_permissions(&target, permissions.clone())?;
        }
        ResolvConf::Missing => {}
    }
    Ok(())
}
