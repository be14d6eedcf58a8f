//! Stage 1: debootstrap a minimal root filesystem.
//!
//! The network-heavy step. A zero-length marker written into the chroot
//! after a successful run makes later builds skip it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

use super::StageContext;
use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Marker present; the existing chroot was reused untouched.
    Skipped,
    Bootstrapped,
}

pub fn run(ctx: &StageContext<'_>) -> Result<BootstrapOutcome> {
    let chroot = &ctx.paths.chroot;
    let marker = ctx.paths.bootstrap_marker();

    if marker.exists() {
        info!(
            "[SKIP] {} already bootstrapped (delete {} to force)",
            chroot.display(),
            marker.display()
        );
        return Ok(BootstrapOutcome::Skipped);
    }

    fs::create_dir_all(chroot)
        .with_context(|| format!("creating chroot directory '{}'", chroot.display()))?;

    let config = ctx.config;
    info!(
        "debootstrap {} ({}, {}) from {}",
        config.release, config.arch, config.bootstrap_variant, config.mirror
    );

    debootstrap_cmd(ctx).run_interactive(ctx.runner)?;

    fs::write(&marker, b"")
        .with_context(|| format!("writing bootstrap marker '{}'", marker.display()))?;

    Ok(BootstrapOutcome::Bootstrapped)
}

fn debootstrap_cmd(ctx: &StageContext<'_>) -> Cmd {
    let config = ctx.config;
    Cmd::new("debootstrap")
        .arg(format!("--arch={}", config.arch))
        .arg(format!("--variant={}", config.bootstrap_variant))
        .arg(format!("--components={}", config.components.join(",")))
        .arg(&config.release)
        .arg_path(&ctx.paths.chroot)
        .arg(&config.mirror)
        .error_msg(format!(
            "debootstrap of '{}' failed. Check network access to {}",
            config.release, config.mirror
        ))
}
