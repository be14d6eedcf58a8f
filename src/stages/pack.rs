//! Stage 4: pack the provisioned chroot into `casper/filesystem.squashfs`.
//!
//! `boot/` is left out (kernel and initrd are staged separately) along with
//! the bootstrap marker. The uncompressed size goes to `casper/filesystem.size`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use super::StageContext;
use crate::artifact::squashfs::{create_squashfs, measure_tree_size, SquashfsOptions};
use crate::pipeline::paths::BOOTSTRAP_MARKER;

/// Paths inside the chroot that never go into the image.
pub const IMAGE_EXCLUDES: &[&str] = &["boot", BOOTSTRAP_MARKER];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackReport {
    pub squashfs: PathBuf,
    /// Bytes recorded in `filesystem.size`.
    pub filesystem_size: u64,
}

pub fn run(ctx: &StageContext<'_>) -> Result<PackReport> {
    let paths = ctx.paths;
    let casper = paths.casper_dir();
    fs::create_dir_all(&casper)
        .with_context(|| format!("creating '{}'", casper.display()))?;

    let size = measure_tree_size(&paths.chroot)?;
    let size_file = paths.filesystem_size();
    fs::write(&size_file, size.to_string())
        .with_context(|| format!("writing '{}'", size_file.display()))?;
    info!("chroot uses {} bytes ({} MB)", size, size / 1024 / 1024);

    let squashfs = paths.squashfs();
    let options = SquashfsOptions::from_config(&ctx.config.squashfs, IMAGE_EXCLUDES);
    create_squashfs(ctx.runner, &paths.chroot, &squashfs, &options)?;

    Ok(PackReport {
        squashfs,
        filesystem_size: size,
    })
}
