//! Squashfs image builder.
//!
//! Wraps `mksquashfs` and measures the uncompressed size of the tree being
//! packed (the installer reads it from `filesystem.size`).

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

use crate::config::SquashfsConfig;
use crate::process::{Cmd, Runner};

/// Options for building a squashfs image.
#[derive(Debug, Clone)]
pub struct SquashfsOptions<'a> {
    /// Compression algorithm (gzip, zstd, xz, lzo, lz4).
    pub compression: &'a str,

    /// Block size (e.g., "128K", "1M").
    pub block_size: &'a str,

    /// Compressor-specific flags, e.g. `-Xbcj x86`.
    pub extra_args: &'a [String],

    /// Paths relative to the source root left out of the image.
    pub excludes: &'a [&'a str],
}

impl<'a> SquashfsOptions<'a> {
    pub fn from_config(config: &'a SquashfsConfig, excludes: &'a [&'a str]) -> Self {
        Self {
            compression: &config.compression,
            block_size: &config.block_size,
            extra_args: &config.extra_args,
            excludes,
        }
    }
}

/// Build a squashfs image from a directory.
///
/// Stays on the source's filesystem, so bind mounts under it are not packed.
/// A stale image at `output` is removed first.
///
/// # Arguments
///
/// * `runner` - Executes `mksquashfs`
/// * `source_dir` - Root of the tree to pack
/// * `output` - Image path, parent directories are created
/// * `options` - Compression, block size and excludes
///
/// # Example
///
/// ```rust,ignore
/// use aetheros_builder::artifact::squashfs::{create_squashfs, SquashfsOptions};
/// use std::path::Path;
///
/// let options = SquashfsOptions::from_config(&config.squashfs, &["boot"]);
/// create_squashfs(
///     &runner,
///     Path::new("chroot"),
///     Path::new("image/casper/filesystem.squashfs"),
///     &options,
/// )?;
/// ```
pub fn create_squashfs(
    runner: &dyn Runner,
    source_dir: &Path,
    output: &Path,
    options: &SquashfsOptions,
) -> Result<()> {
    if !source_dir.is_dir() {
        bail!(
            "Source directory does not exist: {}",
            source_dir.display()
        );
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    if output.exists() {
        fs::remove_file(output)
            .with_context(|| format!("removing stale image '{}'", output.display()))?;
    }

    info!(
        "Creating squashfs with {} compression ({} blocks)...",
        options.compression, options.block_size
    );

    let mut cmd = Cmd::new("mksquashfs")
        .arg_path(source_dir)
        .arg_path(output)
        .args(["-comp", options.compression])
        .args(options.extra_args)
        .args(["-b", options.block_size])
        .arg("-noappend")
        .arg("-one-file-system");
    if !options.excludes.is_empty() {
        cmd = cmd.arg("-e").args(options.excludes);
    }

    cmd.error_msg("mksquashfs failed. Install squashfs-tools: sudo apt install squashfs-tools")
        .run_interactive(runner)?;

    let metadata = fs::metadata(output).with_context(|| {
        format!(
            "mksquashfs reported success but '{}' is missing",
            output.display()
        )
    })?;
    info!("Squashfs created: {} MB", metadata.len() / 1024 / 1024);

    Ok(())
}

/// Allocated size of a directory tree in bytes.
///
/// Counts `st_blocks * 512` for every entry, stays on one filesystem and
/// counts hard-linked files once: the number `du -sx --block-size=1` prints.
///
/// # Example
///
/// ```rust,ignore
/// use aetheros_builder::artifact::squashfs::measure_tree_size;
/// use std::path::Path;
///
/// let bytes = measure_tree_size(Path::new("chroot"))?;
/// std::fs::write("image/casper/filesystem.size", bytes.to_string())?;
/// ```
pub fn measure_tree_size(root: &Path) -> Result<u64> {
    let mut seen = HashSet::new();
    let mut total = 0u64;

    for entry in WalkDir::new(root).follow_links(false).same_file_system(true) {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        let meta = entry
            .metadata()
            .with_context(|| format!("reading metadata of '{}'", entry.path().display()))?;

        if !meta.is_dir() && meta.nlink() > 1 && !seen.insert((meta.dev(), meta.ino())) {
            continue;
        }
        total += meta.blocks() * 512;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;
    use std::process::Command;
    use tempfile::TempDir;

    fn du_bytes(path: &Path) -> u64 {
        let out = Command::new("du")
            .args(["-sx", "--block-size=1"])
            .arg(path)
            .output()
            .unwrap();
        String::from_utf8_lossy(&out.stdout)
            .split_whitespace()
            .next()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_measure_matches_du() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("usr/bin/tool"), vec![7u8; 150_000]).unwrap();
        fs::write(root.join("etc/hostname"), "aetheros\n").unwrap();
        fs::hard_link(root.join("usr/bin/tool"), root.join("usr/bin/tool-link")).unwrap();
        std::os::unix::fs::symlink("tool", root.join("usr/bin/alias")).unwrap();

        assert_eq!(measure_tree_size(&root).unwrap(), du_bytes(&root));
    }

    #[test]
    fn test_hard_links_counted_once() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a"), vec![1u8; 64 * 1024]).unwrap();
        let before = measure_tree_size(&root).unwrap();
        fs::hard_link(root.join("a"), root.join("b")).unwrap();
        assert_eq!(measure_tree_size(&root).unwrap(), before);
    }

    #[test]
    fn test_source_dir_validation() {
        let runner = RecordingRunner::new();
        let options = SquashfsOptions {
            compression: "xz",
            block_size: "1M",
            extra_args: &[],
            excludes: &[],
        };
        let result = create_squashfs(
            &runner,
            Path::new("/nonexistent_path_12345"),
            Path::new("/tmp/test.squashfs"),
            &options,
        );
        assert!(result.unwrap_err().to_string().contains("does not exist"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_command_line_and_missing_output() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("chroot");
        fs::create_dir_all(&source).unwrap();
        let output = temp.path().join("casper/filesystem.squashfs");

        let config = SquashfsConfig::default();
        let options = SquashfsOptions::from_config(&config, &["boot"]);
        let runner = RecordingRunner::new();

        // the stub never writes the image
        let err = create_squashfs(&runner, &source, &output, &options).unwrap_err();
        assert!(err.to_string().contains("is missing"));

        assert_eq!(
            runner.command_lines()[0],
            format!(
                "mksquashfs {} {} -comp xz -Xbcj x86 -Xdict-size 100% -b 1M -noappend -one-file-system -e boot",
                source.display(),
                output.display()
            )
        );
    }
}
