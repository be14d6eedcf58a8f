//! Stage 7: master `<workdir>/<profile>-<YYYYMMDD>.iso` and its checksum.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use super::StageContext;
use crate::artifact::iso_utils::{run_xorriso, write_iso_checksum, XorrisoOptions};

/// El Torito entries, relative to the ISO root.
const BIOS_IMAGE: &str = "boot/grub/bios.img";
const BOOT_CATALOG: &str = "boot/grub/boot.cat";
const EFI_IMAGE: &str = "EFI/efiboot.img";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoReport {
    pub iso: PathBuf,
    pub checksum: PathBuf,
    pub sha256: String,
}

pub fn run(ctx: &StageContext<'_>, build_date: &str) -> Result<IsoReport> {
    let paths = ctx.paths;
    let required = [
        paths.squashfs(),
        paths.filesystem_size(),
        paths.staged_kernel(),
        paths.staged_initrd(),
        paths.grub_cfg(),
        paths.bios_img(),
        paths.efiboot_img(),
    ];
    let missing: Vec<String> = required
        .iter()
        .filter(|p| !p.exists())
        .map(|p| p.display().to_string())
        .collect();
    if !missing.is_empty() {
        bail!("ISO tree is incomplete, missing:\n  {}", missing.join("\n  "));
    }

    let iso = paths.iso(&ctx.config.profile, build_date);
    if iso.exists() {
        fs::remove_file(&iso)
            .with_context(|| format!("removing previous '{}'", iso.display()))?;
    }

    let volume_id = ctx.config.volume_id();
    let hybrid_mbr = ctx.config.boot_hybrid_img();
    run_xorriso(
        ctx.runner,
        &XorrisoOptions {
            image_root: &paths.image,
            output: &iso,
            volume_id: &volume_id,
            bios_image: BIOS_IMAGE,
            boot_catalog: BOOT_CATALOG,
            efi_image: EFI_IMAGE,
            hybrid_mbr: &hybrid_mbr,
        },
    )?;

    if !iso.is_file() {
        bail!("xorriso reported success but '{}' is missing", iso.display());
    }

    let (checksum, sha256) = write_iso_checksum(&iso)?;
    let size = fs::metadata(&iso)?.len();
    info!("ISO: {} ({} MB)", iso.display(), size / 1024 / 1024);
    info!("SHA256: {}", sha256);

    Ok(IsoReport {
        iso,
        checksum,
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::pipeline::paths::BuildPaths;
    use crate::process::testing::RecordingRunner;
    use crate::process::CommandResult;
    use tempfile::TempDir;

    fn xorriso_stub() -> RecordingRunner {
        RecordingRunner::with_responder(|cmd| {
            let args = cmd.args_lossy();
            if let Some(pos) = args.iter().position(|a| a == "-output") {
                fs::write(&args[pos + 1], b"ISO").unwrap();
            }
            Ok(CommandResult::exited(0))
        })
    }

    fn populate(paths: &BuildPaths) {
        for file in [
            paths.squashfs(),
            paths.filesystem_size(),
            paths.staged_kernel(),
            paths.staged_initrd(),
            paths.grub_cfg(),
            paths.bios_img(),
            paths.efiboot_img(),
        ] {
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(&file, b"x").unwrap();
        }
    }

    #[test]
    fn test_iso_named_by_profile_and_date() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = BuildPaths::new(temp.path());
        populate(&paths);
        let runner = xorriso_stub();
        let ctx = StageContext::new(&config, &paths, &runner);

        let report = run(&ctx, "20261016").unwrap();

        assert_eq!(report.iso, temp.path().join("aetheros-20261016.iso"));
        assert!(report.checksum.is_file());
        let args = runner.calls()[0].args_lossy();
        let volid = args.iter().position(|a| a == "-volid").unwrap();
        assert_eq!(args[volid + 1], "AETHEROS");
    }

    #[test]
    fn test_same_day_rebuild_replaces_iso() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = BuildPaths::new(temp.path());
        populate(&paths);
        fs::write(paths.iso("aetheros", "20261016"), b"old build").unwrap();
        let runner = xorriso_stub();
        let ctx = StageContext::new(&config, &paths, &runner);

        let report = run(&ctx, "20261016").unwrap();
        assert_eq!(fs::read(&report.iso).unwrap(), b"ISO");
    }

    #[test]
    fn test_incomplete_tree_skips_xorriso() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = BuildPaths::new(temp.path());
        populate(&paths);
        fs::remove_file(paths.efiboot_img()).unwrap();
        let runner = xorriso_stub();
        let ctx = StageContext::new(&config, &paths, &runner);

        let err = run(&ctx, "20261016").unwrap_err();
        assert!(err.to_string().contains("efiboot.img"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_missing_output_is_error() {
        let temp = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = BuildPaths::new(temp.path());
        populate(&paths);
        let runner = RecordingRunner::new();
        let ctx = StageContext::new(&config, &paths, &runner);

        let err = run(&ctx, "20261016").unwrap_err();
        assert!(err.to_string().contains("is missing"));
    }
}
