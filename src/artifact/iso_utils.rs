//! ISO creation utilities.
//!
//! EFI boot image assembly (FAT + mtools), the xorriso invocation that
//! encodes BIOS/UEFI/GPT compatibility, and the ISO checksum.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::process::{Cmd, Runner};

/// Separator between hash and filename in checksum files (two spaces).
const CHECKSUM_SEPARATOR: &str = "  ";

/// Create a FAT-formatted image file of `size_mb` megabytes.
///
/// The file is sized first, then `mkfs.vfat` picks FAT12/16 for it. The
/// result is empty and gets filled with [`create_efi_dirs_in_fat`] and
/// [`mcopy_to_fat`].
///
/// # Arguments
///
/// * `runner` - Executes `mkfs.vfat`
/// * `output` - Path for the image, parent directories are created
/// * `size_mb` - Size in megabytes
///
/// # Example
///
/// ```rust,ignore
/// use aetheros_builder::artifact::iso_utils::create_fat_image;
/// use aetheros_builder::process::HostRunner;
/// use std::path::Path;
///
/// create_fat_image(&HostRunner, Path::new("/tmp/efiboot.img"), 10)?;
/// ```
pub fn create_fat_image(runner: &dyn Runner, output: &Path, size_mb: u32) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(output)
        .with_context(|| format!("creating FAT image '{}'", output.display()))?;
    file.set_len(u64::from(size_mb) * 1024 * 1024)
        .with_context(|| format!("sizing FAT image '{}'", output.display()))?;
    drop(file);

    Cmd::new("mkfs.vfat")
        .arg_path(output)
        .error_msg("mkfs.vfat failed. Install dosfstools.")
        .run(runner)?;

    Ok(())
}

/// Create ::EFI/boot inside a FAT image using mtools.
///
/// # Arguments
///
/// * `runner` - Executes `mmd`
/// * `fat_image` - Image made by [`create_fat_image`]
pub fn create_efi_dirs_in_fat(runner: &dyn Runner, fat_image: &Path) -> Result<()> {
    let img_str = fat_image.to_string_lossy().into_owned();

    Cmd::new("mmd")
        .args(["-i", img_str.as_str(), "::EFI", "::EFI/boot"])
        .error_msg("mmd failed. Install mtools.")
        .run(runner)?;

    Ok(())
}

/// Copy a file into a FAT image using mcopy.
///
/// # Arguments
///
/// * `runner` - Executes `mcopy`
/// * `fat_image` - Image to copy into
/// * `src` - Host file
/// * `dst` - Path inside the image, e.g. `::EFI/boot/`
pub fn mcopy_to_fat(runner: &dyn Runner, fat_image: &Path, src: &Path, dst: &str) -> Result<()> {
    let img_str = fat_image.to_string_lossy().into_owned();

    Cmd::new("mcopy")
        .args(["-i", img_str.as_str()])
        .arg_path(src)
        .arg(dst)
        .error_msg(format!("mcopy failed to copy {}", src.display()))
        .run(runner)?;

    Ok(())
}

/// Create the EFI system partition image holding the UEFI loaders.
///
/// Every file in `efi_files` lands in `::EFI/boot/` under its own name, so
/// the loader must already be called `bootx64.efi`.
///
/// # Arguments
///
/// * `runner` - Executes the mtools and `mkfs.vfat` calls
/// * `output` - Image path, usually `<image>/EFI/efiboot.img`
/// * `size_mb` - Image size in megabytes
/// * `efi_files` - Host files to copy into `::EFI/boot/`
///
/// # Example
///
/// ```rust,ignore
/// use aetheros_builder::artifact::iso_utils::create_efi_boot_image;
/// use std::path::Path;
///
/// create_efi_boot_image(
///     &runner,
///     Path::new("image/EFI/efiboot.img"),
///     10,
///     &[Path::new("image/EFI/boot/bootx64.efi")],
/// )?;
/// ```
pub fn create_efi_boot_image(
    runner: &dyn Runner,
    output: &Path,
    size_mb: u32,
    efi_files: &[&Path],
) -> Result<()> {
    create_fat_image(runner, output, size_mb)?;
    create_efi_dirs_in_fat(runner, output)?;
    for src in efi_files {
        mcopy_to_fat(runner, output, src, "::EFI/boot/")?;
    }
    Ok(())
}

/// Inputs for [`run_xorriso`]. Boot image paths are relative to `image_root`.
#[derive(Debug, Clone)]
pub struct XorrisoOptions<'a> {
    pub image_root: &'a Path,
    pub output: &'a Path,
    pub volume_id: &'a str,
    pub bios_image: &'a str,
    pub boot_catalog: &'a str,
    pub efi_image: &'a str,
    /// GRUB's hybrid MBR (`boot_hybrid.img`).
    pub hybrid_mbr: &'a Path,
}

/// Master a hybrid ISO9660 image.
///
/// Joliet + long names, El Torito BIOS entry (no emulation, GRUB boot info
/// patched in), El Torito UEFI entry, and a GPT basic-data overlay so the
/// same file boots from USB media.
///
/// Output goes to the terminal since xorriso reports progress there.
///
/// # Arguments
///
/// * `runner` - Executes `xorriso`
/// * `options` - Image root, output path, volume id and boot images
///
/// # Example
///
/// ```rust,ignore
/// use aetheros_builder::artifact::iso_utils::{run_xorriso, XorrisoOptions};
/// use std::path::Path;
///
/// run_xorriso(&runner, &XorrisoOptions {
///     image_root: Path::new("image"),
///     output: Path::new("aetheros-20261016.iso"),
///     volume_id: "AETHEROS",
///     bios_image: "boot/grub/bios.img",
///     boot_catalog: "boot/grub/boot.cat",
///     efi_image: "EFI/efiboot.img",
///     hybrid_mbr: Path::new("/usr/lib/grub/i386-pc/boot_hybrid.img"),
/// })?;
/// ```
pub fn run_xorriso(runner: &dyn Runner, options: &XorrisoOptions) -> Result<()> {
    Cmd::new("xorriso")
        .args(["-as", "mkisofs"])
        .args(["-iso-level", "3"])
        .arg("-full-iso9660-filenames")
        .args(["-joliet", "-joliet-long", "-rational-rock"])
        .args(["-volid", options.volume_id])
        .args(["-eltorito-boot", options.bios_image])
        .args(["-no-emul-boot", "-boot-load-size", "4", "-boot-info-table"])
        .arg("--grub2-boot-info")
        .arg("--grub2-mbr")
        .arg_path(options.hybrid_mbr)
        .args(["--eltorito-catalog", options.boot_catalog])
        .arg("-eltorito-alt-boot")
        .args(["-e", options.efi_image, "-no-emul-boot"])
        .arg("-isohybrid-gpt-basdat")
        .arg("-output")
        .arg_path(options.output)
        .arg_path(options.image_root)
        .error_msg("xorriso failed. Install xorriso.")
        .run_interactive(runner)?;

    Ok(())
}

/// Write `<iso>.sha256` in `sha256sum -c` format.
///
/// Only the file name is recorded, so the check runs from the ISO's
/// directory:
///   cd workdir && sha256sum -c aetheros-20261016.iso.sha256
///
/// # Arguments
///
/// * `iso_path` - ISO to hash
///
/// # Returns
///
/// The checksum path (`iso_path` with `.sha256` appended) and the hex digest.
pub fn write_iso_checksum(iso_path: &Path) -> Result<(PathBuf, String)> {
    let mut file = File::open(iso_path)
        .with_context(|| format!("opening '{}' for checksumming", iso_path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("reading '{}'", iso_path.display()))?;
    let hash = format!("{:x}", hasher.finalize());

    let filename = iso_path
        .file_name()
        .context("Could not get ISO filename")?
        .to_string_lossy();

    let mut checksum_name = iso_path.as_os_str().to_os_string();
    checksum_name.push(".sha256");
    let checksum_path = PathBuf::from(checksum_name);

    fs::write(
        &checksum_path,
        format!("{}{}{}\n", hash, CHECKSUM_SEPARATOR, filename),
    )
    .with_context(|| format!("writing '{}'", checksum_path.display()))?;

    Ok((checksum_path, hash))
}
