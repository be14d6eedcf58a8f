//! Stage 5: GRUB menu, boot sentinel, UEFI and BIOS loaders.
//!
//! Produces, under the ISO tree:
//!
//! ```text
//! <SENTINEL>              # empty, found by `search --file`
//! boot/grub/grub.cfg
//! boot/grub/bios.img      # cdboot.img + i386-pc core image
//! EFI/boot/bootx64.efi
//! EFI/efiboot.img         # FAT image holding bootx64.efi
//! ```

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use super::StageContext;
use crate::artifact::grub::{self, GrubMenu};
use crate::artifact::iso_utils::create_efi_boot_image;

/// Kernel and initrd locations on the ISO, as referenced by the menu.
pub const ISO_KERNEL_PATH: &str = "/casper/vmlinuz";
pub const ISO_INITRD_PATH: &str = "/casper/initrd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderReport {
    pub sentinel: PathBuf,
    pub grub_cfg: PathBuf,
    pub bios_image: PathBuf,
    pub efi_image: PathBuf,
}

pub fn run(ctx: &StageContext<'_>) -> Result<BootloaderReport> {
    let paths = ctx.paths;
    let config = ctx.config;

    for dir in [paths.grub_dir(), paths.efi_boot_dir(), paths.scratch.clone()] {
        fs::create_dir_all(&dir).with_context(|| format!("creating '{}'", dir.display()))?;
    }

    let sentinel_name = config.boot_sentinel();
    let sentinel = paths.image.join(&sentinel_name);
    fs::write(&sentinel, b"")
        .with_context(|| format!("writing boot sentinel '{}'", sentinel.display()))?;

    let cfg = grub::render_grub_cfg(&GrubMenu {
        sentinel: &sentinel_name,
        title: &config.boot.menu_title,
        kernel: ISO_KERNEL_PATH,
        initrd: ISO_INITRD_PATH,
        kernel_params: &config.boot.kernel_params,
        timeout_secs: config.boot.timeout_secs,
    });
    if grub::search_sentinel(&cfg) != Some(sentinel_name.as_str()) {
        bail!("grub.cfg search directive does not name '{}'", sentinel_name);
    }
    let grub_cfg = paths.grub_cfg();
    fs::write(&grub_cfg, &cfg).with_context(|| format!("writing '{}'", grub_cfg.display()))?;

    let efi_loader = paths.efi_loader();
    grub::mkstandalone_efi(ctx.runner, &grub_cfg, &efi_loader)?;
    let efi_image = paths.efiboot_img();
    create_efi_boot_image(
        ctx.runner,
        &efi_image,
        config.efiboot_size_mb,
        &[efi_loader.as_path()],
    )?;

    let core = paths.bios_core_img();
    grub::mkstandalone_bios(ctx.runner, &grub_cfg, &core)?;
    let bios_image = paths.bios_img();
    grub::concat_bios_image(&config.cdboot_img(), &core, &bios_image)?;

    Ok(BootloaderReport {
        sentinel,
        grub_cfg,
        bios_image,
        efi_image,
    })
}
