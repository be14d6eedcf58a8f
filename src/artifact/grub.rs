//! GRUB menu and standalone loader images.
//!
//! Both loaders embed the same `grub.cfg` via a memdisk. At boot it locates
//! the ISO volume with `search --file /<SENTINEL>`, so the sentinel name
//! written into the config and the file placed at the ISO root must match.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::process::{Cmd, Runner};

/// Modules available inside the BIOS core image.
const BIOS_INSTALL_MODULES: &str = "linux16 linux normal iso9660 biosdisk memdisk search tar ls";
/// Modules preloaded into the BIOS core image.
const BIOS_PRELOAD_MODULES: &str = "linux16 linux normal iso9660 biosdisk search";

/// Inputs for `grub.cfg`.
#[derive(Debug, Clone)]
pub struct GrubMenu<'a> {
    /// File name at the ISO root used to find the boot volume.
    pub sentinel: &'a str,
    pub title: &'a str,
    /// Kernel path on the ISO, absolute.
    pub kernel: &'a str,
    /// Initrd path on the ISO, absolute.
    pub initrd: &'a str,
    pub kernel_params: &'a str,
    pub timeout_secs: u32,
}

/// Render the boot menu.
pub fn render_grub_cfg(menu: &GrubMenu) -> String {
    format!(
        r#"search --set=root --file /{sentinel}

insmod all_video

set default="0"
set timeout={timeout}

menuentry "{title}" {{
    linux {kernel} {params} ---
    initrd {initrd}
}}
"#,
        sentinel = menu.sentinel,
        timeout = menu.timeout_secs,
        title = menu.title,
        kernel = menu.kernel,
        params = menu.kernel_params,
        initrd = menu.initrd,
    )
}

/// The file a rendered config's `search --file` directive looks for.
pub fn search_sentinel(grub_cfg: &str) -> Option<&str> {
    grub_cfg.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("search ")?;
        let mut words = rest.split_whitespace();
        while let Some(word) = words.next() {
            if word == "--file" || word == "-f" {
                return words.next().map(|p| p.trim_start_matches('/'));
            }
        }
        None
    })
}

fn memdisk_cfg_arg(grub_cfg: &Path) -> String {
    format!("boot/grub/grub.cfg={}", grub_cfg.display())
}

/// Build the standalone x86_64 UEFI loader.
pub fn mkstandalone_efi(runner: &dyn Runner, grub_cfg: &Path, output: &Path) -> Result<()> {
    Cmd::new("grub-mkstandalone")
        .arg("--format=x86_64-efi")
        .arg(format!("--output={}", output.display()))
        .arg("--locales=")
        .arg("--fonts=")
        .arg(memdisk_cfg_arg(grub_cfg))
        .error_msg("grub-mkstandalone (x86_64-efi) failed. Install grub-efi-amd64-bin.")
        .run(runner)?;
    Ok(())
}

/// Build the standalone i386-pc core image.
pub fn mkstandalone_bios(runner: &dyn Runner, grub_cfg: &Path, output: &Path) -> Result<()> {
    Cmd::new("grub-mkstandalone")
        .arg("--format=i386-pc")
        .arg(format!("--output={}", output.display()))
        .arg(format!("--install-modules={}", BIOS_INSTALL_MODULES))
        .arg(format!("--modules={}", BIOS_PRELOAD_MODULES))
        .arg("--locales=")
        .arg("--fonts=")
        .arg(memdisk_cfg_arg(grub_cfg))
        .error_msg("grub-mkstandalone (i386-pc) failed. Install grub-pc-bin.")
        .run(runner)?;
    Ok(())
}

/// `cdboot.img` followed by the core image: the El Torito BIOS boot image.
pub fn concat_bios_image(cdboot: &Path, core: &Path, output: &Path) -> Result<()> {
    let mut image = fs::read(cdboot)
        .with_context(|| format!("reading CD boot sector '{}'", cdboot.display()))?;
    let core_bytes =
        fs::read(core).with_context(|| format!("reading core image '{}'", core.display()))?;
    image.extend_from_slice(&core_bytes);

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, &image)
        .with_context(|| format!("writing BIOS boot image '{}'", output.display()))?;
    Ok(())
}
