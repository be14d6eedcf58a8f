use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Zero-length file inside the chroot recording a finished debootstrap.
pub const BOOTSTRAP_MARKER: &str = ".aetheros-bootstrapped";

const LOCK_FILENAME: &str = ".aetheros-build.lock";
const MANIFEST_FILENAME: &str = "build-manifest.json";

/// On-disk layout of one build under the workdir.
///
/// ```text
/// <workdir>/
/// ├── chroot/                      # bootstrapped + provisioned rootfs
/// ├── scratch/                     # intermediate loader images
/// ├── image/                       # ISO staging tree
/// │   ├── <SENTINEL>
/// │   ├── casper/{filesystem.squashfs,filesystem.size,vmlinuz,initrd}
/// │   ├── boot/grub/{grub.cfg,bios.img}
/// │   └── EFI/{efiboot.img,boot/bootx64.efi}
/// └── <profile>-<YYYYMMDD>.iso
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub workdir: PathBuf,
    pub chroot: PathBuf,
    pub image: PathBuf,
    pub scratch: PathBuf,
}

impl BuildPaths {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            chroot: workdir.join("chroot"),
            image: workdir.join("image"),
            scratch: workdir.join("scratch"),
        }
    }

    pub fn bootstrap_marker(&self) -> PathBuf {
        self.chroot.join(BOOTSTRAP_MARKER)
    }

    pub fn casper_dir(&self) -> PathBuf {
        self.image.join("casper")
    }

    pub fn grub_dir(&self) -> PathBuf {
        self.image.join("boot/grub")
    }

    pub fn efi_boot_dir(&self) -> PathBuf {
        self.image.join("EFI/boot")
    }

    pub fn squashfs(&self) -> PathBuf {
        self.casper_dir().join("filesystem.squashfs")
    }

    pub fn filesystem_size(&self) -> PathBuf {
        self.casper_dir().join("filesystem.size")
    }

    pub fn staged_kernel(&self) -> PathBuf {
        self.casper_dir().join("vmlinuz")
    }

    pub fn staged_initrd(&self) -> PathBuf {
        self.casper_dir().join("initrd")
    }

    pub fn grub_cfg(&self) -> PathBuf {
        self.grub_dir().join("grub.cfg")
    }

    pub fn bios_img(&self) -> PathBuf {
        self.grub_dir().join("bios.img")
    }

    pub fn efi_loader(&self) -> PathBuf {
        self.efi_boot_dir().join("bootx64.efi")
    }

    pub fn efiboot_img(&self) -> PathBuf {
        self.image.join("EFI/efiboot.img")
    }

    pub fn bios_core_img(&self) -> PathBuf {
        self.scratch.join("core.img")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.workdir.join(LOCK_FILENAME)
    }

    pub fn manifest(&self) -> PathBuf {
        self.workdir.join(MANIFEST_FILENAME)
    }

    /// `<workdir>/<profile>-<YYYYMMDD>.iso`
    pub fn iso(&self, profile: &str, build_date: &str) -> PathBuf {
        self.workdir.join(format!("{}-{}.iso", profile, build_date))
    }
}

/// Format a timestamp as `YYYYMMDD`.
pub fn build_date(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day()
    )
}

/// Today's date in local time, falling back to UTC when the offset is unknown.
pub fn today() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    build_date(now)
}

/// Default workdir when none is given on the command line.
pub fn default_workdir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("aetheros-build")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_layout() {
        let paths = BuildPaths::new(Path::new("/work"));
        assert_eq!(paths.chroot, PathBuf::from("/work/chroot"));
        assert_eq!(
            paths.squashfs(),
            PathBuf::from("/work/image/casper/filesystem.squashfs")
        );
        assert_eq!(paths.grub_cfg(), PathBuf::from("/work/image/boot/grub/grub.cfg"));
        assert_eq!(
            paths.efi_loader(),
            PathBuf::from("/work/image/EFI/boot/bootx64.efi")
        );
        assert_eq!(
            paths.bootstrap_marker(),
            PathBuf::from("/work/chroot/.aetheros-bootstrapped")
        );
    }

    #[test]
    fn test_iso_name() {
        let paths = BuildPaths::new(Path::new("/work"));
        assert_eq!(
            paths.iso("aetheros", "20260102"),
            PathBuf::from("/work/aetheros-20260102.iso")
        );
    }

    #[test]
    fn test_build_date_zero_pads() {
        assert_eq!(build_date(datetime!(2026-01-02 03:04:05 UTC)), "20260102");
        assert_eq!(build_date(datetime!(2026-11-30 23:59:59 UTC)), "20261130");
    }

    #[test]
    fn test_today_is_eight_digits() {
        let date = today();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
    }
}
