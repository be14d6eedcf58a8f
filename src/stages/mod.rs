//! The eight build stages, in execution order.
//!
//! | # | Stage | Tool |
//! |---|-------|------|
//! | 1 | [`bootstrap`] | debootstrap (skipped when the marker exists) |
//! | 2 | [`mounts`] | mount --bind /dev /run /proc /sys + resolv.conf |
//! | 3 | [`provision`] | apt-get / dpkg-query / systemctl inside the chroot |
//! | 4 | [`pack`] | mksquashfs + filesystem.size |
//! | 5 | [`bootloader`] | grub-mkstandalone, mkfs.vfat, mtools |
//! | 6 | [`kernel`] | copy vmlinuz/initrd |
//! | 7 | [`iso`] | xorriso + sha256 |
//! | 8 | [`mounts::MountGuard::release`] | umount |
//!
//! Every stage receives a [`StageContext`] and only touches paths from
//! [`BuildPaths`]. Ordering is enforced by [`crate::pipeline::Pipeline`].

pub mod bootloader;
pub mod bootstrap;
pub mod iso;
pub mod kernel;
pub mod mounts;
pub mod pack;
pub mod provision;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::BuildConfig;
use crate::pipeline::paths::BuildPaths;
use crate::process::{Cmd, Runner};

/// What every stage gets to work with.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a BuildConfig,
    pub paths: &'a BuildPaths,
    pub runner: &'a dyn Runner,
}

impl<'a> StageContext<'a> {
    pub fn new(config: &'a BuildConfig, paths: &'a BuildPaths, runner: &'a dyn Runner) -> Self {
        Self {
            config,
            paths,
            runner,
        }
    }

    /// A command executed inside the chroot with a non-interactive apt/dpkg.
    pub fn chroot_cmd(&self, program: &str) -> Cmd {
        Cmd::new("chroot")
            .arg_path(&self.paths.chroot)
            .arg(program)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .env("LC_ALL", "C")
    }
}

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Bootstrap,
    Mount,
    Provision,
    Pack,
    Bootloader,
    Kernel,
    Iso,
    Unmount,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 8] = [
        Stage::Bootstrap,
        Stage::Mount,
        Stage::Provision,
        Stage::Pack,
        Stage::Bootloader,
        Stage::Kernel,
        Stage::Iso,
        Stage::Unmount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Bootstrap => "bootstrap",
            Stage::Mount => "mount",
            Stage::Provision => "provision",
            Stage::Pack => "pack",
            Stage::Bootloader => "bootloader",
            Stage::Kernel => "kernel",
            Stage::Iso => "iso",
            Stage::Unmount => "unmount",
        }
    }

    /// 1-based position in [`Stage::ALL`].
    pub fn number(self) -> usize {
        Stage::ALL
            .iter()
            .position(|s| *s == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::Bootstrap => "Bootstrapping minimal root filesystem",
            Stage::Mount => "Binding host pseudo-filesystems into chroot",
            Stage::Provision => "Provisioning packages inside chroot",
            Stage::Pack => "Packing root filesystem into squashfs",
            Stage::Bootloader => "Building BIOS and UEFI bootloaders",
            Stage::Kernel => "Staging kernel and initrd",
            Stage::Iso => "Mastering hybrid ISO",
            Stage::Unmount => "Releasing chroot bind mounts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
