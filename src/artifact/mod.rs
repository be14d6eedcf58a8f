//! Wrappers around the external image tools.
//!
//! - [`squashfs`] - `mksquashfs` and tree size measurement
//! - [`grub`] - `grub.cfg` rendering and `grub-mkstandalone` loaders
//! - [`iso_utils`] - EFI FAT image, `xorriso`, ISO checksum

pub mod grub;
pub mod iso_utils;
pub mod squashfs;
