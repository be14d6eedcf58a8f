//! Live ISO builder for AetherOS.
//!
//! Turns a package mirror and two package lists into a hybrid (BIOS + UEFI,
//! CD + USB) live ISO:
//!
//! ```text
//! debootstrap ─▶ bind mounts ─▶ apt provision ─▶ mksquashfs
//!                                                    │
//!   umount ◀─ xorriso ◀─ kernel/initrd ◀─ GRUB loaders
//! ```
//!
//! - [`config`] - [`BuildConfig`], optionally loaded from TOML
//! - [`preflight`] - root, host tool and host file checks before anything is touched
//! - [`pipeline`] - the [`Pipeline`] driver, workdir layout, lock and manifest
//! - [`stages`] - the eight [`Stage`]s
//! - [`artifact`] - wrappers around mksquashfs, grub-mkstandalone, mtools, xorriso
//! - [`process`] - `Cmd` builder and the [`process::Runner`] seam all tools go through
//!
//! # Example
//!
//! ```rust,ignore
//! use aetheros_builder::{preflight, process::HostRunner, BuildConfig, Pipeline};
//!
//! let config = BuildConfig::default();
//! preflight::check_all(&config)?;
//! let report = Pipeline::new(&config, "/srv/aetheros-build".as_ref(), &HostRunner).run()?;
//! println!("{:?}", report.iso);
//! ```

pub mod artifact;
pub mod config;
pub mod packages;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod stages;

pub use config::BuildConfig;
pub use pipeline::{BuildReport, Pipeline};
pub use stages::Stage;
