//! Build configuration.
//!
//! Everything the pipeline needs to know about the target (release, mirror,
//! package lists, boot menu) and about the host (resolver config, GRUB
//! platform directory) lives in [`BuildConfig`]. The driver receives it
//! explicitly; no stage reads environment variables or assumes a working
//! directory.
//!
//! A config file is optional. When given, it is TOML and every key is
//! optional:
//!
//! ```toml
//! profile = "aetheros"
//! release = "noble"
//! mirror = "http://archive.ubuntu.com/ubuntu/"
//!
//! [packages]
//! include = "packages/include.list"
//! exclude = "packages/exclude.list"
//! bloat = "snapd"
//!
//! [boot]
//! timeout_secs = 10
//! ```
//!
//! Relative paths inside the file are resolved against the file's directory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Short lowercase name; prefixes the ISO file and derives the volume id.
    pub profile: String,
    /// Release codename passed to debootstrap.
    pub release: String,
    /// Target architecture (one target per build).
    pub arch: String,
    /// Package mirror URL.
    pub mirror: String,
    /// debootstrap `--variant`.
    pub bootstrap_variant: String,
    /// Archive components enabled in the chroot's apt sources.
    pub components: Vec<String>,
    /// systemd default target set inside the chroot.
    pub default_target: String,
    /// Size of the FAT image holding the UEFI loader.
    pub efiboot_size_mb: u32,
    pub packages: PackagesConfig,
    pub squashfs: SquashfsConfig,
    pub boot: BootConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagesConfig {
    pub include: PathBuf,
    pub exclude: PathBuf,
    /// Purged unconditionally after the exclude list.
    pub bloat: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SquashfsConfig {
    pub compression: String,
    pub block_size: String,
    /// Compressor tuning flags appended after `-comp`.
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    pub menu_title: String,
    pub kernel_params: String,
    pub timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub resolv_conf: PathBuf,
    /// GRUB i386-pc platform directory (cdboot.img, boot_hybrid.img).
    pub grub_pc_dir: PathBuf,
}

fn crate_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            profile: "aetheros".to_string(),
            release: "noble".to_string(),
            arch: "amd64".to_string(),
            mirror: "http://archive.ubuntu.com/ubuntu/".to_string(),
            bootstrap_variant: "minbase".to_string(),
            components: ["main", "restricted", "universe", "multiverse"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            default_target: "graphical.target".to_string(),
            efiboot_size_mb: 10,
            packages: PackagesConfig::default(),
            squashfs: SquashfsConfig::default(),
            boot: BootConfig::default(),
            host: HostConfig::default(),
        }
    }
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            include: crate_dir().join("packages/include.list"),
            exclude: crate_dir().join("packages/exclude.list"),
            bloat: "snapd".to_string(),
        }
    }
}

impl Default for SquashfsConfig {
    fn default() -> Self {
        Self {
            compression: "xz".to_string(),
            block_size: "1M".to_string(),
            extra_args: vec![
                "-Xbcj".to_string(),
                "x86".to_string(),
                "-Xdict-size".to_string(),
                "100%".to_string(),
            ],
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            menu_title: "AetherOS Live".to_string(),
            kernel_params: "boot=casper quiet splash".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            grub_pc_dir: PathBuf::from("/usr/lib/grub/i386-pc"),
        }
    }
}

impl BuildConfig {
    /// Load a TOML config file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading build config '{}'", path.display()))?;
        let mut config: BuildConfig = toml::from_str(&text)
            .with_context(|| format!("parsing build config '{}'", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.packages.include = resolve_path(base, &config.packages.include);
        config.packages.exclude = resolve_path(base, &config.packages.exclude);
        config.host.resolv_conf = resolve_path(base, &config.host.resolv_conf);
        config.host.grub_pc_dir = resolve_path(base, &config.host.grub_pc_dir);

        config
            .validate()
            .with_context(|| format!("invalid build config '{}'", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.profile.is_empty()
            || !self
                .profile
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            bail!(
                "profile '{}' must be non-empty lowercase ASCII (a-z, 0-9, '-', '_')",
                self.profile
            );
        }
        for (field, value) in [
            ("release", &self.release),
            ("arch", &self.arch),
            ("mirror", &self.mirror),
            ("default_target", &self.default_target),
            ("squashfs.compression", &self.squashfs.compression),
        ] {
            if value.trim().is_empty() {
                bail!("{} must not be empty", field);
            }
        }
        // grub-mkstandalone formats and the El Torito layout are x86 only
        if self.arch != "amd64" {
            bail!("arch '{}' is not supported (only amd64)", self.arch);
        }
        if self.components.is_empty() {
            bail!("components must list at least one archive component");
        }
        if self.efiboot_size_mb == 0 {
            bail!("efiboot_size_mb must be greater than zero");
        }
        Ok(())
    }

    /// ISO volume id: uppercased profile, limited to the 32 characters ISO9660 allows.
    pub fn volume_id(&self) -> String {
        self.profile
            .to_ascii_uppercase()
            .replace('-', "_")
            .chars()
            .take(32)
            .collect()
    }

    /// Name of the file placed at the ISO root for GRUB's `search --file`.
    pub fn boot_sentinel(&self) -> String {
        self.volume_id()
    }

    pub fn cdboot_img(&self) -> PathBuf {
        self.host.grub_pc_dir.join("cdboot.img")
    }

    pub fn boot_hybrid_img(&self) -> PathBuf {
        self.host.grub_pc_dir.join("boot_hybrid.img")
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = BuildConfig::default();
        config.validate().unwrap();
        assert_eq!(config.profile, "aetheros");
        assert_eq!(config.volume_id(), "AETHEROS");
        assert!(config.packages.include.ends_with("packages/include.list"));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build.toml");
        fs::write(
            &path,
            "release = \"jammy\"\n\n[packages]\ninclude = \"lists/in.list\"\n\n[boot]\ntimeout_secs = 10\n",
        )
        .unwrap();

        let config = BuildConfig::load(&path).unwrap();
        assert_eq!(config.release, "jammy");
        assert_eq!(config.arch, "amd64");
        assert_eq!(config.boot.timeout_secs, 10);
        assert_eq!(config.boot.kernel_params, "boot=casper quiet splash");
        assert_eq!(config.packages.include, temp.path().join("lists/in.list"));
        assert_eq!(config.packages.bloat, "snapd");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build.toml");
        fs::write(&path, "releas = \"jammy\"\n").unwrap();
        assert!(BuildConfig::load(&path).is_err());
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let config = BuildConfig {
            profile: "Aether OS".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("profile"));
    }

    #[test]
    fn test_foreign_arch_rejected() {
        let config = BuildConfig {
            arch: "arm64".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_volume_id_truncated_and_sanitized() {
        let config = BuildConfig {
            profile: "aether-os-with-a-very-long-profile-name".to_string(),
            ..Default::default()
        };
        let id = config.volume_id();
        assert_eq!(id.len(), 32);
        assert!(id.starts_with("AETHER_OS_WITH"));
    }

    #[test]
    fn test_load_or_default_without_path() {
        assert_eq!(
            BuildConfig::load_or_default(None).unwrap(),
            BuildConfig::default()
        );
    }
}
