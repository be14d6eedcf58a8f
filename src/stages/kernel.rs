//! Stage 6: copy the chroot's kernel and initrd into the ISO tree.
//!
//! When several kernels are installed the highest version wins; versions
//! are compared segment by segment with numeric segments compared as
//! numbers. The initrd must carry the same version as the kernel.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::StageContext;

const KERNEL_PREFIX: &str = "vmlinuz-";
const INITRD_PREFIX: &str = "initrd.img-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedKernel {
    pub version: String,
    pub kernel: PathBuf,
    pub initrd: PathBuf,
}

pub fn run(ctx: &StageContext<'_>) -> Result<StagedKernel> {
    let boot = ctx.paths.chroot.join("boot");
    let version = find_kernel_version(&boot)?;

    let kernel_src = boot.join(format!("{}{}", KERNEL_PREFIX, version));
    let initrd_src = boot.join(format!("{}{}", INITRD_PREFIX, version));
    if !initrd_src.is_file() {
        bail!(
            "kernel {} has no matching initrd (expected '{}')",
            version,
            initrd_src.display()
        );
    }

    let kernel = ctx.paths.staged_kernel();
    let initrd = ctx.paths.staged_initrd();
    if let Some(parent) = kernel.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&kernel_src, &kernel)
        .with_context(|| format!("copying '{}'", kernel_src.display()))?;
    fs::copy(&initrd_src, &initrd)
        .with_context(|| format!("copying '{}'", initrd_src.display()))?;

    info!("staged kernel {}", version);
    Ok(StagedKernel {
        version,
        kernel,
        initrd,
    })
}

/// Highest installed kernel version under `boot_dir`.
pub fn find_kernel_version(boot_dir: &Path) -> Result<String> {
    let entries = fs::read_dir(boot_dir)
        .with_context(|| format!("reading kernel directory '{}'", boot_dir.display()))?;

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(version) = name.strip_prefix(KERNEL_PREFIX) {
            if !version.is_empty() && entry.path().is_file() {
                versions.push(version.to_string());
            }
        }
    }

    versions
        .into_iter()
        .max_by(|a, b| compare_versions(a, b))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no {}* kernel found in '{}'; is a linux-image package in the include list?",
                KERNEL_PREFIX,
                boot_dir.display()
            )
        })
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Num(u64),
    Text(&'a str),
}

fn segments(version: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let bytes = version.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let c = bytes[start];
        if !c.is_ascii_alphanumeric() {
            start += 1;
            continue;
        }
        let digit = c.is_ascii_digit();
        let mut end = start;
        while end < bytes.len()
            && bytes[end].is_ascii_alphanumeric()
            && bytes[end].is_ascii_digit() == digit
        {
            end += 1;
        }
        let part = &version[start..end];
        out.push(match part.parse::<u64>() {
            Ok(n) if digit => Segment::Num(n),
            _ => Segment::Text(part),
        });
        start = end;
    }
    out
}

/// Compare kernel version strings (`6.8.0-31-generic` < `6.8.0-100-generic`).
///
/// A numeric segment sorts above a text segment; a version that is a prefix
/// of another sorts first.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (sa, sb) = (segments(a), segments(b));
    for (x, y) in sa.iter().zip(sb.iter()) {
        let ord = match (x, y) {
            (Segment::Num(m), Segment::Num(n)) => m.cmp(n),
            (Segment::Text(s), Segment::Text(t)) => s.cmp(t),
            (Segment::Num(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(_), Segment::Num(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    sa.len().cmp(&sb.len()).then_with(|| a.cmp(b))
}
