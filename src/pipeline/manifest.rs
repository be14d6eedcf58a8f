//! `build-manifest.json`: what the last build in a workdir did.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::stages::bootstrap::BootstrapOutcome;
use crate::stages::mounts::UnmountReport;
use crate::stages::provision::PurgeRecord;
use crate::stages::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration_ms: u64,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub profile: String,
    pub release: String,
    pub build_date: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapOutcome>,
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub installed: Vec<String>,
    #[serde(default)]
    pub purged: Vec<PurgeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmount: Option<UnmountReport>,
    pub started_at_utc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_utc: Option<String>,
}

impl BuildReport {
    pub fn stages_run(&self) -> Vec<Stage> {
        self.stages.iter().map(|r| r.stage).collect()
    }
}

pub fn write_manifest(path: &Path, report: &BuildReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("serializing build manifest")?;
    fs::write(path, json)
        .with_context(|| format!("writing build manifest '{}'", path.display()))?;
    Ok(())
}

/// Load a manifest; `Ok(None)` when the workdir has never been built.
pub fn load_manifest(path: &Path) -> Result<Option<BuildReport>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(path)
        .with_context(|| format!("reading build manifest '{}'", path.display()))?;
    let report = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing build manifest '{}'", path.display()))?;
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::provision::PurgeOutcome;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(load_manifest(&temp.path().join("build-manifest.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_failed_manifest_keeps_error_and_purges() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build-manifest.json");
        let report = BuildReport {
            profile: "aetheros".into(),
            release: "noble".into(),
            build_date: "20261016".into(),
            status: BuildStatus::Failed,
            error: Some("stage 'provision' failed".into()),
            iso: None,
            sha256: None,
            kernel_version: None,
            filesystem_size: None,
            bootstrap: Some(BootstrapOutcome::Skipped),
            stages: vec![StageRecord {
                stage: Stage::Provision,
                duration_ms: 12,
                ok: false,
            }],
            installed: vec![],
            purged: vec![PurgeRecord {
                package: "snapd".into(),
                outcome: PurgeOutcome::AlreadyAbsent,
            }],
            unmount: None,
            started_at_utc: "2026-10-16T08:00:00Z".into(),
            finished_at_utc: None,
        };

        write_manifest(&path, &report).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"status\": \"failed\""));
        assert!(!text.contains("\"iso\""));

        let loaded = load_manifest(&path).unwrap().unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn test_corrupt_manifest_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build-manifest.json");
        fs::write(&path, b"{not json").unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert!(err.to_string().contains("parsing build manifest"));
    }
}
