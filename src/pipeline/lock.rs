use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a workdir, held for the lifetime of a build.
///
/// Released when dropped (the kernel drops flock locks with the descriptor).
#[derive(Debug)]
pub struct WorkdirLock {
    _file: File,
    path: PathBuf,
}

impl WorkdirLock {
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Never unlink the lock file; a second process could then lock a fresh
        // inode at the same path while the first still holds the old one.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

        if file.try_lock_exclusive().is_err() {
            drop(file);
            return Err(anyhow::anyhow!(
                "Workdir is in use by another build: {}",
                lock_path.display()
            ));
        }

        Ok(Self {
            _file: file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
