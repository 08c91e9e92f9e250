use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Exclusive advisory lock on a working directory.
///
/// Holds `<gitdir>/gitkv.lock` locked for as long as the value lives, so two
/// handles (in this process or another) never share one working copy.
/// Dropping the value releases the lock.
#[derive(Debug)]
pub struct WorkdirLock {
    file: File,
    path: PathBuf,
}

impl WorkdirLock {
    /// Try to take the lock without waiting.
    ///
    /// # Arguments
    /// * `gitdir` - The repository's `.git` directory.
    /// * `location` - Used in the error message only.
    ///
    /// # Errors
    /// Returns [`Error::Acquisition`] if another handle holds the lock, or
    /// an I/O error if the lock file cannot be created.
    pub fn acquire(gitdir: &Path, location: &str) -> Result<Self> {
        let path = gitdir.join("gitkv.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;

        file.try_lock_exclusive().map_err(|_| {
            Error::acquisition(
                location,
                format!("working copy is in use by another handle ({})", path.display()),
            )
        })?;
        log::debug!("locked {}", path.display());

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
