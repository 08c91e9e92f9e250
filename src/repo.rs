use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::batch::PendingCommit;
use crate::error::{Error, Result};
use crate::fileobj::KeyValueFile;
use crate::lock::WorkdirLock;
use crate::paths::normalize_key;
use crate::store::{GitBackend, ObjectStore};
use crate::transaction;
use crate::types::{HistoryOptions, KeyVersion, Mode, RepoOptions, TransactionReport};

/// Where the working copy lives and who cleans it up.
enum WorkDir {
    /// Ours; removed on release.
    Ephemeral(TempDir),
    /// The caller's; left in place.
    Supplied(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// The last push sequence failed terminally.
    Failed,
    Released,
}

/// A working copy of one branch of a repository, plus the writes staged
/// against it.
///
/// Writes staged through [`KeyValueFile`]s (or [`stage`](Self::stage)) are
/// committed together as a single commit and pushed when the handle is
/// released. Release happens on [`release()`](Self::release) or on drop.
///
/// # Example
///
/// ```rust,no_run
/// use std::io::Write;
/// use gitkv::{Mode, RepoOptions, Repository};
///
/// let mut repo = Repository::acquire("https://example.com/data.git", RepoOptions::default())?;
/// repo.with_file("a.json", Mode::Write, |f| Ok(f.write_all(b"{}")?))?;
/// repo.with_file("b.json", Mode::Write, |f| Ok(f.write_all(b"[]")?))?;
/// let report = repo.release()?; // one commit, one push
/// # Ok::<(), gitkv::Error>(())
/// ```
pub struct Repository {
    location: String,
    store: Option<Box<dyn ObjectStore>>,
    workdir: Option<WorkDir>,
    lock: Option<WorkdirLock>,
    pending: PendingCommit,
    state: State,
}

impl Repository {
    /// Acquire a working copy of `location`.
    ///
    /// An existing non-bare repository directory is worked on in place.
    /// Anything else (a URL, a bare repository) is cloned, into
    /// `options.workdir` when given, otherwise into a temporary directory.
    ///
    /// # Errors
    /// [`Error::Acquisition`] if the remote is unreachable, the branch does
    /// not exist, the path is not a repository, or the working copy is
    /// already held by another handle.
    pub fn acquire(location: &str, options: RepoOptions) -> Result<Self> {
        let path = Path::new(location);
        if path.is_dir() {
            let existing = git2::Repository::open(path)
                .map_err(|e| Error::acquisition(location, e.message()))?;
            if !existing.is_bare() {
                drop(existing);
                return Self::open_local(path, options);
            }
        } else if options.create && !looks_like_url(location) {
            return Self::open_local(path, options);
        }
        Self::clone_remote(location, options)
    }

    /// Work directly in the non-bare repository at `path`.
    ///
    /// The directory is locked for the lifetime of the handle and is never
    /// deleted.
    pub fn open_local(path: impl AsRef<Path>, options: RepoOptions) -> Result<Self> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let backend = GitBackend::open_local(path, &options)?;
        let lock = WorkdirLock::acquire(backend.git_dir(), &location)?;
        let workdir = WorkDir::Supplied(backend.workdir().to_path_buf());
        log::info!("opened {} in place on '{}'", location, backend.branch());
        Ok(Self::assemble(location, Box::new(backend), workdir, Some(lock), options))
    }

    /// A throwaway repository with no remote. Commits stay local and vanish
    /// on release.
    pub fn temporary(options: RepoOptions) -> Result<Self> {
        let tmp = TempDir::new()?;
        let backend = GitBackend::init(&tmp.path().join("gitkv"), &options)?;
        log::info!("temporary repository at {}", backend.workdir().display());
        Ok(Self::assemble(
            "(temporary)".to_string(),
            Box::new(backend),
            WorkDir::Ephemeral(tmp),
            None,
            options,
        ))
    }

    /// Wrap an already-acquired [`ObjectStore`]. Its working copy is treated
    /// as caller-supplied and left in place on release.
    pub fn from_store(store: Box<dyn ObjectStore>, options: RepoOptions) -> Self {
        let location = store.workdir().display().to_string();
        let workdir = WorkDir::Supplied(store.workdir().to_path_buf());
        Self::assemble(location, store, workdir, None, options)
    }

    fn clone_remote(url: &str, options: RepoOptions) -> Result<Self> {
        let (dest, workdir, needs_lock) = match &options.workdir {
            Some(dir) => {
                let occupied = dir.exists()
                    && std::fs::read_dir(dir)
                        .map_err(|e| Error::io(dir, e))?
                        .next()
                        .is_some();
                if occupied {
                    return Err(Error::acquisition(
                        url,
                        format!("working directory {} is not empty", dir.display()),
                    ));
                }
                (dir.clone(), WorkDir::Supplied(dir.clone()), true)
            }
            None => {
                let tmp = TempDir::new()?;
                (tmp.path().join("gitkv"), WorkDir::Ephemeral(tmp), false)
            }
        };
        let backend = GitBackend::clone(url, &dest, &options)?;
        let lock = if needs_lock {
            Some(WorkdirLock::acquire(backend.git_dir(), url)?)
        } else {
            None
        };
        Ok(Self::assemble(url.to_string(), Box::new(backend), workdir, lock, options))
    }

    fn assemble(
        location: String,
        store: Box<dyn ObjectStore>,
        workdir: WorkDir,
        lock: Option<WorkdirLock>,
        options: RepoOptions,
    ) -> Self {
        let mut pending = PendingCommit::new();
        pending.message = options.message;
        Self {
            location,
            store: Some(store),
            workdir: Some(workdir),
            lock,
            pending,
            state: State::Open,
        }
    }

    fn store(&self) -> Result<&dyn ObjectStore> {
        match &self.store {
            Some(store) if self.state != State::Released => Ok(&**store),
            _ => Err(Error::Released),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.store().map(|_| ())
    }

    /// New changes are refused while a failed push's commit is kept: they
    /// would not be part of it.
    pub(crate) fn ensure_writable(&self) -> Result<()> {
        let store = self.store()?;
        if self.state == State::Failed {
            return Err(Error::unpushed(store.branch(), store.workdir()));
        }
        Ok(())
    }

    // -- Accessors ----------------------------------------------------------

    /// The location this handle was acquired from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The branch commits go to.
    pub fn branch(&self) -> Result<&str> {
        Ok(self.store()?.branch())
    }

    /// Directory holding the working copy.
    pub fn workdir(&self) -> Result<&Path> {
        Ok(self.store()?.workdir())
    }

    /// Hash of the local branch tip, `None` while the branch has no commits.
    pub fn head(&self) -> Result<Option<String>> {
        Ok(self.store()?.tip()?.map(|oid| oid.to_string()))
    }

    pub fn is_released(&self) -> bool {
        self.state == State::Released
    }

    /// The staged changes, including a committed-but-unpushed commit left
    /// behind by a failed push.
    pub fn pending(&self) -> &PendingCommit {
        &self.pending
    }

    /// The pending commit, if a push sequence has failed and left it behind.
    pub fn unpushed(&self) -> Option<&PendingCommit> {
        (self.pending.commit.is_some()).then_some(&self.pending)
    }

    // -- Reads --------------------------------------------------------------

    /// Content of `key` in the working copy. Staged writes are not visible
    /// here until committed.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the key is absent.
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let key = normalize_key(key)?;
        self.store()?.read_blob(&key)
    }

    /// Whether `key` exists in the working copy.
    pub fn exists(&self, key: &str) -> Result<bool> {
        match self.read(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The staged value of `key`: `Some(Some(_))` for a pending write,
    /// `Some(None)` for a pending removal, `None` when not staged.
    pub fn staged(&self, key: &str) -> Result<Option<Option<Vec<u8>>>> {
        let key = normalize_key(key)?;
        Ok(self.pending.get(&key).map(|v| v.map(<[u8]>::to_vec)))
    }

    /// Versions of `key` on the local branch, newest first.
    pub fn history(&self, key: &str, options: HistoryOptions) -> Result<Vec<KeyVersion>> {
        let key = normalize_key(key)?;
        self.store()?.history(&key, &options)
    }

    /// The most recent version of `key`, if it was ever committed.
    pub fn last_version(&self, key: &str) -> Result<Option<KeyVersion>> {
        let options = HistoryOptions {
            limit: Some(1),
            ..Default::default()
        };
        Ok(self.history(key, options)?.into_iter().next())
    }

    // -- Staging ------------------------------------------------------------

    /// Record `content` as the value of `key` for the next commit. Staging
    /// the same key again replaces the earlier value.
    ///
    /// # Errors
    /// [`Error::Unpushed`] while the commit of a failed push is kept; a
    /// successful [`finalize()`](Self::finalize) lifts it.
    pub fn stage(&mut self, key: &str, content: Vec<u8>) -> Result<()> {
        self.ensure_writable()?;
        let key = normalize_key(key)?;
        log::debug!("staged {} ({} bytes)", key, content.len());
        self.pending.write(key, content);
        Ok(())
    }

    /// Stage the removal of `key`.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the key is neither in the working copy nor
    /// staged for writing, [`Error::Unpushed`] as for [`stage`](Self::stage).
    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        let key = normalize_key(key)?;
        let staged_write = matches!(self.pending.get(&key), Some(Some(_)));
        if !staged_write && !self.exists(&key)? {
            return Err(Error::key_not_found(key));
        }
        log::debug!("staged removal of {}", key);
        self.pending.remove(key);
        Ok(())
    }

    /// Message for the next commit (defaults to one naming the keys).
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.pending.message = Some(message.into());
    }

    // -- Files --------------------------------------------------------------

    /// Open a [`KeyValueFile`] on `key`. Its changes are staged when it is
    /// closed, and discarded if it is dropped without closing.
    pub fn open(&mut self, key: &str, mode: Mode) -> Result<KeyValueFile<'_>> {
        KeyValueFile::open(self, key, mode)
    }

    /// Open `key`, run `f` on it and close it if `f` succeeds.
    ///
    /// If `f` fails, nothing is staged for this key. The handle is not
    /// released, so several keys can be batched into one commit.
    pub fn with_file<T, F>(&mut self, key: &str, mode: Mode, f: F) -> Result<T>
    where
        F: FnOnce(&mut KeyValueFile<'_>) -> Result<T>,
    {
        let mut file = self.open(key, mode)?;
        let value = f(&mut file)?;
        file.close()?;
        Ok(value)
    }

    // -- Transaction --------------------------------------------------------

    /// Commit and push whatever is staged, keeping the handle open.
    ///
    /// Calling this after a failed push is a manual retry: the kept commit
    /// goes through one new push sequence.
    pub fn finalize(&mut self) -> Result<Option<TransactionReport>> {
        if self.state == State::Released {
            return Err(Error::Released);
        }
        let store = self.store.as_deref_mut().ok_or(Error::Released)?;
        match transaction::finalize(store, &mut self.pending) {
            Ok(report) => {
                self.state = State::Open;
                Ok(report)
            }
            Err(e) => {
                if self.pending.commit.is_some() {
                    self.state = State::Failed;
                }
                Err(e)
            }
        }
    }

    /// Commit and push whatever is staged, then give up the working copy.
    ///
    /// An ephemeral working copy is deleted, unless the push failed: then it
    /// is kept on disk (its path is in the error) with the local commit.
    /// A caller-supplied directory is left as is. Releasing twice is a no-op.
    /// A handle whose push failed holds nothing beyond its kept commit, since
    /// staging is refused in that state.
    pub fn release(&mut self) -> Result<Option<TransactionReport>> {
        if self.state == State::Released {
            return Ok(None);
        }

        let result = if self.state == State::Failed {
            log::warn!(
                "releasing {} with an unpushed commit; not pushing again",
                self.location
            );
            Ok(None)
        } else {
            self.finalize()
        };
        let keep = result.is_err() || self.state == State::Failed;

        self.state = State::Released;
        self.store = None;
        self.lock = None;
        match self.workdir.take() {
            Some(WorkDir::Ephemeral(tmp)) if keep => {
                #[allow(deprecated)]
                let kept = tmp.into_path();
                log::warn!("kept working copy with unpushed commit at {}", kept.display());
            }
            Some(WorkDir::Ephemeral(tmp)) => {
                if let Err(e) = tmp.close() {
                    log::warn!("failed to remove working copy: {}", e);
                }
            }
            Some(WorkDir::Supplied(_)) | None => {}
        }
        log::debug!("released {}", self.location);
        result
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        if self.state != State::Released {
            if let Err(e) = self.release() {
                log::error!("release of {} on drop failed: {}", self.location, e);
            }
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Repository");
        d.field("location", &self.location);
        if let Some(store) = &self.store {
            d.field("branch", &store.branch())
                .field("workdir", &store.workdir());
        }
        d.field("staged", &self.pending.keys())
            .field("state", &self.state)
            .finish()
    }
}

fn looks_like_url(location: &str) -> bool {
    location.contains("://") || (location.contains('@') && location.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection() {
        assert!(looks_like_url("https://example.com/r.git"));
        assert!(looks_like_url("git@gitlab.lan:team/repo.git"));
        assert!(!looks_like_url("/srv/repos/data"));
    }
}
