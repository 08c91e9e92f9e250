//! The object-store boundary.
//!
//! [`ObjectStore`] is what a [`Repository`](crate::Repository) drives: read a
//! blob from the working copy, commit a set of changes, push, fetch and
//! reconcile. [`GitBackend`] implements it on top of libgit2.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks, Sort};

use crate::error::{Error, Result};
use crate::paths::{branch_ref, validate_branch_name};
use crate::tree;
use crate::types::{HistoryOptions, KeyVersion, RepoOptions, Signature};

const REMOTE_NAME: &str = "origin";

/// Outcome of a push that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    /// The remote branch now points at the local tip.
    Pushed,
    /// There is no remote to push to; the commit stays local.
    LocalOnly,
    /// The remote branch has moved on (non-fast-forward).
    Rejected { reason: String },
}

/// A working copy of one branch and the remote it tracks.
///
/// Every method blocks the calling thread. Transport timeouts are the
/// implementation's business and surface as errors.
pub trait ObjectStore {
    /// Directory holding the working copy.
    fn workdir(&self) -> &Path;

    /// Branch this working copy tracks.
    fn branch(&self) -> &str;

    /// Local branch tip, `None` while the branch is unborn.
    fn tip(&self) -> Result<Option<Oid>>;

    /// Content of `key` at the local branch tip.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the key is absent.
    fn read_blob(&self, key: &str) -> Result<Vec<u8>>;

    /// Create one commit on top of the local tip holding every change
    /// (`None` removes the key) and check it out. Returns `None` when the
    /// resulting tree is identical to the tip's.
    fn commit(&mut self, changes: &[(String, Option<Vec<u8>>)], message: &str)
        -> Result<Option<Oid>>;

    /// Push the local branch to the remote branch.
    fn push(&mut self) -> Result<PushStatus>;

    /// Fetch the remote branch; returns its tip, `None` if it does not exist.
    fn fetch(&mut self) -> Result<Option<Oid>>;

    /// Rebase the local commit `local` onto `remote_tip` and check it out.
    ///
    /// # Errors
    /// [`Error::Conflict`] when a key changed by `local` was also changed
    /// upstream.
    fn reconcile(&mut self, local: Oid, remote_tip: Oid) -> Result<Oid>;

    /// Versions of `key`, newest first.
    fn history(&self, key: &str, options: &HistoryOptions) -> Result<Vec<KeyVersion>>;
}

// ---------------------------------------------------------------------------
// GitBackend
// ---------------------------------------------------------------------------

/// [`ObjectStore`] backed by a non-bare libgit2 repository.
pub struct GitBackend {
    repo: git2::Repository,
    workdir: PathBuf,
    branch: String,
    remote: Option<String>,
    signature: Signature,
    /// Clones are ours to overwrite; in-place repositories get safe checkouts.
    force_checkout: bool,
}

impl GitBackend {
    /// Clone `url` into `dest` and check out the configured branch.
    ///
    /// `dest` must not exist or be empty.
    ///
    /// # Errors
    /// [`Error::Acquisition`] if the remote cannot be cloned or does not have
    /// the branch (unless `options.create` is set, in which case the branch
    /// starts unborn and is created by the first push).
    pub fn clone(url: &str, dest: &Path, options: &RepoOptions) -> Result<Self> {
        let branch = options.branch_name().to_string();
        validate_branch_name(&branch)?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(git2::Config::open_default().ok()));
        let repo = RepoBuilder::new()
            .fetch_options(fo)
            .clone(url, dest)
            .map_err(|e| Error::acquisition(url, e.message()))?;
        log::info!("cloned {} into {}", url, dest.display());

        let tracking = format!("refs/remotes/{}/{}", REMOTE_NAME, branch);
        match refname_to_id_optional(&repo, &tracking)? {
            Some(oid) => {
                repo.reference(&branch_ref(&branch), oid, true, "gitkv: branch from remote")
                    .map_err(Error::git)?;
            }
            None if options.create => {
                log::info!("branch '{}' not on {}; starting it unborn", branch, url);
                let empty = tree::empty_tree(&repo)?;
                repo.checkout_tree(empty.as_object(), Some(CheckoutBuilder::new().force()))
                    .map_err(Error::git)?;
            }
            None => {
                return Err(Error::acquisition(
                    url,
                    format!("branch '{}' does not exist", branch),
                ));
            }
        }

        let config = repo.config().ok();
        let backend = Self {
            workdir: dest.to_path_buf(),
            remote: Some(REMOTE_NAME.to_string()),
            signature: options.signature(config.as_ref()),
            force_checkout: true,
            branch,
            repo,
        };
        backend.switch_branch()?;
        Ok(backend)
    }

    /// Open the non-bare repository at `path` and work in it directly.
    ///
    /// With `options.create`, a missing directory gets a fresh repository and
    /// a missing branch starts unborn. Pushes go to `origin` when the
    /// repository has one.
    ///
    /// # Errors
    /// [`Error::Acquisition`] if `path` is not a usable repository or lacks
    /// the branch.
    pub fn open_local(path: &Path, options: &RepoOptions) -> Result<Self> {
        let branch = options.branch_name().to_string();
        validate_branch_name(&branch)?;
        let location = path.display().to_string();

        let repo = if path.exists() {
            git2::Repository::open(path).map_err(|e| Error::acquisition(&location, e.message()))?
        } else if options.create {
            std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
            git2::Repository::init(path).map_err(|e| Error::acquisition(&location, e.message()))?
        } else {
            return Err(Error::acquisition(&location, "path does not exist"));
        };

        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::acquisition(&location, "bare repository has no working copy"))?
            .to_path_buf();

        let local = branch_ref(&branch);
        if refname_to_id_optional(&repo, &local)?.is_none() {
            let tracking = format!("refs/remotes/{}/{}", REMOTE_NAME, branch);
            match refname_to_id_optional(&repo, &tracking)? {
                Some(oid) => {
                    repo.reference(&local, oid, false, "gitkv: branch from remote")
                        .map_err(Error::git)?;
                }
                None if options.create => {
                    log::info!("branch '{}' not in {}; starting it unborn", branch, location);
                }
                None => {
                    return Err(Error::acquisition(
                        &location,
                        format!("branch '{}' does not exist", branch),
                    ));
                }
            }
        }

        let remote = repo.find_remote(REMOTE_NAME).ok().map(|_| REMOTE_NAME.to_string());
        let config = repo.config().ok();
        let backend = Self {
            workdir,
            remote,
            signature: options.signature(config.as_ref()),
            force_checkout: false,
            branch,
            repo,
        };
        backend.switch_branch()?;
        Ok(backend)
    }

    /// Initialise a fresh repository at `path` with no remote.
    pub fn init(path: &Path, options: &RepoOptions) -> Result<Self> {
        let branch = options.branch_name().to_string();
        validate_branch_name(&branch)?;
        let repo = git2::Repository::init(path)
            .map_err(|e| Error::acquisition(path.display().to_string(), e.message()))?;
        let config = repo.config().ok();
        let backend = Self {
            workdir: path.to_path_buf(),
            remote: None,
            signature: options.signature(config.as_ref()),
            force_checkout: true,
            branch,
            repo,
        };
        backend.switch_branch()?;
        Ok(backend)
    }

    /// The repository's `.git` directory.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Whether pushes go anywhere.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Identity used for new commits.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Materialise the branch tip (if any), then point HEAD at the branch.
    fn switch_branch(&self) -> Result<()> {
        if let Some(tip) = self.tip()? {
            let commit = self.repo.find_commit(tip).map_err(Error::git)?;
            self.checkout(&commit)?;
        }
        self.repo.set_head(&branch_ref(&self.branch)).map_err(Error::git)
    }

    fn checkout(&self, commit: &git2::Commit<'_>) -> Result<()> {
        let mut cb = CheckoutBuilder::new();
        if self.force_checkout {
            cb.force();
        } else {
            cb.safe().recreate_missing(true);
        }
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut cb))
            .map_err(Error::git)
    }

    /// Check `oid` out, then move the branch to it.
    fn advance_to(&self, oid: Oid, log_message: &str) -> Result<()> {
        let commit = self.repo.find_commit(oid).map_err(Error::git)?;
        self.checkout(&commit)?;
        self.repo
            .reference(&branch_ref(&self.branch), oid, true, log_message)
            .map_err(Error::git)?;
        Ok(())
    }

    fn tip_tree(&self) -> Result<Option<git2::Tree<'_>>> {
        match self.tip()? {
            Some(oid) => {
                let commit = self.repo.find_commit(oid).map_err(Error::git)?;
                Ok(Some(commit.tree().map_err(Error::git)?))
            }
            None => Ok(None),
        }
    }
}

impl ObjectStore for GitBackend {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    fn tip(&self) -> Result<Option<Oid>> {
        refname_to_id_optional(&self.repo, &branch_ref(&self.branch))
    }

    fn read_blob(&self, key: &str) -> Result<Vec<u8>> {
        match self.tip_tree()? {
            Some(tree) => tree::read_blob(&self.repo, &tree, key),
            None => Err(Error::key_not_found(key)),
        }
    }

    fn commit(
        &mut self,
        changes: &[(String, Option<Vec<u8>>)],
        message: &str,
    ) -> Result<Option<Oid>> {
        let parent = match self.tip()? {
            Some(oid) => Some(self.repo.find_commit(oid).map_err(Error::git)?),
            None => None,
        };
        let base_tree = match &parent {
            Some(commit) => commit.tree().map_err(Error::git)?,
            None => tree::empty_tree(&self.repo)?,
        };

        let tree_oid = tree::rebuild_tree(&self.repo, &base_tree, changes)?;
        if tree_oid == base_tree.id() {
            log::debug!("tree unchanged on '{}'; nothing to commit", self.branch);
            return Ok(None);
        }

        let new_tree = self.repo.find_tree(tree_oid).map_err(Error::git)?;
        let sig = self.signature.to_git()?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(None, &sig, &sig, message, &new_tree, &parents)
            .map_err(Error::git)?;

        self.advance_to(oid, &format!("commit: {}", message))?;
        log::info!("committed {} on '{}'", oid, self.branch);
        Ok(Some(oid))
    }

    fn push(&mut self) -> Result<PushStatus> {
        let Some(remote_name) = self.remote.as_deref() else {
            return Ok(PushStatus::LocalOnly);
        };
        let mut remote = self.repo.find_remote(remote_name).map_err(Error::git)?;
        let refspec = format!("{0}:{0}", branch_ref(&self.branch));

        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = remote_callbacks(self.repo.config().ok());
            callbacks.push_update_reference(|_ref_name, status| {
                if let Some(msg) = status {
                    *rejection.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);

            if let Err(e) = remote.push(&[refspec.as_str()], Some(&mut push_options)) {
                if is_non_fast_forward(&e) {
                    return Ok(PushStatus::Rejected {
                        reason: e.message().to_string(),
                    });
                }
                return Err(Error::git(e));
            }
        }

        if let Some(reason) = rejection.into_inner() {
            if is_rejection_retryable(&reason) {
                return Ok(PushStatus::Rejected { reason });
            }
            return Err(Error::PushRejected(reason));
        }

        log::info!("pushed '{}' to {}", self.branch, remote_name);
        Ok(PushStatus::Pushed)
    }

    fn fetch(&mut self) -> Result<Option<Oid>> {
        let Some(remote_name) = self.remote.as_deref() else {
            return Ok(None);
        };
        let mut remote = self.repo.find_remote(remote_name).map_err(Error::git)?;
        let tracking = format!("refs/remotes/{}/{}", remote_name, self.branch);
        let refspec = format!("+{}:{}", branch_ref(&self.branch), tracking);

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(self.repo.config().ok()));
        remote
            .fetch(&[refspec.as_str()], Some(&mut fo), None)
            .map_err(Error::git)?;

        let tip = refname_to_id_optional(&self.repo, &tracking)?;
        log::debug!("fetched '{}': remote tip {:?}", self.branch, tip);
        Ok(tip)
    }

    fn reconcile(&mut self, local: Oid, remote_tip: Oid) -> Result<Oid> {
        if local == remote_tip
            || self
                .repo
                .graph_descendant_of(local, remote_tip)
                .map_err(Error::git)?
        {
            return Ok(local);
        }

        let ours = self.repo.find_commit(local).map_err(Error::git)?;
        let theirs = self.repo.find_commit(remote_tip).map_err(Error::git)?;
        let base_tree = match ours.parent(0) {
            Ok(parent) => parent.tree().map_err(Error::git)?,
            Err(_) => tree::empty_tree(&self.repo)?,
        };
        let our_tree = ours.tree().map_err(Error::git)?;
        let their_tree = theirs.tree().map_err(Error::git)?;

        let merged = tree::merge_keys(&self.repo, &base_tree, &our_tree, &their_tree)?;
        let merged_tree = self.repo.find_tree(merged).map_err(Error::git)?;
        let committer = self.signature.to_git()?;
        let message = ours.message().unwrap_or_default();
        let oid = self
            .repo
            .commit(None, &ours.author(), &committer, message, &merged_tree, &[&theirs])
            .map_err(Error::git)?;

        self.advance_to(oid, &format!("gitkv: rebase onto {}", remote_tip))?;
        log::info!("rebased {} onto {} as {}", local, remote_tip, oid);
        Ok(oid)
    }

    fn history(&self, key: &str, options: &HistoryOptions) -> Result<Vec<KeyVersion>> {
        let Some(tip) = self.tip()? else {
            return Ok(Vec::new());
        };
        let limit = options.limit.unwrap_or(usize::MAX);

        let mut walk = self.repo.revwalk().map_err(Error::git)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME).map_err(Error::git)?;
        walk.push(tip).map_err(Error::git)?;

        let mut versions = Vec::new();
        for oid in walk {
            if versions.len() >= limit {
                break;
            }
            let oid = oid.map_err(Error::git)?;
            let commit = self.repo.find_commit(oid).map_err(Error::git)?;
            let time = commit.time().seconds().max(0) as u64;
            let message = commit.message().unwrap_or_default().to_string();

            if options.since.is_some_and(|since| time < since)
                || options.until.is_some_and(|until| time > until)
                || (options.message_contains_key && !message.contains(key))
            {
                continue;
            }

            let tree = commit.tree().map_err(Error::git)?;
            let Some(entry) = tree::entry_at_path(&tree, key)? else {
                continue;
            };

            // Skip commits that left the key untouched.
            let parent_entry = match commit.parent(0) {
                Ok(parent) => {
                    let parent_tree = parent.tree().map_err(Error::git)?;
                    tree::entry_at_path(&parent_tree, key)?
                }
                Err(_) => None,
            };
            if parent_entry.map(|e| e.oid) == Some(entry.oid) {
                continue;
            }

            let blob = self.repo.find_blob(entry.oid).map_err(Error::git)?;
            versions.push(KeyVersion {
                commit_hash: oid.to_string(),
                blob_hash: entry.oid.to_string(),
                message,
                time,
                data: blob.content().to_vec(),
            });
        }
        Ok(versions)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Credentials: ssh-agent for ssh keys, the git credential helper for
/// user/password, libgit2's default otherwise.
fn remote_callbacks<'a>(config: Option<git2::Config>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(cfg) = config.as_ref() {
                if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        Cred::default()
    });
    callbacks
}

fn is_non_fast_forward(err: &git2::Error) -> bool {
    err.code() == ErrorCode::NotFastForward || is_rejection_retryable(err.message())
}

fn is_rejection_retryable(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("non-fast-forward")
        || msg.contains("non-fastforwardable")
        || msg.contains("fetch first")
}

fn refname_to_id_optional(repo: &git2::Repository, name: &str) -> Result<Option<Oid>> {
    match repo.refname_to_id(name) {
        Ok(oid) => Ok(Some(oid)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(Error::git(e)),
    }
}
