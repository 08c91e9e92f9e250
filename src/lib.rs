//! File-like, transactional access to keys in a git repository.
//!
//! `gitkv` treats a (usually remote) git repository as a durable key-value
//! store: a key is a path in the repository, its value is the file's bytes.
//! Reads come from a local working copy; writes are buffered, committed as a
//! single commit and pushed when the scope that made them ends.
//!
//! # Key types
//!
//! - [`Repository`]: a working copy of one branch. Writes staged on it are
//!   committed and pushed together on [`release()`](Repository::release).
//! - [`KeyValueFile`]: buffered view of one key, implementing `Read`,
//!   `Write` and `Seek`. Its content is staged on `close()` and dropped
//!   otherwise.
//! - [`ObjectStore`]: the git operations a `Repository` relies on;
//!   [`GitBackend`] implements them with libgit2.
//!
//! # Conflicts
//!
//! If another writer pushed first, the push is rejected; the commit is then
//! rebased onto the new remote tip and pushed exactly once more. Writers that
//! touched different keys both succeed. A key changed upstream and locally
//! is a conflict, and the transaction fails with [`Error::Push`]. The local
//! commit is kept, never silently retried.
//!
//! # Quick example
//!
//! ```rust,no_run
//! use std::io::Write;
//! use gitkv::{Mode, RepoOptions};
//!
//! gitkv::open(
//!     "git@example.com:team/settings.git",
//!     "service/limits.toml",
//!     Mode::Write,
//!     RepoOptions::default().with_branch("main"),
//!     |f| Ok(f.write_all(b"max_conn = 64\n")?),
//! )?;
//! # Ok::<(), gitkv::Error>(())
//! ```

pub mod batch;
pub mod error;
pub mod fileobj;
pub mod lock;
pub mod paths;
pub mod repo;
pub mod store;
pub mod transaction;
pub mod tree;
pub mod types;

// Re-export primary public types at crate root.
pub use batch::PendingCommit;
pub use error::{Error, Result, Stage};
pub use fileobj::KeyValueFile;
pub use repo::Repository;
pub use store::{GitBackend, ObjectStore, PushStatus};
pub use types::*;

pub use git2::Oid;

/// Open one key, use it, and commit and push the result.
///
/// Acquires `location` (see [`Repository::acquire`]), opens `key` in `mode`
/// and runs `f` on the file. If `f` succeeds the file is closed and the
/// repository released, which commits and pushes any change. If `f` fails,
/// nothing is committed and its error is returned.
///
/// # Errors
/// Whatever `f` returns, plus acquisition errors, [`Error::KeyNotFound`] for
/// read modes on an absent key, and [`Error::Push`] if the change could not
/// be pushed.
pub fn open<T, F>(location: &str, key: &str, mode: Mode, options: RepoOptions, f: F) -> Result<T>
where
    F: FnOnce(&mut KeyValueFile<'_>) -> Result<T>,
{
    let mut repo = Repository::acquire(location, options)?;
    let value = repo.with_file(key, mode, f)?;
    repo.release()?;
    Ok(value)
}
