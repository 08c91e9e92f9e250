use std::path::Path;

use git2::build::TreeUpdateBuilder;
use git2::{ErrorClass, ErrorCode, FileMode, ObjectType, Oid, Repository, Tree};

use crate::error::{Error, Result};

pub const MODE_BLOB: i32 = 0o100644;
pub const MODE_BLOB_EXEC: i32 = 0o100755;
pub const MODE_LINK: i32 = 0o120000;

/// Result of looking up a single tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntryResult {
    pub oid: Oid,
    pub mode: i32,
}

pub(crate) fn file_mode(mode: i32) -> FileMode {
    match mode {
        MODE_BLOB_EXEC => FileMode::BlobExecutable,
        MODE_LINK => FileMode::Link,
        _ => FileMode::Blob,
    }
}

/// Return the `(oid, mode)` of the blob at `key`, or `None` if missing.
///
/// A directory at `key` counts as missing: keys always name files.
pub fn entry_at_path(tree: &Tree<'_>, key: &str) -> Result<Option<TreeEntryResult>> {
    match tree.get_path(Path::new(key)) {
        Ok(entry) => {
            if entry.kind() != Some(ObjectType::Blob) {
                return Ok(None);
            }
            Ok(Some(TreeEntryResult {
                oid: entry.id(),
                mode: entry.filemode(),
            }))
        }
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(Error::git(e)),
    }
}

/// Read the blob at `key` from `tree`.
///
/// # Errors
/// Returns [`Error::KeyNotFound`] if there is no blob at `key`.
pub fn read_blob(repo: &Repository, tree: &Tree<'_>, key: &str) -> Result<Vec<u8>> {
    let entry = entry_at_path(tree, key)?.ok_or_else(|| Error::key_not_found(key))?;
    let blob = repo.find_blob(entry.oid).map_err(Error::git)?;
    Ok(blob.content().to_vec())
}

/// The empty tree, for unborn branches.
pub(crate) fn empty_tree(repo: &Repository) -> Result<Tree<'_>> {
    let oid = repo
        .treebuilder(None)
        .and_then(|b| b.write())
        .map_err(Error::git)?;
    repo.find_tree(oid).map_err(Error::git)
}

/// Write a new tree: `base` with every change applied.
///
/// `Some(bytes)` upserts a blob (keeping an existing entry's file mode),
/// `None` removes the key. Removing a key that is not in `base` is a no-op.
pub fn rebuild_tree(
    repo: &Repository,
    base: &Tree<'_>,
    changes: &[(String, Option<Vec<u8>>)],
) -> Result<Oid> {
    let mut update = TreeUpdateBuilder::new();
    for (key, content) in changes {
        let existing = entry_at_path(base, key)?;
        match content {
            Some(data) => {
                let blob = repo.blob(data).map_err(Error::git)?;
                let mode = existing.map(|e| e.mode).unwrap_or(MODE_BLOB);
                update.upsert(key.as_str(), blob, file_mode(mode));
            }
            None => {
                if existing.is_some() {
                    update.remove(key.as_str());
                }
            }
        }
    }
    update.create_updated(repo, base).map_err(Error::git)
}

/// Whether writing a blob at `key` would clash with the shape of `tree`:
/// a parent segment is a file, or `key` itself is a directory.
fn clashes_with_tree(tree: &Tree<'_>, key: &str) -> Result<bool> {
    let mut prefix = String::new();
    let mut segments = key.split('/').peekable();
    while let Some(segment) = segments.next() {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        let is_dir = match tree.get_path(Path::new(&prefix)) {
            Ok(entry) => entry.kind() == Some(ObjectType::Tree),
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(false),
            Err(e) => return Err(Error::git(e)),
        };
        let last = segments.peek().is_none();
        if is_dir == last {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Replay the key changes between `base` and `ours` on top of `theirs`.
///
/// Keys are the unit of merging: a key changed in `ours` merges cleanly when
/// `theirs` still holds the base value or already holds our value. A key
/// that `theirs` changed to something else is a conflict, whatever the
/// content. So is a key that cannot be placed in `theirs` because a file
/// and a directory would share a path. All conflicting keys are reported
/// together.
///
/// # Errors
/// Returns [`Error::Conflict`] listing every conflicting key.
pub fn merge_keys(
    repo: &Repository,
    base: &Tree<'_>,
    ours: &Tree<'_>,
    theirs: &Tree<'_>,
) -> Result<Oid> {
    let diff = repo
        .diff_tree_to_tree(Some(base), Some(ours), None)
        .map_err(Error::git)?;

    let mut update = TreeUpdateBuilder::new();
    let mut conflicts = Vec::new();
    let mut upserted = Vec::new();

    for delta in diff.deltas() {
        let key = match delta.new_file().path().or_else(|| delta.old_file().path()) {
            Some(path) => path.to_string_lossy().replace('\\', "/"),
            None => continue,
        };

        let base_entry = entry_at_path(base, &key)?;
        let our_entry = entry_at_path(ours, &key)?;
        let their_entry = entry_at_path(theirs, &key)?;

        if their_entry == our_entry {
            continue;
        }
        if their_entry != base_entry {
            conflicts.push(key);
            continue;
        }
        match our_entry {
            Some(entry) => {
                if clashes_with_tree(theirs, &key)? {
                    conflicts.push(key);
                    continue;
                }
                update.upsert(key.as_str(), entry.oid, file_mode(entry.mode));
                upserted.push(key);
            }
            None => {
                update.remove(key.as_str());
            }
        }
    }

    if !conflicts.is_empty() {
        conflicts.sort();
        conflicts.dedup();
        return Err(Error::Conflict(conflicts));
    }

    match update.create_updated(repo, theirs) {
        Ok(oid) => Ok(oid),
        Err(e) if e.class() == ErrorClass::Tree => {
            log::debug!("merged tree could not be built: {}", e.message());
            upserted.sort();
            Err(Error::Conflict(upserted))
        }
        Err(e) => Err(Error::git(e)),
    }
}
