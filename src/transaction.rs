//! Commit-and-push with a single fetch/reconcile/retry on rejection.
//!
//! A push sequence makes at most [`MAX_PUSH_ATTEMPTS`] attempts:
//!
//! 1. commit every staged key as one commit on the local tip;
//! 2. push (attempt 1);
//! 3. on a non-fast-forward rejection only: fetch the remote branch, rebase
//!    the commit onto the new remote tip and push again (attempt 2).
//!
//! Any failure after that is terminal and returned as [`Error::Push`]. The
//! pending commit is kept so the caller can inspect it or retry by hand.

use crate::batch::PendingCommit;
use crate::error::{Error, Result};
use crate::store::{ObjectStore, PushStatus};
use crate::types::TransactionReport;

/// Upper bound on push attempts in one sequence.
pub const MAX_PUSH_ATTEMPTS: u8 = 2;

/// Commit and push everything in `pending`.
///
/// Returns `Ok(None)` when nothing is staged. On success the pending commit
/// is cleared. On failure it keeps the staged changes and the local commit.
///
/// # Errors
/// [`Error::Push`] once the push sequence has failed; its cause tells
/// rejection, conflict and transport failures apart. Errors while creating
/// the local commit are returned unchanged.
pub fn finalize(
    store: &mut dyn ObjectStore,
    pending: &mut PendingCommit,
) -> Result<Option<TransactionReport>> {
    if pending.is_empty() {
        return Ok(None);
    }

    let keys = pending.keys();
    let local = match pending.commit {
        Some(oid) => {
            log::info!("retrying push of existing commit {}", oid);
            oid
        }
        None => match store.commit(&pending.to_changes(), &pending.message())? {
            Some(oid) => {
                pending.commit = Some(oid);
                oid
            }
            None => {
                log::info!("staged content matches '{}'; nothing to push", store.branch());
                pending.clear();
                return Ok(Some(TransactionReport {
                    commit_hash: None,
                    keys,
                    attempts: 0,
                    reconciled: false,
                    pushed: false,
                }));
            }
        },
    };

    let branch = store.branch().to_string();
    let workdir = store.workdir().to_path_buf();
    let fail = |attempts: u8, cause: Error| {
        log::error!("push of '{}' failed after {} attempt(s): {}", branch, attempts, cause);
        Error::push(&branch, attempts, &workdir, cause)
    };
    let report = |commit: git2::Oid, attempts: u8, reconciled: bool, pushed: bool| {
        TransactionReport {
            commit_hash: Some(commit.to_string()),
            keys: keys.clone(),
            attempts,
            reconciled,
            pushed,
        }
    };

    let reason = match store.push() {
        Ok(PushStatus::Pushed) => {
            pending.clear();
            return Ok(Some(report(local, 1, false, true)));
        }
        Ok(PushStatus::LocalOnly) => {
            log::debug!("no remote for '{}'; commit {} stays local", branch, local);
            pending.clear();
            return Ok(Some(report(local, 0, false, false)));
        }
        Ok(PushStatus::Rejected { reason }) => reason,
        Err(e) => return Err(fail(1, e)),
    };
    log::warn!(
        "push of '{}' rejected ({}); fetching and retrying once",
        branch,
        reason
    );

    let remote_tip = store.fetch().map_err(|e| fail(1, e))?;
    let rebased = match remote_tip {
        Some(tip) => store.reconcile(local, tip).map_err(|e| fail(1, e))?,
        None => local,
    };
    pending.commit = Some(rebased);

    match store.push() {
        Ok(PushStatus::Pushed) => {
            pending.clear();
            Ok(Some(report(rebased, MAX_PUSH_ATTEMPTS, rebased != local, true)))
        }
        Ok(PushStatus::LocalOnly) => {
            pending.clear();
            Ok(Some(report(rebased, MAX_PUSH_ATTEMPTS, rebased != local, false)))
        }
        Ok(PushStatus::Rejected { reason }) => {
            Err(fail(MAX_PUSH_ATTEMPTS, Error::PushRejected(reason)))
        }
        Err(e) => Err(fail(MAX_PUSH_ATTEMPTS, e)),
    }
}
