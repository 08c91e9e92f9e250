use std::collections::BTreeMap;

/// Staged changes waiting for the next commit.
///
/// Holds at most one value per key: staging a key again replaces the
/// previous value, and staging a removal replaces a pending write.
/// Once committed, the commit hash is recorded so a failed push can be
/// retried without committing twice.
#[derive(Debug, Clone, Default)]
pub struct PendingCommit {
    pub(crate) changes: BTreeMap<String, Option<Vec<u8>>>,
    pub(crate) message: Option<String>,
    pub(crate) commit: Option<git2::Oid>,
}

impl PendingCommit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `data` as the new value of `key`.
    pub fn write(&mut self, key: String, data: Vec<u8>) {
        self.changes.insert(key, Some(data));
    }

    /// Stage the removal of `key`.
    pub fn remove(&mut self, key: String) {
        self.changes.insert(key, None);
    }

    /// The staged value of `key`: `Some(Some(_))` for a write,
    /// `Some(None)` for a removal, `None` when the key is not staged.
    pub fn get(&self, key: &str) -> Option<Option<&[u8]>> {
        self.changes.get(key).map(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Staged keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.changes.keys().cloned().collect()
    }

    /// The commit already made from these changes, if any.
    pub fn commit_hash(&self) -> Option<String> {
        self.commit.map(|oid| oid.to_string())
    }

    /// Changes in key order, ready for a tree rebuild.
    pub(crate) fn to_changes(&self) -> Vec<(String, Option<Vec<u8>>)> {
        self.changes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn message(&self) -> String {
        let keys = self.keys();
        crate::paths::format_commit_message(&keys[..], self.message.as_deref())
    }

    pub(crate) fn clear(&mut self) {
        self.changes.clear();
        self.commit = None;
    }
}
