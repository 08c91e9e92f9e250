use std::path::{Path, PathBuf};

use gitkv::*;

pub fn opts(branch: &str) -> RepoOptions {
    RepoOptions {
        branch: Some(branch.into()),
        author: Some("Test".into()),
        email: Some("test@example.com".into()),
        ..Default::default()
    }
}

/// An empty bare repository standing in for the remote.
#[allow(dead_code)]
pub fn bare_remote(dir: &Path) -> PathBuf {
    let path = dir.join("remote.git");
    git2::Repository::init_bare(&path).unwrap();
    path
}

/// A bare remote whose `branch` already holds `files` in one commit.
#[allow(dead_code)]
pub fn seeded_remote(dir: &Path, branch: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let remote = bare_remote(dir);
    let mut repo = Repository::acquire(
        remote.to_str().unwrap(),
        RepoOptions {
            create: true,
            ..opts(branch)
        },
    )
    .unwrap();
    for (key, data) in files {
        repo.stage(key, data.to_vec()).unwrap();
    }
    repo.release().unwrap();
    git2::Repository::open_bare(&remote)
        .unwrap()
        .set_head(&format!("refs/heads/{}", branch))
        .unwrap();
    remote
}

/// Commit `data` under `key` to the remote from a separate working copy.
#[allow(dead_code)]
pub fn push_from_elsewhere(remote: &Path, branch: &str, key: &str, data: &[u8]) {
    let mut repo = Repository::acquire(remote.to_str().unwrap(), opts(branch)).unwrap();
    repo.stage(key, data.to_vec()).unwrap();
    let report = repo.release().unwrap().unwrap();
    assert!(report.pushed);
}

#[allow(dead_code)]
pub fn remote_read(remote: &Path, branch: &str, key: &str) -> Option<Vec<u8>> {
    let repo = git2::Repository::open_bare(remote).unwrap();
    let oid = repo.refname_to_id(&format!("refs/heads/{}", branch)).ok()?;
    let tree = repo.find_commit(oid).unwrap().tree().unwrap();
    let entry = tree.get_path(Path::new(key)).ok()?;
    let blob = repo.find_blob(entry.id()).unwrap();
    Some(blob.content().to_vec())
}

#[allow(dead_code)]
pub fn remote_tip(remote: &Path, branch: &str) -> Option<String> {
    let repo = git2::Repository::open_bare(remote).unwrap();
    repo.refname_to_id(&format!("refs/heads/{}", branch))
        .ok()
        .map(|oid| oid.to_string())
}

#[allow(dead_code)]
pub fn remote_commit_count(remote: &Path, branch: &str) -> usize {
    let repo = git2::Repository::open_bare(remote).unwrap();
    let Ok(tip) = repo.refname_to_id(&format!("refs/heads/{}", branch)) else {
        return 0;
    };
    let mut walk = repo.revwalk().unwrap();
    walk.push(tip).unwrap();
    walk.count()
}
