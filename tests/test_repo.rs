mod common;

use std::io::Write;

use gitkv::*;

// ---------------------------------------------------------------------------
// Round trips through a remote
// ---------------------------------------------------------------------------

#[test]
fn write_then_read_through_remote() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("seed.txt", b"seed")]);
    let url = remote.to_str().unwrap();

    gitkv::open(url, "conf/app.toml", Mode::Write, common::opts("main"), |f| {
        Ok(f.write_all(b"port = 8080\n")?)
    })
    .unwrap();

    assert_eq!(
        common::remote_read(&remote, "main", "conf/app.toml").unwrap(),
        b"port = 8080\n"
    );
    let data = gitkv::open(url, "conf/app.toml", Mode::Read, common::opts("main"), |f| {
        f.read_all()
    })
    .unwrap();
    assert_eq!(data, b"port = 8080\n");
}

#[test]
fn read_only_session_pushes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);
    let tip = common::remote_tip(&remote, "main");

    let data = gitkv::open(remote.to_str().unwrap(), "a.txt", Mode::Read, common::opts("main"), |f| {
        f.read_all()
    })
    .unwrap();
    assert_eq!(data, b"a");
    assert_eq!(common::remote_tip(&remote, "main"), tip);
}

#[test]
fn failed_closure_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);
    let tip = common::remote_tip(&remote, "main");

    let err = gitkv::open(remote.to_str().unwrap(), "a.txt", Mode::Write, common::opts("main"), |f| {
        f.write_all(b"half")?;
        Err::<(), _>(Error::permission("caller gave up"))
    })
    .unwrap_err();
    assert!(matches!(err, Error::Permission(_)));
    assert_eq!(common::remote_tip(&remote, "main"), tip);
    assert_eq!(common::remote_read(&remote, "main", "a.txt").unwrap(), b"a");
}

#[test]
fn release_reports_single_push() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);

    let mut repo = Repository::acquire(remote.to_str().unwrap(), common::opts("main")).unwrap();
    repo.with_file("b.txt", Mode::Write, |f| f.write_bytes(b"b")).unwrap();
    let report = repo.release().unwrap().unwrap();

    assert!(report.pushed);
    assert_eq!(report.attempts, 1);
    assert!(!report.reconciled);
    assert_eq!(report.keys, vec!["b.txt".to_string()]);
    assert_eq!(common::remote_tip(&remote, "main"), report.commit_hash);
}

#[test]
fn unchanged_content_makes_no_commit() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"same")]);
    let tip = common::remote_tip(&remote, "main");

    let mut repo = Repository::acquire(remote.to_str().unwrap(), common::opts("main")).unwrap();
    repo.stage("a.txt", b"same".to_vec()).unwrap();
    let report = repo.release().unwrap().unwrap();

    assert_eq!(report.commit_hash, None);
    assert!(!report.pushed);
    assert_eq!(common::remote_tip(&remote, "main"), tip);
}

#[test]
fn remove_key_is_pushed() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a"), ("b.txt", b"b")]);

    let mut repo = Repository::acquire(remote.to_str().unwrap(), common::opts("main")).unwrap();
    repo.remove("a.txt").unwrap();
    repo.release().unwrap();

    assert_eq!(common::remote_read(&remote, "main", "a.txt"), None);
    assert_eq!(common::remote_read(&remote, "main", "b.txt").unwrap(), b"b");
}

#[test]
fn remove_missing_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);

    let mut repo = Repository::acquire(remote.to_str().unwrap(), common::opts("main")).unwrap();
    assert!(matches!(repo.remove("nope.txt"), Err(Error::KeyNotFound(_))));
}

#[test]
fn create_starts_missing_branch() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);
    let opts = RepoOptions {
        create: true,
        ..common::opts("feature")
    };

    let mut repo = Repository::acquire(remote.to_str().unwrap(), opts).unwrap();
    assert_eq!(repo.head().unwrap(), None);
    assert!(!repo.exists("a.txt").unwrap());
    repo.stage("f.txt", b"f".to_vec()).unwrap();
    repo.release().unwrap();

    assert_eq!(common::remote_read(&remote, "feature", "f.txt").unwrap(), b"f");
    assert_eq!(common::remote_commit_count(&remote, "feature"), 1);
    assert_eq!(common::remote_read(&remote, "main", "f.txt"), None);
}

// ---------------------------------------------------------------------------
// Working copies
// ---------------------------------------------------------------------------

#[test]
fn ephemeral_workdir_removed_on_release() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);

    let mut repo = Repository::acquire(remote.to_str().unwrap(), common::opts("main")).unwrap();
    let workdir = repo.workdir().unwrap().to_path_buf();
    assert!(workdir.join("a.txt").exists());
    repo.stage("b.txt", b"b".to_vec()).unwrap();
    repo.release().unwrap();

    assert!(!workdir.exists());
}

#[test]
fn supplied_workdir_kept_on_release() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);
    let wc = dir.path().join("wc");

    let mut repo = Repository::acquire(
        remote.to_str().unwrap(),
        RepoOptions {
            workdir: Some(wc.clone()),
            ..common::opts("main")
        },
    )
    .unwrap();
    repo.stage("b.txt", b"b".to_vec()).unwrap();
    repo.release().unwrap();

    assert_eq!(std::fs::read(wc.join("a.txt")).unwrap(), b"a");
    assert_eq!(std::fs::read(wc.join("b.txt")).unwrap(), b"b");
}

#[test]
fn occupied_workdir_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);
    let wc = dir.path().join("wc");
    std::fs::create_dir_all(&wc).unwrap();
    std::fs::write(wc.join("junk"), b"x").unwrap();

    let err = Repository::acquire(
        remote.to_str().unwrap(),
        RepoOptions {
            workdir: Some(wc),
            ..common::opts("main")
        },
    )
    .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Acquisition));
}

#[test]
fn local_repository_worked_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local");
    let opts = RepoOptions {
        create: true,
        ..common::opts("main")
    };

    let mut repo = Repository::acquire(path.to_str().unwrap(), opts).unwrap();
    repo.with_file("notes/today.md", Mode::Write, |f| f.write_bytes(b"# today"))
        .unwrap();
    let report = repo.release().unwrap().unwrap();
    assert!(!report.pushed);
    assert_eq!(report.attempts, 0);
    assert!(report.commit_hash.is_some());
    assert_eq!(std::fs::read(path.join("notes/today.md")).unwrap(), b"# today");

    let repo = Repository::acquire(path.to_str().unwrap(), common::opts("main")).unwrap();
    assert_eq!(repo.read("notes/today.md").unwrap(), b"# today");
    assert_eq!(repo.head().unwrap(), report.commit_hash);
}

#[test]
fn local_working_copy_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local");
    let opts = RepoOptions {
        create: true,
        ..common::opts("main")
    };

    let mut first = Repository::open_local(&path, opts.clone()).unwrap();
    let err = Repository::open_local(&path, opts.clone()).unwrap_err();
    assert!(matches!(err, Error::Acquisition { .. }));

    first.release().unwrap();
    let second = Repository::open_local(&path, opts);
    assert!(second.is_ok());
}

#[test]
fn temporary_repository_vanishes() {
    let mut repo = Repository::temporary(RepoOptions::default()).unwrap();
    let workdir = repo.workdir().unwrap().to_path_buf();
    assert_eq!(repo.branch().unwrap(), DEFAULT_BRANCH);

    repo.stage("k", b"v".to_vec()).unwrap();
    let report = repo.finalize().unwrap().unwrap();
    assert!(!report.pushed);
    assert_eq!(repo.read("k").unwrap(), b"v");

    repo.release().unwrap();
    assert!(!workdir.exists());
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[test]
fn release_is_idempotent() {
    let mut repo = Repository::temporary(RepoOptions::default()).unwrap();
    repo.stage("k", b"v".to_vec()).unwrap();
    assert!(repo.release().unwrap().is_some());
    assert!(repo.is_released());
    assert_eq!(repo.release().unwrap(), None);
}

#[test]
fn released_handle_refuses_work() {
    let mut repo = Repository::temporary(RepoOptions::default()).unwrap();
    repo.release().unwrap();

    assert!(matches!(repo.read("k"), Err(Error::Released)));
    assert!(matches!(repo.stage("k", vec![]), Err(Error::Released)));
    assert!(matches!(repo.open("k", Mode::Write), Err(Error::Released)));
    assert!(matches!(repo.finalize(), Err(Error::Released)));
}

#[test]
fn drop_releases_and_pushes() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);
    {
        let mut repo = Repository::acquire(remote.to_str().unwrap(), common::opts("main")).unwrap();
        repo.stage("dropped.txt", b"d".to_vec()).unwrap();
    }
    assert_eq!(common::remote_read(&remote, "main", "dropped.txt").unwrap(), b"d");
}

// ---------------------------------------------------------------------------
// Acquisition failures
// ---------------------------------------------------------------------------

#[test]
fn missing_branch_without_create() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::seeded_remote(dir.path(), "main", &[("a.txt", b"a")]);

    let err = Repository::acquire(remote.to_str().unwrap(), common::opts("nope")).unwrap_err();
    assert!(matches!(err, Error::Acquisition { .. }));
    assert!(err.to_string().contains("nope"));
}

#[test]
fn unreachable_remote() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.git");
    let err = Repository::acquire(missing.to_str().unwrap(), common::opts("main")).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Acquisition));
}

#[test]
fn plain_directory_is_not_a_repository() {
    let dir = tempfile::tempdir().unwrap();
    let err = Repository::acquire(dir.path().to_str().unwrap(), common::opts("main")).unwrap_err();
    assert!(matches!(err, Error::Acquisition { .. }));
}

#[test]
fn invalid_branch_name_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let remote = common::bare_remote(dir.path());
    let err = Repository::acquire(remote.to_str().unwrap(), common::opts("bad..name")).unwrap_err();
    assert!(matches!(err, Error::InvalidRefName(_)));
}

#[test]
fn invalid_keys_rejected() {
    let mut repo = Repository::temporary(RepoOptions::default()).unwrap();
    assert!(matches!(repo.stage("../escape", vec![]), Err(Error::InvalidPath(_))));
    assert!(matches!(repo.stage(".git/config", vec![]), Err(Error::InvalidPath(_))));
    assert!(matches!(repo.open("", Mode::Write), Err(Error::InvalidPath(_))));
}
