//! Integration tests driving the sync engine against an in-memory remote
//! and a real git checkout.

use leafsync_engine::{
    AlwaysAllow, GitRepository, MockRemote, RemoteCall, SyncConfig, SyncEngine, SyncError,
    SyncState, SESSION_DIR_NAME,
};
use leafsync_protocol::Author;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn alice() -> Author {
    Author::new("u1", "Alice", "Smith", "alice@example.com")
}

fn bob() -> Author {
    Author::new("u2", "Bob", "Jones", "bob@example.com")
}

fn config() -> SyncConfig {
    SyncConfig::new().with_rate_intervals(Duration::ZERO, Duration::ZERO)
}

/// Remote with a single-author history up to version 2.
fn seeded_remote() -> MockRemote {
    let remote = MockRemote::new();
    remote.edit(&alice(), "main.tex", "\\documentclass{article}\n");
    remote.edit(&alice(), "chapters/intro.tex", "Once upon a time.\n");
    remote.seal();
    remote
}

fn init(remote: &MockRemote, config: SyncConfig) -> (TempDir, SyncEngine<&MockRemote>) {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = SyncEngine::new(config, remote, GitRepository::new(dir.path()));
    engine.init(false).unwrap();
    let repo = engine.repo();
    repo.run(&["config", "user.name", "Local User"]).unwrap();
    repo.run(&["config", "user.email", "local@example.com"]).unwrap();
    (dir, engine)
}

fn commit_all(repo: &GitRepository, message: &str) {
    repo.run(&["add", "-A", "."]).unwrap();
    repo.run(&["commit", "-q", "-m", message]).unwrap();
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

fn log(repo: &GitRepository, branch: &str) -> Vec<String> {
    repo.run(&["log", "--reverse", "--pretty=%s|%an|%ae", branch])
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn init_replays_history_and_sets_up_branches() {
    let remote = seeded_remote();
    remote.add_binary(&bob(), "figures/plot.png", &[0x89, b'P', b'N', b'G', 0x00]);
    remote.seal();

    let (dir, engine) = init(&remote, config());
    let repo = engine.repo();

    assert_eq!(repo.current_branch().unwrap(), "work");
    assert_eq!(read(dir.path(), "main.tex"), "\\documentclass{article}\n");
    assert_eq!(read(dir.path(), "chapters/intro.tex"), "Once upon a time.\n");
    assert_eq!(
        fs::read(dir.path().join("figures/plot.png")).unwrap(),
        vec![0x89, b'P', b'N', b'G', 0x00]
    );
    assert_eq!(
        log(repo, "mirror"),
        vec![
            "0->2|Smith, Alice|alice@example.com",
            "2->3|Jones, Bob|bob@example.com",
        ]
    );
    assert_eq!(repo.recorded_version("mirror").unwrap(), 3);
    assert_eq!(
        repo.resolve_ref("fork-point").unwrap(),
        repo.resolve_ref("mirror").unwrap()
    );
    assert_eq!(
        repo.resolve_ref("work").unwrap(),
        repo.resolve_ref("mirror").unwrap()
    );
    assert_eq!(engine.state(), SyncState::Idle);
}

#[test]
fn init_refuses_existing_repository_unless_forced() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    assert!(matches!(
        engine.init(false),
        Err(SyncError::AlreadyInitialized(_))
    ));

    let mut fresh = SyncEngine::new(config(), &remote, GitRepository::new(dir.path()));
    match fresh.init(true) {
        Err(SyncError::DirtyWorkingTree(msg)) => assert!(msg.contains("main.tex")),
        other => panic!("expected DirtyWorkingTree, got {:?}", other),
    }

    let other = tempfile::tempdir().unwrap();
    fs::create_dir(other.path().join(SESSION_DIR_NAME)).unwrap();
    let mut engine = SyncEngine::new(config(), &remote, GitRepository::new(other.path()));
    engine.init(false).unwrap();
    assert_eq!(read(other.path(), "main.tex"), "\\documentclass{article}\n");
}

#[test]
fn init_against_empty_history_fails() {
    let remote = MockRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let mut engine = SyncEngine::new(config(), &remote, GitRepository::new(dir.path()));
    assert!(matches!(engine.init(false), Err(SyncError::EmptyHistory)));
    assert!(!dir.path().join(".git").exists());
}

#[test]
fn multi_author_revision_splits_into_single_author_commits() {
    let remote = MockRemote::new();
    for i in 0..10 {
        remote.edit(&alice(), "main.tex", &format!("draft {}\n", i));
    }
    remote.seal();
    let (dir, mut engine) = init(&remote, config());
    assert_eq!(engine.repo().recorded_version("mirror").unwrap(), 10);

    remote.edit(&alice(), "main.tex", "draft 10\n");
    remote.edit(&bob(), "refs.bib", "@book{knuth}\n");
    let revision = remote.seal().unwrap();
    assert_eq!((revision.from_v, revision.to_v), (10, 12));
    assert!(revision.is_multi_author());

    let report = engine.pull().unwrap();
    assert_eq!((report.from_version, report.to_version), (10, 12));
    assert_eq!(report.commits.len(), 2);

    let history = log(engine.repo(), "mirror");
    assert_eq!(
        &history[1..],
        &[
            "10->11|Smith, Alice|alice@example.com".to_string(),
            "11->12|Jones, Bob|bob@example.com".to_string(),
        ]
    );
    assert_eq!(read(dir.path(), "main.tex"), "draft 10\n");
    assert_eq!(read(dir.path(), "refs.bib"), "@book{knuth}\n");
}

#[test]
fn pull_rebases_local_commits_onto_remote_changes() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());

    fs::write(dir.path().join("notes.tex"), "local notes\n").unwrap();
    commit_all(engine.repo(), "add notes");

    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.seal();

    let report = engine.pull().unwrap();
    assert_eq!(report.to_version, 3);
    let repo = engine.repo();
    assert_eq!(repo.current_branch().unwrap(), "work");
    assert_eq!(read(dir.path(), "main.tex"), "\\documentclass{book}\n");
    assert_eq!(read(dir.path(), "notes.tex"), "local notes\n");
    assert_eq!(repo.commits_between("mirror", "work").unwrap(), 1);
    assert_eq!(
        repo.resolve_ref("fork-point").unwrap(),
        repo.resolve_ref("mirror").unwrap()
    );
}

#[test]
fn long_lived_engine_sees_each_new_revision() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());

    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.seal();
    assert_eq!(engine.pull().unwrap().to_version, 3);

    remote.edit(&alice(), "refs.bib", "@book{knuth}\n");
    remote.seal();
    let report = engine.pull().unwrap();
    assert_eq!((report.from_version, report.to_version), (3, 4));
    assert_eq!(read(dir.path(), "refs.bib"), "@book{knuth}\n");
}

#[test]
fn dry_run_pull_leaves_checkout_untouched() {
    let remote = seeded_remote();
    let (dir, engine) = init(&remote, config());
    let tip = engine.repo().resolve_ref("mirror").unwrap();
    fs::write(dir.path().join("scratch.tex"), "wip\n").unwrap();
    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.seal();

    let mut engine = SyncEngine::new(
        config().with_dry_run(true),
        &remote,
        GitRepository::new(dir.path()),
    );
    let report = engine.pull().unwrap();
    assert!(report.dry_run);
    assert_eq!((report.from_version, report.to_version), (2, 3));
    assert!(report.commits.is_empty());

    let repo = engine.repo();
    assert_eq!(repo.resolve_ref("mirror").unwrap(), tip);
    assert!(repo.run(&["stash", "list"]).unwrap().is_empty());
    assert_eq!(read(dir.path(), "scratch.tex"), "wip\n");
    assert_eq!(read(dir.path(), "main.tex"), "\\documentclass{article}\n");
}

#[test]
fn second_pull_is_a_no_op() {
    let remote = seeded_remote();
    let (_dir, mut engine) = init(&remote, config());
    let tip = engine.repo().resolve_ref("mirror").unwrap();

    let report = engine.pull().unwrap();
    assert!(report.is_up_to_date());
    assert_eq!(engine.repo().resolve_ref("mirror").unwrap(), tip);
}

#[test]
fn binary_change_falls_back_to_snapshot() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    let archives = remote.archive_requests();

    remote.add_binary(&alice(), "figures/plot.png", &[0xff, 0x00, 0xfe]);
    remote.remove(&alice(), "chapters/intro.tex");
    remote.seal();
    engine.pull().unwrap();

    assert_eq!(remote.archive_requests(), archives + 1);
    assert_eq!(
        fs::read(dir.path().join("figures/plot.png")).unwrap(),
        vec![0xff, 0x00, 0xfe]
    );
    assert!(!dir.path().join("chapters/intro.tex").exists());
    assert!(!dir.path().join("chapters").exists());
}

#[test]
fn rebase_conflict_leaves_fork_point_in_place() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    let fork = engine.repo().resolve_ref("fork-point").unwrap();

    fs::write(dir.path().join("main.tex"), "\\documentclass{report}\n").unwrap();
    commit_all(engine.repo(), "switch to report");
    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.seal();

    match engine.pull() {
        Err(SyncError::RebaseConflict { branch, onto, .. }) => {
            assert_eq!(branch, "work");
            assert_eq!(onto, "mirror");
        }
        other => panic!("expected RebaseConflict, got {:?}", other),
    }
    assert_eq!(engine.state(), SyncState::Failed);
    assert_eq!(engine.repo().resolve_ref("fork-point").unwrap(), fork);
    assert_eq!(engine.repo().recorded_version("mirror").unwrap(), 3);
    assert!(matches!(engine.pull(), Err(SyncError::InvariantViolation(_))));
}

#[test]
fn hand_resolved_conflict_moves_fork_point_before_push() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    fs::write(dir.path().join("main.tex"), "\\documentclass{report}\n").unwrap();
    commit_all(engine.repo(), "switch to report");
    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.edit(&bob(), "bob.tex", "from bob\n");
    remote.seal();
    assert!(matches!(
        engine.pull(),
        Err(SyncError::RebaseConflict { .. })
    ));

    let mut fresh = SyncEngine::new(config(), &remote, GitRepository::new(dir.path()));
    assert!(matches!(
        fresh.push(),
        Err(SyncError::InvariantViolation(_))
    ));
    assert!(remote.calls().is_empty());

    fs::write(dir.path().join("main.tex"), "\\documentclass{memoir}\n").unwrap();
    engine.repo().run(&["add", "main.tex"]).unwrap();
    let status = Command::new("git")
        .arg("-C")
        .arg(dir.path())
        .args(["rebase", "--continue"])
        .env("GIT_EDITOR", "true")
        .status()
        .unwrap();
    assert!(status.success());

    let mut engine = SyncEngine::new(config(), &remote, GitRepository::new(dir.path()));
    assert!(engine.pull().unwrap().is_up_to_date());
    let repo = engine.repo();
    assert_eq!(
        repo.resolve_ref("fork-point").unwrap(),
        repo.resolve_ref("mirror").unwrap()
    );

    let report = engine.push().unwrap();
    assert_eq!(report.uploaded, vec!["main.tex"]);
    assert_eq!(remote.calls(), vec![RemoteCall::Upload("main.tex".into())]);
    assert!(report.converged);
    assert_eq!(
        remote.file("main.tex").unwrap(),
        b"\\documentclass{memoir}\n".to_vec()
    );
}

#[test]
fn dirty_tree_is_stashed_or_refused() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config().with_stash(false));
    fs::write(dir.path().join("scratch.tex"), "wip\n").unwrap();
    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.seal();

    assert!(matches!(
        engine.pull(),
        Err(SyncError::DirtyWorkingTree(_))
    ));
    assert_eq!(engine.repo().recorded_version("mirror").unwrap(), 2);

    let mut engine = SyncEngine::new(config(), &remote, GitRepository::new(dir.path()));
    engine.pull().unwrap();
    assert_eq!(read(dir.path(), "scratch.tex"), "wip\n");
    assert_eq!(read(dir.path(), "main.tex"), "\\documentclass{book}\n");
    assert_eq!(engine.repo().current_branch().unwrap(), "work");
}

#[test]
fn push_rename_sends_delete_then_upload() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    engine
        .repo()
        .run(&["mv", "chapters/intro.tex", "chapters/prologue.tex"])
        .unwrap();
    commit_all(engine.repo(), "rename intro");

    let report = engine.push().unwrap();
    assert_eq!(
        remote.calls(),
        vec![
            RemoteCall::Delete("chapters/intro.tex".into()),
            RemoteCall::Upload("chapters/prologue.tex".into()),
        ]
    );
    assert_eq!(report.deleted, vec!["chapters/intro.tex"]);
    assert_eq!(report.uploaded, vec!["chapters/prologue.tex"]);
    assert!(report.converged);
    assert_eq!(report.to_version, remote.version());
    assert_eq!(report.tag.as_deref(), Some("v4"));

    let repo = engine.repo();
    assert_eq!(repo.recorded_version("mirror").unwrap(), 4);
    assert!(repo.trees_identical("work", "mirror").unwrap());
    assert_eq!(
        repo.resolve_ref("fork-point").unwrap(),
        repo.resolve_ref("mirror").unwrap()
    );
    assert!(repo.tag_exists("v4").unwrap());
    assert_eq!(repo.current_branch().unwrap(), "work");
    assert_eq!(read(dir.path(), "chapters/prologue.tex"), "Once upon a time.\n");
    assert_eq!(
        remote.file("chapters/prologue.tex").unwrap(),
        b"Once upon a time.\n".to_vec()
    );
}

#[test]
fn push_creates_missing_folders_parent_first() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    fs::create_dir_all(dir.path().join("appendix/tables")).unwrap();
    fs::write(dir.path().join("appendix/tables/results.tex"), "1 & 2\n").unwrap();
    commit_all(engine.repo(), "add results");

    engine.push().unwrap();
    assert_eq!(
        remote.calls(),
        vec![
            RemoteCall::CreateFolder("appendix".into()),
            RemoteCall::CreateFolder("appendix/tables".into()),
            RemoteCall::Upload("appendix/tables/results.tex".into()),
        ]
    );
    assert!(engine.repo().trees_identical("work", "mirror").unwrap());
}

#[test]
fn push_with_nothing_new_touches_nothing() {
    let remote = seeded_remote();
    let (_dir, mut engine) = init(&remote, config());
    let report = engine.push().unwrap();
    assert!(report.nothing_to_push);
    assert!(remote.calls().is_empty());
    assert_eq!(report.to_string(), "nothing to push");
}

#[test]
fn push_refuses_when_remote_is_ahead() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    fs::write(dir.path().join("notes.tex"), "local\n").unwrap();
    commit_all(engine.repo(), "notes");
    remote.edit(&bob(), "main.tex", "\\documentclass{book}\n");
    remote.seal();

    match engine.push() {
        Err(SyncError::RemoteAheadOfLocal { local, remote: latest }) => {
            assert_eq!((local, latest), (2, 3));
        }
        other => panic!("expected RemoteAheadOfLocal, got {:?}", other),
    }
    assert!(remote.calls().is_empty());
}

#[test]
fn dry_run_push_reports_without_calling_remote() {
    let remote = seeded_remote();
    let (dir, engine) = init(&remote, config());
    fs::write(dir.path().join("main.tex"), "\\documentclass{book}\n").unwrap();
    fs::remove_file(dir.path().join("chapters/intro.tex")).unwrap();
    commit_all(engine.repo(), "edits");

    let mut engine = SyncEngine::new(
        config().with_dry_run(true),
        &remote,
        GitRepository::new(dir.path()),
    );
    let report = engine.push().unwrap();
    assert!(report.dry_run);
    assert_eq!(report.uploaded, vec!["main.tex"]);
    assert_eq!(report.deleted, vec!["chapters/intro.tex"]);
    assert!(remote.calls().is_empty());
    assert_eq!(remote.version(), 2);
    assert!(report.tag.is_none());
}

#[test]
fn prune_deletes_empty_remote_folders_only_when_confirmed() {
    let remote = seeded_remote();
    remote.add_folder("drafts/old");
    let (_dir, mut engine) = init(&remote, config().with_prune(true));

    let report = engine.push().unwrap();
    assert_eq!(report.skipped_folder_deletes, vec!["drafts"]);
    assert!(remote.calls().is_empty());

    let (_other, engine) = init(&remote, config().with_prune(true));
    let mut engine = engine.with_confirm(AlwaysAllow);
    let report = engine.push().unwrap();
    assert_eq!(report.deleted, vec!["drafts"]);
    assert_eq!(remote.calls(), vec![RemoteCall::Delete("drafts".into())]);
    assert_eq!(remote.folders(), vec!["chapters"]);
    assert_eq!(remote.version(), 2);
}

#[test]
fn pull_prune_removes_local_folders_missing_remotely() {
    let remote = seeded_remote();
    remote.add_folder("figures");
    let (dir, mut engine) = init(&remote, config().with_prune(true));
    fs::create_dir_all(dir.path().join("figures")).unwrap();
    fs::create_dir_all(dir.path().join("scratch/empty")).unwrap();

    let report = engine.pull().unwrap();
    assert_eq!(report.pruned_dirs, vec!["scratch/empty", "scratch"]);
    assert!(dir.path().join("figures").exists());
    assert!(!dir.path().join("scratch").exists());
}

#[test]
fn missing_fork_point_is_corruption() {
    let remote = seeded_remote();
    let (_dir, mut engine) = init(&remote, config());
    engine.repo().run(&["tag", "-d", "fork-point"]).unwrap();
    assert!(matches!(
        engine.pull(),
        Err(SyncError::RepositoryCorrupted(_))
    ));
}

#[test]
fn sync_pulls_then_pushes() {
    let remote = seeded_remote();
    let (dir, mut engine) = init(&remote, config());
    fs::write(dir.path().join("notes.tex"), "local\n").unwrap();
    commit_all(engine.repo(), "notes");
    remote.edit(&bob(), "refs.bib", "@book{knuth}\n");
    remote.seal();

    let report = engine.sync().unwrap();
    assert_eq!(report.pull.to_version, 3);
    assert_eq!(report.push.uploaded, vec!["notes.tex"]);
    assert_eq!(report.push.to_version, 4);
    assert_eq!(remote.file("notes.tex").unwrap(), b"local\n".to_vec());
    assert!(engine.repo().trees_identical("work", "mirror").unwrap());
}
