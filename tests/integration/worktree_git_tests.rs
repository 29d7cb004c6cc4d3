//! `WorktreeManager` against a real git repository.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use agent_foreman::orchestrator::WorktreeManager;
use agent_foreman::vcs::GitCli;
use agent_foreman::AppError;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(output.status.success(), "git {args:?} failed");
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

fn repo_with_manager() -> (tempfile::TempDir, WorktreeManager) {
    let repo = tempfile::tempdir().expect("tempdir");
    git(repo.path(), &["init", "-q", "-b", "main"]);
    git(
        repo.path(),
        &[
            "-c",
            "user.email=t@example.com",
            "-c",
            "user.name=t",
            "commit",
            "-q",
            "--allow-empty",
            "-m",
            "init",
        ],
    );
    let manager = WorktreeManager::new(
        Arc::new(GitCli::new(repo.path())),
        repo.path().join(".foreman").join("worktrees"),
        "foreman/",
    );
    (repo, manager)
}

#[tokio::test]
async fn create_checks_out_the_session_branch() {
    let (_repo, manager) = repo_with_manager();

    let record = manager.create("t1", "main").await.expect("create");

    assert_eq!(record.branch, "foreman/t1");
    assert_eq!(record.path, manager.path_for("t1"));
    assert_eq!(
        git(&record.path, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "foreman/t1"
    );
}

#[tokio::test]
async fn remove_discards_uncommitted_changes() {
    let (_repo, manager) = repo_with_manager();
    let record = manager.create("t1", "main").await.expect("create");
    std::fs::write(record.path.join("scratch.txt"), "work in progress").expect("write");

    manager.remove("t1", false).await.expect("remove");

    assert!(!record.path.exists());
}

#[tokio::test]
async fn preserving_remove_refuses_dirty_worktree() {
    let (_repo, manager) = repo_with_manager();
    let record = manager.create("t1", "main").await.expect("create");
    std::fs::write(record.path.join("scratch.txt"), "work in progress").expect("write");

    let err = manager.remove("t1", true).await.unwrap_err();

    assert!(matches!(err, AppError::Vcs(_)), "got {err:?}");
    assert!(record.path.join("scratch.txt").exists());
}

#[tokio::test]
async fn create_refuses_non_empty_path() {
    let (_repo, manager) = repo_with_manager();
    let path = manager.path_for("t1");
    std::fs::create_dir_all(&path).expect("mkdir");
    std::fs::write(path.join("keep.txt"), "mine").expect("write");

    let err = manager.create("t1", "main").await.unwrap_err();

    assert!(matches!(err, AppError::Vcs(_)), "got {err:?}");
    assert!(path.join("keep.txt").exists());
}

#[tokio::test]
async fn failed_create_leaves_no_registration() {
    let (repo, manager) = repo_with_manager();

    let err = manager.create("t1", "no-such-branch").await.unwrap_err();

    assert!(matches!(err, AppError::Vcs(_)), "got {err:?}");
    assert!(!manager.path_for("t1").exists());
    let listed = git(repo.path(), &["worktree", "list", "--porcelain"]);
    assert!(!listed.contains("worktrees/t1"), "unexpected worktree: {listed}");

    manager.create("t1", "main").await.expect("retry succeeds");
}

#[tokio::test]
async fn removing_a_missing_worktree_is_a_no_op() {
    let (_repo, manager) = repo_with_manager();

    manager.remove("t1", false).await.expect("no-op");
    manager.remove("t1", true).await.expect("no-op");
}

#[tokio::test]
async fn recreate_reuses_the_existing_session_branch() {
    let (repo, manager) = repo_with_manager();
    let record = manager.create("t1", "main").await.expect("create");
    std::fs::write(record.path.join("notes.md"), "kept").expect("write");
    git(&record.path, &["add", "notes.md"]);
    git(
        &record.path,
        &[
            "-c",
            "user.email=t@example.com",
            "-c",
            "user.name=t",
            "commit",
            "-q",
            "-m",
            "session work",
        ],
    );
    manager.remove("t1", true).await.expect("remove");
    git(repo.path(), &["branch", "release", "main"]);

    let record = manager.create("t1", "release").await.expect("recreate");

    assert_eq!(
        git(&record.path, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "foreman/t1"
    );
    assert!(record.path.join("notes.md").exists());
    assert_eq!(git(&record.path, &["log", "-1", "--format=%s"]), "session work");
}
