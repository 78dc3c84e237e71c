//! Shared test utilities for integration tests
//!
//! Tree fixtures, tree snapshots and a git helper that lets git-backed
//! tests skip themselves on machines without git.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use patchkeep::core::tree;
use patchkeep::infra::walk::{FileSet, walk_files};

/// Write `files` under `root`, creating parents.
pub fn write_tree(
    root: &Path,
    files: &[(&str, &[u8])],
)
{
    for (rel, body) in files
    {
        tree::write_file(root, rel, body).expect("write fixture file");
    }
}

/// Same as `write_tree` for text fixtures.
pub fn write_text_tree(
    root: &Path,
    files: &[(&str, &str)],
)
{
    for (rel, body) in files
    {
        tree::write_file(root, rel, body.as_bytes()).expect("write fixture file");
    }
}

/// Every file under `root` with its bytes.
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>>
{
    walk_files(root, &FileSet::all())
        .expect("walk")
        .into_iter()
        .map(|rel| {
            let bytes = std::fs::read(root.join(&rel)).expect("read");
            (rel, bytes)
        })
        .collect()
}

pub fn git_available() -> bool
{
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `repo`, panicking with its stderr on failure.
pub fn git(
    repo: &Path,
    args: &[&str],
) -> String
{
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout)
        .trim()
        .to_string()
}

/// A fresh repository with a committer identity.
pub fn init_repo(repo: &Path)
{
    git(repo, &["init", "-q"]);
    git(repo, &["config", "user.name", "Patchkeep Test"]);
    git(repo, &["config", "user.email", "test@example.com"]);
    git(repo, &["config", "commit.gpgsign", "false"]);
}

/// Stage everything and commit with `message`.
pub fn commit_all(
    repo: &Path,
    message: &str,
) -> String
{
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", message]);
    git(repo, &["rev-parse", "HEAD"])
}
