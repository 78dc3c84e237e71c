//! Git plumbing through the `git` executable
//!
//! Every call goes through [`ToolRunner`] so it is bounded by the configured
//! timeout, and a nonzero exit becomes `RegenError::Tool` carrying the
//! captured streams. Only porcelain-stable plumbing commands are used:
//! `ls-tree -z`, `cat-file`, `rev-parse --verify` and `log --format`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, trace};

use crate::core::error::{RegenError, RegenResult};
use crate::core::tree::{self, TreeHandle};
use crate::infra::process::{ToolOutput, ToolRunner};
use crate::infra::walk::FileSet;

const GIT: &str = "git";

/// One regular file of a committed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub blob: String,
}

/// A commit carrying an origin label trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledCommit {
    pub commit: String,
    pub value: String,
}

/// Git command runner bound to one repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
    runner: ToolRunner,
}

impl GitCli {
    /// Bind to `repo`, failing with a backend error if it is not a work tree.
    pub fn open(repo: &Path, timeout: Duration) -> RegenResult<Self> {
        detect_git_executable()?;
        let runner = ToolRunner::new(repo, timeout)
            .with_env("GIT_TERMINAL_PROMPT", "0")
            .with_env("LC_ALL", "C");
        let git = Self {
            repo: repo.to_path_buf(),
            runner,
        };

        let out = git.raw(&["rev-parse", "--is-inside-work-tree"])?;
        if !out.success() || out.stdout_lossy().trim() != "true" {
            return Err(RegenError::backend(
                "git",
                format!("{} is not a git work tree", repo.display()),
            ));
        }
        Ok(git)
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Run without interpreting the exit status.
    fn raw(&self, args: &[&str]) -> RegenResult<ToolOutput> {
        self.raw_with_stdin(args, None)
    }

    fn raw_with_stdin(&self, args: &[&str], stdin: Option<&[u8]>) -> RegenResult<ToolOutput> {
        self.runner
            .run_with_stdin(GIT, args, stdin)
            .map_err(|e| RegenError::backend_with("git", format!("cannot run git {}", args.join(" ")), e))
    }

    /// Run and require success.
    fn run(&self, args: &[&str]) -> RegenResult<ToolOutput> {
        let out = self.raw(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(RegenError::tool(&out))
        }
    }

    fn stdout(&self, args: &[&str]) -> RegenResult<String> {
        Ok(self.run(args)?.stdout_lossy().trim().to_string())
    }

    /// Full commit id for `rev`, or `None` when it does not name a commit.
    pub fn resolve_commit(&self, rev: &str) -> RegenResult<Option<String>> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.raw(&["rev-parse", "--verify", "--quiet", &spec])?;
        match out.status {
            Some(0) => Ok(Some(out.stdout_lossy().trim().to_string())),
            Some(1) if !out.timed_out => Ok(None),
            _ => Err(RegenError::tool(&out)),
        }
    }

    /// Resolve or fail with a user-facing error.
    pub fn require_commit(&self, rev: &str) -> RegenResult<String> {
        self.resolve_commit(rev)?.ok_or_else(|| {
            RegenError::unresolvable(
                format!("git revision `{rev}`"),
                format!("check that `{rev}` exists in {}", self.repo.display()),
            )
        })
    }

    pub fn head(&self) -> RegenResult<Option<String>> {
        self.resolve_commit("HEAD")
    }

    /// Paths of the regular files `rev` tracks that `files` selects.
    pub fn tracked(&self, rev: &str, files: &FileSet) -> RegenResult<Vec<String>> {
        Ok(self
            .ls_tree(rev)?
            .into_iter()
            .map(|e| e.path)
            .filter(|p| files.matches(p))
            .collect())
    }

    /// Regular files (no symlinks or submodules) of `rev`, sorted.
    pub fn ls_tree(&self, rev: &str) -> RegenResult<Vec<TreeEntry>> {
        let out = self.run(&["ls-tree", "-r", "-z", "--full-tree", rev])?;
        let mut entries = parse_ls_tree(&out.stdout);
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    pub fn cat_blob(&self, blob: &str) -> RegenResult<Vec<u8>> {
        Ok(self.run(&["cat-file", "blob", blob])?.stdout)
    }

    /// True when `rev:path` names an object.
    pub fn exists(&self, rev: &str, path: &str) -> RegenResult<bool> {
        let spec = format!("{rev}:{path}");
        let out = self.raw(&["cat-file", "-e", &spec])?;
        if out.timed_out {
            return Err(RegenError::tool(&out));
        }
        Ok(out.success())
    }

    /// Content of `path` at `rev`, `None` if absent.
    pub fn read_file(&self, rev: &str, path: &str) -> RegenResult<Option<Vec<u8>>> {
        if !self.exists(rev, path)? {
            return Ok(None);
        }
        let spec = format!("{rev}:{path}");
        Ok(Some(self.run(&["cat-file", "blob", &spec])?.stdout))
    }

    /// Write the selected files of `rev` into `into`.
    pub fn materialize(&self, rev: &str, files: &FileSet, into: &Path) -> RegenResult<TreeHandle> {
        std::fs::create_dir_all(into).map_err(|e| RegenError::io("create", into, e))?;

        let mut count = 0;
        for entry in self.ls_tree(rev)? {
            if !files.matches(&entry.path) {
                continue;
            }
            let bytes = self.cat_blob(&entry.blob)?;
            tree::write_file(into, &entry.path, &bytes)?;
            count += 1;
        }

        debug!(rev, files = count, into = %into.display(), "materialized git tree");
        Ok(TreeHandle {
            root: into.to_path_buf(),
            file_count: count,
        })
    }

    /// Newest commit reachable from `from` whose message has `<label>: <value>`.
    pub fn find_labelled_commit(&self, from: &str, label: &str) -> RegenResult<Option<LabelledCommit>> {
        let out = self.run(&["log", "--format=%H%x00%B%x1e", from])?;
        let pattern = Regex::new(&format!(r"(?m)^{}:\s*(\S+)\s*$", regex::escape(label)))
            .map_err(|e| RegenError::Validation(format!("invalid label `{label}`: {e}")))?;

        for record in out.stdout_lossy().split('\x1e') {
            let record = record.trim_start_matches('\n');
            let Some((commit, message)) = record.split_once('\0') else {
                continue;
            };
            // Last occurrence wins, like trailers
            if let Some(caps) = pattern.captures_iter(message).last() {
                trace!(commit, "found labelled commit");
                return Ok(Some(LabelledCommit {
                    commit: commit.trim().to_string(),
                    value: caps[1].to_string(),
                }));
            }
        }
        Ok(None)
    }

    /// True when there are no staged, unstaged or untracked changes.
    pub fn is_clean(&self) -> RegenResult<bool> {
        Ok(self.stdout(&["status", "--porcelain"])?.is_empty())
    }

    /// Stage exactly `paths` (additions, edits and deletions), ignored or not.
    /// Paths go through stdin so long lists never hit argv limits.
    pub fn stage(&self, paths: &[String]) -> RegenResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut spec = Vec::new();
        for path in paths {
            spec.extend_from_slice(path.as_bytes());
            spec.push(0);
        }
        let args = [
            "--literal-pathspecs",
            "add",
            "-A",
            "--force",
            "--pathspec-from-file=-",
            "--pathspec-file-nul",
        ];
        let out = self.raw_with_stdin(&args, Some(spec.as_slice()))?;
        if out.success() {
            Ok(())
        } else {
            Err(RegenError::tool(&out))
        }
    }

    pub fn amend_no_edit(&self) -> RegenResult<()> {
        self.run(&["commit", "--amend", "--no-edit", "--allow-empty", "--quiet"])
            .map(drop)
    }

    pub fn reset_hard(&self, rev: &str) -> RegenResult<()> {
        self.run(&["reset", "--hard", "--quiet", rev]).map(drop)?;
        self.run(&["clean", "-fdq"]).map(drop)
    }
}

/// Parse `git ls-tree -r -z` output, keeping plain and executable blobs.
fn parse_ls_tree(stdout: &[u8]) -> Vec<TreeEntry> {
    stdout
        .split(|b| *b == 0)
        .filter_map(|rec| {
            let rec = std::str::from_utf8(rec).ok()?;
            let (meta, path) = rec.split_once('\t')?;
            let mut parts = meta.split_whitespace();
            let (mode, kind, blob) = (parts.next()?, parts.next()?, parts.next()?);
            (kind == "blob" && (mode == "100644" || mode == "100755")).then(|| TreeEntry {
                path: path.to_string(),
                blob: blob.to_string(),
            })
        })
        .collect()
}

/// Detect git executable and verify it runs
pub fn detect_git_executable() -> RegenResult<()> {
    let out = ToolRunner::new(".", Duration::from_secs(10))
        .run(GIT, &["--version"])
        .map_err(|e| RegenError::backend_with("git", "git executable not found in PATH", e))?;

    if !out.success() || !out.stdout_lossy().contains("git version") {
        return Err(RegenError::tool(&out));
    }
    Ok(())
}

/// The nearest directory at or above `path` that holds `.git`.
/// Nonexistent trailing components are skipped.
pub fn enclosing_work_tree(path: &Path) -> Option<PathBuf> {
    let mut candidate = path;
    let resolved = loop {
        if let Ok(p) = dunce::canonicalize(candidate) {
            break p;
        }
        candidate = candidate.parent()?;
    };

    resolved
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}
