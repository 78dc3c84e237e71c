//! Import pipeline stand-ins
//!
//! Produces the tree a clean import of an origin revision would write into
//! the destination. The content transformation itself is the identity here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::core::destination::folder::CURRENT;
use crate::core::error::{RegenError, RegenResult};
use crate::core::git::GitCli;
use crate::core::tree::{self, TreeHandle};
use crate::infra::walk::FileSet;

pub trait ImportPipeline {
    fn name(&self) -> &'static str;

    /// Newest origin revision available, `None` when the origin is empty.
    fn latest_revision(&self) -> RegenResult<Option<String>>;

    /// Write the imported tree for `revision` into `into`.
    fn materialize(&self, revision: &str, into: &Path) -> RegenResult<TreeHandle>;
}

/// An origin that is a plain directory with a single revision.
#[derive(Debug, Clone)]
pub struct FolderOrigin {
    root: PathBuf,
    files: FileSet,
}

impl FolderOrigin {
    pub fn new(root: impl Into<PathBuf>, files: FileSet) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }
}

impl ImportPipeline for FolderOrigin {
    fn name(&self) -> &'static str {
        "folder"
    }

    fn latest_revision(&self) -> RegenResult<Option<String>> {
        Ok(self.root.is_dir().then(|| CURRENT.to_string()))
    }

    fn materialize(&self, revision: &str, into: &Path) -> RegenResult<TreeHandle> {
        if !self.root.is_dir() {
            return Err(RegenError::backend(
                "folder",
                format!("origin {} is not a directory", self.root.display()),
            ));
        }
        debug!(revision, origin = %self.root.display(), "importing folder origin");
        tree::copy_file_set(&self.root, into, &self.files)
    }
}

#[derive(Debug, Clone)]
pub struct GitOrigin {
    git: GitCli,
    files: FileSet,
}

impl GitOrigin {
    pub fn open(repo: &Path, files: FileSet, timeout: Duration) -> RegenResult<Self> {
        Ok(Self {
            git: GitCli::open(repo, timeout)?,
            files,
        })
    }
}

impl ImportPipeline for GitOrigin {
    fn name(&self) -> &'static str {
        "git"
    }

    fn latest_revision(&self) -> RegenResult<Option<String>> {
        self.git.head()
    }

    fn materialize(&self, revision: &str, into: &Path) -> RegenResult<TreeHandle> {
        let commit = self.git.require_commit(revision)?;
        self.git.materialize(&commit, &self.files, into)
    }
}
