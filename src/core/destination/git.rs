//! Git work tree as a destination
//!
//! Revisions are anything `git rev-parse` understands. Import commits carry
//! an origin label trailer (`GitOrigin-RevId: <rev>` by default): the newest
//! labelled commit is the baseline, and its label value is the origin
//! revision the import came from. Updating a change amends `HEAD`.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::destination::DestinationPatchContract;
use crate::core::error::{RegenError, RegenResult};
use crate::core::git::GitCli;
use crate::core::tree::{self, SyncPlan, TreeHandle};
use crate::infra::walk::FileSet;

pub const DEFAULT_LABEL: &str = "GitOrigin-RevId";

#[derive(Debug, Clone)]
pub struct GitDestination {
    git: GitCli,
    label: String,
}

impl GitDestination {
    pub fn open(repo: &Path, label: Option<&str>, timeout: Duration) -> RegenResult<Self> {
        Ok(Self {
            git: GitCli::open(repo, timeout)?,
            label: label.unwrap_or(DEFAULT_LABEL).to_string(),
        })
    }

    /// Only paths tracked at `head` may be deleted, so ignored and other
    /// untracked files in the work tree survive.
    fn write_and_amend(&self, head: &str, updated: &TreeHandle, files: &FileSet) -> RegenResult<()> {
        let repo = self.git.repo();
        let wanted = tree::list_files(&updated.root, files)?;
        let tracked = self.git.tracked(head, files)?;

        let plan = SyncPlan::build(&updated.root, repo, &wanted, &tracked)?;
        if plan.is_empty() {
            info!(repo = %repo.display(), "destination change already up to date");
            return Ok(());
        }

        let changed = plan.apply(repo)?;
        self.git.stage(&plan.paths())?;
        self.git.amend_no_edit()?;
        info!(repo = %repo.display(), changed, label = %self.label, "amended destination change");
        Ok(())
    }
}

impl DestinationPatchContract for GitDestination {
    fn name(&self) -> &'static str {
        "git"
    }

    fn read_tree(&self, revision: &str, files: &FileSet, into: &Path) -> RegenResult<TreeHandle> {
        let commit = self.git.require_commit(revision)?;
        self.git.materialize(&commit, files, into)
    }

    fn exists(&self, revision: &str, path: &str) -> RegenResult<bool> {
        let commit = self.git.require_commit(revision)?;
        self.git.exists(&commit, path)
    }

    fn read_file(&self, revision: &str, path: &str) -> RegenResult<Option<Vec<u8>>> {
        let commit = self.git.require_commit(revision)?;
        self.git.read_file(&commit, path)
    }

    fn infer_baseline(&self) -> RegenResult<Option<String>> {
        if self.git.head()?.is_none() {
            return Ok(None);
        }
        Ok(self
            .git
            .find_labelled_commit("HEAD", &self.label)?
            .map(|c| c.commit))
    }

    fn infer_target(&self) -> RegenResult<Option<String>> {
        self.git.head()
    }

    fn infer_import_baseline(&self, target: &str, _workdir: &Path) -> RegenResult<Option<String>> {
        let commit = self.git.require_commit(target)?;
        Ok(self
            .git
            .find_labelled_commit(&commit, &self.label)?
            .map(|c| c.value))
    }

    fn update_change(&self, target: &str, updated: &TreeHandle, files: &FileSet) -> RegenResult<()> {
        let target_commit = self.git.require_commit(target)?;
        let head = self.git.head()?.ok_or_else(|| {
            RegenError::backend("git", "destination repository has no commits")
        })?;

        if head != target_commit {
            return Err(RegenError::Validation(format!(
                "target {target} is not HEAD of {}; only the checked-out change can be amended",
                self.git.repo().display()
            )));
        }
        if !self.git.is_clean()? {
            return Err(RegenError::Validation(format!(
                "work tree {} has uncommitted changes",
                self.git.repo().display()
            )));
        }

        match self.write_and_amend(&head, updated, files) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "update failed, resetting work tree to target");
                if let Err(reset) = self.git.reset_hard(&head) {
                    warn!(error = %reset, "reset after failed update also failed");
                }
                Err(err)
            }
        }
    }
}
