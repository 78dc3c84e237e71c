use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::destination::DestinationPatchContract;
use crate::core::error::{RegenError, RegenResult};
use crate::core::tree::{self, TreeHandle};
use crate::infra::walk::FileSet;

/// Name of the only revision a folder has.
pub const CURRENT: &str = "current";

/// A plain directory: one revision, edited in place.
#[derive(Debug, Clone)]
pub struct FolderDestination {
    root: PathBuf,
}

impl FolderDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn check_root(&self) -> RegenResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(RegenError::backend(
                "folder",
                format!("{} is not a directory", self.root.display()),
            ))
        }
    }
}

impl DestinationPatchContract for FolderDestination {
    fn name(&self) -> &'static str {
        "folder"
    }

    fn read_tree(&self, _revision: &str, files: &FileSet, into: &Path) -> RegenResult<TreeHandle> {
        self.check_root()?;
        tree::copy_file_set(&self.root, into, files)
    }

    fn exists(&self, _revision: &str, path: &str) -> RegenResult<bool> {
        Ok(self.root.join(path).is_file())
    }

    fn read_file(&self, _revision: &str, path: &str) -> RegenResult<Option<Vec<u8>>> {
        tree::read_file(&self.root, path)
    }

    fn infer_target(&self) -> RegenResult<Option<String>> {
        Ok(self.root.is_dir().then(|| CURRENT.to_string()))
    }

    fn update_change(&self, _target: &str, updated: &TreeHandle, files: &FileSet) -> RegenResult<()> {
        self.check_root()?;
        let changed = tree::sync_file_set(&updated.root, &self.root, files)?;
        info!(root = %self.root.display(), changed, "updated folder destination");
        Ok(())
    }
}
