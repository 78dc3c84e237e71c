//! Destination patch contract
//!
//! The narrow capability a destination backend provides to regeneration:
//! read trees and files at a revision, infer revisions that were not
//! supplied, and fold an updated tree back into an existing change.
//! Inference hooks distinguish "nothing to infer" (`Ok(None)`) from
//! "inference failed" (`Err`).

use std::path::Path;

use crate::core::error::RegenResult;
use crate::core::tree::TreeHandle;
use crate::infra::walk::FileSet;

pub mod folder;
pub mod git;

pub use folder::FolderDestination;
pub use git::GitDestination;

pub trait DestinationPatchContract {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Materialize the selected files of `revision` into `into`.
    fn read_tree(&self, revision: &str, files: &FileSet, into: &Path) -> RegenResult<TreeHandle>;

    fn exists(&self, revision: &str, path: &str) -> RegenResult<bool>;

    /// Content of one file, `None` if absent.
    fn read_file(&self, revision: &str, path: &str) -> RegenResult<Option<Vec<u8>>>;

    /// Revision holding the record the target was edited from.
    fn infer_baseline(&self) -> RegenResult<Option<String>> {
        Ok(None)
    }

    /// Most recently edited pending change.
    fn infer_target(&self) -> RegenResult<Option<String>> {
        Ok(None)
    }

    /// Origin revision the target was imported from.
    fn infer_import_baseline(&self, _target: &str, _workdir: &Path) -> RegenResult<Option<String>> {
        Ok(None)
    }

    /// Replace the files of `files` in change `target` with those of
    /// `updated`. Must not modify anything outside `files`, and must leave
    /// the change untouched when it fails.
    fn update_change(&self, target: &str, updated: &TreeHandle, files: &FileSet) -> RegenResult<()>;
}
