//! Filepath: src/core/tree.rs
//! Directory trees as the regeneration engine sees them.
//! - Files are addressed by normalized relative paths (`a/b.txt`)
//! - Only regular files count; empty directories are pruned after deletes
//! - Every helper maps IO failures to `RegenError::Io` with the path
//!
//! Deterministic ordering comes from `walk_files`.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{RegenError, RegenResult};
use crate::infra::io::{read_file_smart, write_atomic};
use crate::infra::walk::{FileSet, walk_files};

/// A materialized tree owned by the current invocation.
#[derive(Debug, Clone)]
pub struct TreeHandle
{
    pub root: PathBuf,
    pub file_count: usize,
}

impl TreeHandle
{
    /// Count the selected files under `root`.
    pub fn scan(
        root: &Path,
        files: &FileSet,
    ) -> RegenResult<Self>
    {
        Ok(Self { root: root.to_path_buf(), file_count: list_files(root, files)?.len() })
    }

    pub fn path(&self) -> &Path
    {
        &self.root
    }
}

/// Sorted relative paths of selected files.
pub fn list_files(
    root: &Path,
    files: &FileSet,
) -> RegenResult<Vec<String>>
{
    walk_files(root, files).map_err(|e| RegenError::io("walk", root, e))
}

/// File bytes, or `None` when the file does not exist.
pub fn read_file(
    root: &Path,
    rel: &str,
) -> RegenResult<Option<Vec<u8>>>
{
    let abs = root.join(rel);
    match read_file_smart(&abs)
    {
        Ok(content) => Ok(Some(content.into_vec())),
        // A file standing where a parent directory should be also means absent
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(RegenError::io("read", abs, e)),
    }
}

pub fn write_file(
    root: &Path,
    rel: &str,
    bytes: &[u8],
) -> RegenResult<()>
{
    let abs = root.join(rel);
    write_atomic(&abs, bytes).map_err(|e| RegenError::io("write", abs, e))
}

/// Delete `rel` and any directories it leaves empty (up to `root`).
pub fn remove_file(
    root: &Path,
    rel: &str,
) -> RegenResult<()>
{
    let abs = root.join(rel);
    match fs::remove_file(&abs)
    {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(RegenError::io("remove", abs, e)),
    }

    let mut dir = abs.parent();
    while let Some(d) = dir
    {
        if d == root || !d.starts_with(root)
        {
            break;
        }
        // Stops at the first non-empty directory
        if fs::remove_dir(d).is_err()
        {
            break;
        }
        dir = d.parent();
    }

    Ok(())
}

/// Copy the selected files of `from` into `to` (which may not exist yet).
pub fn copy_file_set(
    from: &Path,
    to: &Path,
    files: &FileSet,
) -> RegenResult<TreeHandle>
{
    fs::create_dir_all(to).map_err(|e| RegenError::io("create", to, e))?;

    let paths = list_files(from, files)?;
    for rel in &paths
    {
        let src = from.join(rel);
        let dst = to.join(rel);
        if let Some(parent) = dst.parent()
        {
            fs::create_dir_all(parent).map_err(|e| RegenError::io("create", parent, e))?;
        }
        fs::copy(&src, &dst).map_err(|e| RegenError::io("copy", &src, e))?;
    }

    debug!(from = %from.display(), to = %to.display(), files = paths.len(), "copied file set");
    Ok(TreeHandle { root: to.to_path_buf(), file_count: paths.len() })
}

/// One path a sync replaces or deletes, with what it held before.
#[derive(Debug)]
struct SyncStep
{
    rel: String,
    /// `None` deletes the path
    next: Option<Vec<u8>>,
    previous: Option<(Vec<u8>, fs::Permissions)>,
}

/// Pending changes that make a destination match a staged tree.
/// Computed without touching the destination; applied all or nothing.
#[derive(Debug, Default)]
pub struct SyncPlan
{
    steps: Vec<SyncStep>,
}

impl SyncPlan
{
    /// Compare `wanted` files of `staged` with `dest`. Only the `owned`
    /// destination paths may be deleted; anything else absent from `wanted`
    /// is left alone.
    pub fn build(
        staged: &Path,
        dest: &Path,
        wanted: &[String],
        owned: &[String],
    ) -> RegenResult<Self>
    {
        let keep: BTreeSet<&str> = wanted
            .iter()
            .map(String::as_str)
            .collect();
        let mut steps = Vec::new();

        for rel in owned
            .iter()
            .filter(|p| !keep.contains(p.as_str()))
        {
            if let Some(previous) = snapshot_file(dest, rel)?
            {
                steps.push(SyncStep { rel: rel.clone(), next: None, previous: Some(previous) });
            }
        }

        for rel in wanted
        {
            let new = read_file(staged, rel)?.unwrap_or_default();
            let previous = snapshot_file(dest, rel)?;
            if previous
                .as_ref()
                .is_some_and(|(old, _)| *old == new)
            {
                continue;
            }
            steps.push(SyncStep { rel: rel.clone(), next: Some(new), previous });
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize
    {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.steps.is_empty()
    }

    /// Every path the plan writes or deletes, in application order.
    pub fn paths(&self) -> Vec<String>
    {
        self.steps
            .iter()
            .map(|s| s.rel.clone())
            .collect()
    }

    /// Apply every step to `dest`. On the first failure the steps already
    /// applied are undone before the error is returned.
    pub fn apply(
        &self,
        dest: &Path,
    ) -> RegenResult<usize>
    {
        for (done, step) in self.steps.iter().enumerate()
        {
            let result = match &step.next
            {
                Some(bytes) => write_file(dest, &step.rel, bytes),
                None => remove_file(dest, &step.rel),
            };
            if let Err(err) = result
            {
                warn!(path = %step.rel, error = %err, "sync failed, restoring destination");
                rollback(dest, &self.steps[..done]);
                return Err(err);
            }
        }
        Ok(self.steps.len())
    }
}

fn rollback(
    dest: &Path,
    applied: &[SyncStep],
)
{
    for step in applied.iter().rev()
    {
        let restored = match &step.previous
        {
            Some((bytes, perms)) => write_file(dest, &step.rel, bytes).and_then(|()| {
                let abs = dest.join(&step.rel);
                fs::set_permissions(&abs, perms.clone()).map_err(|e| RegenError::io("chmod", abs, e))
            }),
            None => remove_file(dest, &step.rel),
        };
        if let Err(err) = restored
        {
            warn!(path = %step.rel, error = %err, "could not restore file");
        }
    }
}

fn snapshot_file(
    root: &Path,
    rel: &str,
) -> RegenResult<Option<(Vec<u8>, fs::Permissions)>>
{
    let Some(bytes) = read_file(root, rel)?
    else
    {
        return Ok(None);
    };
    let abs = root.join(rel);
    let perms = fs::metadata(&abs)
        .map_err(|e| RegenError::io("stat", &abs, e))?
        .permissions();
    Ok(Some((bytes, perms)))
}

/// Make the selected files of `dest` match those of `staged` exactly.
/// Files outside `files` are never touched, and a failed sync leaves
/// `dest` as it was.
pub fn sync_file_set(
    staged: &Path,
    dest: &Path,
    files: &FileSet,
) -> RegenResult<usize>
{
    let wanted = list_files(staged, files)?;
    let present = list_files(dest, files)?;
    SyncPlan::build(staged, dest, &wanted, &present)?.apply(dest)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn remove_prunes_empty_parents_only()
    {
        let tmp = tempfile::TempDir::new().unwrap();
        write_file(tmp.path(), "a/b/c.txt", b"x").unwrap();
        write_file(tmp.path(), "a/keep.txt", b"y").unwrap();

        remove_file(tmp.path(), "a/b/c.txt").unwrap();
        assert!(!tmp.path().join("a/b").exists());
        assert!(tmp.path().join("a/keep.txt").exists());

        // Deleting a missing file is not an error
        remove_file(tmp.path(), "a/b/c.txt").unwrap();
    }

    #[test]
    fn sync_only_touches_the_file_set()
    {
        let staged = tempfile::TempDir::new().unwrap();
        let dest = tempfile::TempDir::new().unwrap();
        write_file(staged.path(), "src/a.rs", b"new").unwrap();
        write_file(dest.path(), "src/a.rs", b"old").unwrap();
        write_file(dest.path(), "src/stale.rs", b"gone").unwrap();
        write_file(dest.path(), "README.md", b"mine").unwrap();

        let set = FileSet::new(&["src/**".to_string()], &[]).unwrap();
        let changed = sync_file_set(staged.path(), dest.path(), &set).unwrap();

        assert_eq!(changed, 2);
        assert_eq!(read_file(dest.path(), "src/a.rs").unwrap().unwrap(), b"new");
        assert!(read_file(dest.path(), "src/stale.rs").unwrap().is_none());
        assert_eq!(read_file(dest.path(), "README.md").unwrap().unwrap(), b"mine");
    }

    #[test]
    fn plan_only_deletes_owned_paths()
    {
        let staged = tempfile::TempDir::new().unwrap();
        let dest = tempfile::TempDir::new().unwrap();
        write_file(staged.path(), "src/a.rs", b"same").unwrap();
        write_file(dest.path(), "src/a.rs", b"same").unwrap();
        write_file(dest.path(), "src/tracked.rs", b"old").unwrap();
        write_file(dest.path(), "build/out.bin", b"local").unwrap();

        let wanted = vec!["src/a.rs".to_string()];
        let owned = vec!["src/a.rs".to_string(), "src/tracked.rs".to_string()];
        let plan = SyncPlan::build(staged.path(), dest.path(), &wanted, &owned).unwrap();
        assert_eq!(plan.len(), 1);

        plan.apply(dest.path()).unwrap();
        assert!(read_file(dest.path(), "src/tracked.rs").unwrap().is_none());
        assert_eq!(read_file(dest.path(), "build/out.bin").unwrap().unwrap(), b"local");
    }

    #[test]
    fn copy_respects_selection()
    {
        let from = tempfile::TempDir::new().unwrap();
        let to = tempfile::TempDir::new().unwrap();
        write_file(from.path(), "x/in.txt", b"1").unwrap();
        write_file(from.path(), "out.bin", b"2").unwrap();

        let set = FileSet::new(&["**/*.txt".to_string()], &[]).unwrap();
        let handle = copy_file_set(from.path(), &to.path().join("copy"), &set).unwrap();

        assert_eq!(handle.file_count, 1);
        assert!(handle.path().join("x/in.txt").exists());
        assert!(!handle.path().join("out.bin").exists());
    }
}
