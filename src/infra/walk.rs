//! Filepath: src/infra/walk.rs
//! File-set selectors and deterministic tree walking.
//! - `FileSet`: include/exclude globs over normalized relative paths
//! - `walk_files`: every regular file under a root that a `FileSet` selects
//! - Paths are always `/`-separated and relative to the walked root
//! - Deterministic ordering for stable manifests and tests
//!
//! Backed by ripgrep's `ignore` crate and `globset`. Ignore files are NOT
//! honored here: a migrated tree is defined by its file set alone, so
//! `.gitignore` rules inside a tree must not hide migration-owned files.
//! `.git` directories are always pruned.

use std::{
    ffi::OsStr,
    io,
    path::{Component, Path},
};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};
use serde::{Deserialize, Serialize};

fn default_include() -> Vec<String>
{
    vec!["**".to_string()]
}

/// Serializable glob lists as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobSpec
{
    /// Patterns a path must match (any of)
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Patterns that remove a path again (any of)
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for GlobSpec
{
    fn default() -> Self
    {
        Self { include: default_include(), exclude: Vec::new() }
    }
}

/// Compiled selector over relative paths.
/// `*` never crosses a `/`; use `**` for recursive matches.
#[derive(Debug, Clone)]
pub struct FileSet
{
    spec: GlobSpec,
    /// `None` selects every path
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl FileSet
{
    /// Compile include/exclude lists.
    pub fn new(
        include: &[String],
        exclude: &[String],
    ) -> Result<Self, globset::Error>
    {
        Ok(Self {
            spec: GlobSpec { include: include.to_vec(), exclude: exclude.to_vec() },
            include: Some(compile(include)?),
            exclude: compile(exclude)?,
        })
    }

    /// Compile a configured spec.
    pub fn from_spec(spec: &GlobSpec) -> Result<Self, globset::Error>
    {
        Self::new(&spec.include, &spec.exclude)
    }

    /// Selects every path.
    pub fn all() -> Self
    {
        Self { spec: GlobSpec::default(), include: None, exclude: GlobSet::empty() }
    }

    /// A new set that additionally excludes `patterns`.
    pub fn difference(
        &self,
        patterns: &[String],
    ) -> Result<Self, globset::Error>
    {
        let mut exclude = self
            .spec
            .exclude
            .clone();
        exclude.extend(
            patterns
                .iter()
                .cloned(),
        );
        Self::new(&self.spec.include, &exclude)
    }

    /// True when `rel` (a normalized relative path) is selected.
    pub fn matches(
        &self,
        rel: &str,
    ) -> bool
    {
        self.include
            .as_ref()
            .is_none_or(|set| set.is_match(rel))
            && !self
                .exclude
                .is_match(rel)
    }

    /// The uncompiled glob lists.
    pub fn spec(&self) -> &GlobSpec
    {
        &self.spec
    }
}

fn compile(patterns: &[String]) -> Result<GlobSet, globset::Error>
{
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns
    {
        builder.add(
            GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()?,
        );
    }

    builder.build()
}

/// Convert a path relative to some root into the `/`-separated form used in
/// manifests and records. Returns `None` for paths that escape the root.
pub fn normalize_rel(rel: &Path) -> Option<String>
{
    let mut parts = Vec::new();

    for component in rel.components()
    {
        match component
        {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if parts.is_empty()
    {
        return None;
    }

    Some(parts.join("/"))
}

/// True for strings already in normalized relative form.
pub fn is_normalized_rel(rel: &str) -> bool
{
    !rel.is_empty()
        && !rel.starts_with('/')
        && !rel.contains('\\')
        && rel
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

/// Traverse regular files under `root` selected by `files`.
/// Returns a **sorted** list of normalized relative paths. A missing root is
/// an empty tree.
pub fn walk_files(
    root: &Path,
    files: &FileSet,
) -> io::Result<Vec<String>>
{
    if !root.exists()
    {
        return Ok(Vec::new());
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .filter_entry(|ent: &DirEntry| ent.file_name() != OsStr::new(".git"));

    let mut out = Vec::new();

    for entry in builder.build()
    {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| io::Error::other("directory walk failed"))
        })?;

        // Keep only regular files; symlinks are not part of a tree
        if !entry
            .file_type()
            .is_some_and(|ft| ft.is_file())
        {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        let Some(rel) = normalize_rel(rel)
        else
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non UTF-8 path under {}: {}", root.display(), rel.display()),
            ));
        };

        if files.matches(&rel)
        {
            out.push(rel);
        }
    }

    // Deterministic order (stable manifests & tests)
    out.sort();

    Ok(out)
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn touch(
        root: &Path,
        rel: &str,
    )
    {
        let p = root.join(rel);
        fs::create_dir_all(
            p.parent()
                .unwrap(),
        )
        .unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn star_does_not_cross_directories()
    {
        let set = FileSet::new(&["*.txt".to_string()], &[]).unwrap();
        assert!(set.matches("a.txt"));
        assert!(!set.matches("dir/a.txt"));

        let set = FileSet::new(&["**/*.txt".to_string()], &[]).unwrap();
        assert!(set.matches("dir/a.txt"));
    }

    #[test]
    fn difference_excludes_patterns()
    {
        let set = FileSet::all()
            .difference(&["patches/**".to_string(), "RECORD".to_string()])
            .unwrap();
        assert!(set.matches("src/lib.rs"));
        assert!(!set.matches("patches/src/lib.rs.patch"));
        assert!(!set.matches("RECORD"));
    }

    #[test]
    fn walk_is_sorted_filtered_and_skips_git()
    {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.txt");
        touch(tmp.path(), "a/z.rs");
        touch(tmp.path(), "a/b.txt");
        touch(tmp.path(), ".git/config");
        touch(tmp.path(), ".hidden");

        let all = walk_files(tmp.path(), &FileSet::all()).unwrap();
        assert_eq!(all, vec![".hidden", "a/b.txt", "a/z.rs", "b.txt"]);

        let txt = FileSet::new(&["**/*.txt".to_string()], &[]).unwrap();
        assert_eq!(walk_files(tmp.path(), &txt).unwrap(), vec!["a/b.txt", "b.txt"]);
    }

    #[test]
    fn missing_root_is_empty()
    {
        let tmp = TempDir::new().unwrap();
        let files = walk_files(&tmp.path().join("nope"), &FileSet::all()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn normalization_rejects_escapes()
    {
        assert_eq!(normalize_rel(Path::new("./a/b")), Some("a/b".to_string()));
        assert_eq!(normalize_rel(Path::new("../a")), None);
        assert!(is_normalized_rel("a/b.txt"));
        assert!(!is_normalized_rel("/a"));
        assert!(!is_normalized_rel("a/../b"));
        assert!(!is_normalized_rel(""));
    }
}
