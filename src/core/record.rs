//! Consistency record: destination-only edits on top of a pristine tree
//!
//! A record is built once by [`ConsistencyRecord::generate`] and never
//! mutated. It carries one patch per differing file, a manifest of the
//! pristine tree and the file set both were computed over, which makes it
//! self-contained: [`ConsistencyRecord::reverse_apply`] needs nothing but
//! the edited tree.
//!
//! Reversal is all-or-nothing. Patches are reversed in memory, the
//! resulting view is hashed and checked against the manifest, and only a
//! fully verified view is written back.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::core::codec;
use crate::core::error::{RegenError, RegenResult};
use crate::core::manifest::{HashAlgorithm, Manifest, ManifestEntry};
use crate::core::patch::{ChangeKind, FilePatch};
use crate::core::tree;
use crate::infra::io::{text_view, write_atomic};
use crate::infra::walk::{FileSet, walk_files};

/// Current envelope version written by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Whole-content patch for files that are not text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPatch {
    pub path: String,
    pub change: ChangeKind,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

/// One file's recorded edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    Text(FilePatch),
    Binary(BinaryPatch),
}

impl Patch {
    /// Patch turning `before` into `after`; `None` when they are equal.
    pub fn between(path: &str, before: Option<&[u8]>, after: Option<&[u8]>) -> Option<Patch> {
        if before == after {
            return None;
        }

        match (text_view(before), text_view(after)) {
            (Some(old), Some(new)) => FilePatch::between(path, old, new).map(Patch::Text),
            _ => Some(Patch::Binary(BinaryPatch {
                path: path.to_string(),
                change: match (before, after) {
                    (None, _) => ChangeKind::Added,
                    (_, None) => ChangeKind::Deleted,
                    _ => ChangeKind::Modified,
                },
                before: before.map(<[u8]>::to_vec),
                after: after.map(<[u8]>::to_vec),
            })),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Patch::Text(p) => &p.path,
            Patch::Binary(p) => &p.path,
        }
    }

    pub fn change(&self) -> ChangeKind {
        match self {
            Patch::Text(p) => p.change,
            Patch::Binary(p) => p.change,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Patch::Binary(_))
    }

    pub fn reverse(&self) -> Patch {
        match self {
            Patch::Text(p) => Patch::Text(p.reverse()),
            Patch::Binary(p) => Patch::Binary(BinaryPatch {
                path: p.path.clone(),
                change: p.change.reversed(),
                before: p.after.clone(),
                after: p.before.clone(),
            }),
        }
    }

    /// Apply forward to `current` (`None` = absent).
    pub fn apply(&self, current: Option<&[u8]>) -> Result<Option<Vec<u8>>, String> {
        match self {
            Patch::Text(p) => {
                let current = match current {
                    Some(bytes) => Some(
                        std::str::from_utf8(bytes)
                            .map_err(|_| "file is not valid UTF-8 text".to_string())?,
                    ),
                    None => None,
                };
                Ok(p.apply(current)?.map(String::into_bytes))
            }
            Patch::Binary(p) => {
                if current != p.before.as_deref() {
                    return Err("binary content differs from the recorded content".into());
                }
                Ok(p.after.clone())
            }
        }
    }
}

/// Patch set plus pristine manifest, versioned.
#[derive(Debug, Clone)]
pub struct ConsistencyRecord {
    format_version: u32,
    files: FileSet,
    manifest: Manifest,
    patches: Vec<Patch>,
}

impl PartialEq for ConsistencyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.format_version == other.format_version
            && self.files.spec() == other.files.spec()
            && self.manifest == other.manifest
            && self.patches == other.patches
    }
}

/// Post-reversal content per touched path (`None` = delete).
pub type ReversePlan = BTreeMap<String, Option<Vec<u8>>>;

impl ConsistencyRecord {
    /// Assemble from decoded parts; callers validate first.
    pub(crate) fn from_parts(
        format_version: u32,
        files: FileSet,
        manifest: Manifest,
        mut patches: Vec<Patch>,
    ) -> Self {
        patches.sort_by(|a, b| a.path().cmp(b.path()));
        Self {
            format_version,
            files,
            manifest,
            patches,
        }
    }

    /// Record every difference between `previous` (pristine) and `next`
    /// (edited) within `files`.
    #[instrument(level = "debug", skip_all, fields(previous = %previous.display(), next = %next.display()))]
    pub fn generate(
        previous: &Path,
        next: &Path,
        files: &FileSet,
        algorithm: HashAlgorithm,
    ) -> RegenResult<Self> {
        let walk = |root: &Path| walk_files(root, files).map_err(|e| RegenError::io("walk", root, e));
        let paths: BTreeSet<String> = walk(previous)?.into_iter().chain(walk(next)?).collect();

        let mut patches = Vec::new();
        for path in &paths {
            let before = tree::read_file(previous, path)?;
            let after = tree::read_file(next, path)?;
            if let Some(patch) = Patch::between(path, before.as_deref(), after.as_deref()) {
                debug!(path, change = ?patch.change(), binary = patch.is_binary(), "recorded patch");
                patches.push(patch);
            }
        }

        let manifest = Manifest::compute(previous, files, algorithm)?;
        info!(patches = patches.len(), manifest = manifest.len(), "generated consistency record");

        Ok(Self::from_parts(FORMAT_VERSION, files.clone(), manifest, patches))
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn to_bytes(&self) -> RegenResult<Vec<u8>> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> RegenResult<Self> {
        codec::decode(bytes)
    }

    /// Compute and verify the reversal of every patch against `root`
    /// without touching the disk.
    pub fn plan_reverse(&self, root: &Path) -> RegenResult<ReversePlan> {
        let mut plan = ReversePlan::new();
        for patch in &self.patches {
            let current = tree::read_file(root, patch.path())?;
            let reverted = patch
                .reverse()
                .apply(current.as_deref())
                .map_err(|reason| RegenError::Conflict {
                    path: patch.path().to_string(),
                    reason,
                })?;
            plan.insert(patch.path().to_string(), reverted);
        }

        // Hash the tree as it would look after reversal
        let on_disk = walk_files(root, &self.files).map_err(|e| RegenError::io("walk", root, e))?;
        let mut view: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for path in on_disk {
            if plan.contains_key(&path) {
                continue;
            }
            if let Some(bytes) = tree::read_file(root, &path)? {
                view.insert(path, bytes);
            }
        }
        for (path, content) in &plan {
            if let Some(bytes) = content {
                view.insert(path.clone(), bytes.clone());
            }
        }

        let actual = Manifest::from_contents(
            self.manifest.algorithm(),
            view.iter().map(|(p, b)| (p.as_str(), b.as_slice())),
        );
        let report = self.manifest.compare(&actual);
        if !report.is_empty() {
            return Err(RegenError::Drift(report));
        }

        Ok(plan)
    }

    /// Reverse every patch in place, reconstructing the pristine tree.
    /// Nothing is written unless the whole reversal verifies.
    #[instrument(level = "debug", skip_all, fields(tree = %root.display(), patches = self.patches.len()))]
    pub fn reverse_apply(&self, root: &Path) -> RegenResult<()> {
        let plan = self.plan_reverse(root)?;

        for (path, content) in &plan {
            let abs = root.join(path);
            match content {
                Some(bytes) => write_atomic(&abs, bytes).map_err(|e| RegenError::io("write", &abs, e))?,
                None => tree::remove_file(root, path)?,
            }
        }

        info!(files = plan.len(), "reverse-applied consistency record");
        Ok(())
    }

    /// Manifest entry for `path`, if the pristine tree had it.
    pub fn pristine_entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.manifest.get(path)
    }
}

/// Read and decode a record file.
pub fn read_record(path: &Path) -> RegenResult<ConsistencyRecord> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RegenError::Validation(format!("no record file at {}", path.display())),
        _ => RegenError::io("read", path, e),
    })?;
    ConsistencyRecord::from_bytes(&bytes)
}
