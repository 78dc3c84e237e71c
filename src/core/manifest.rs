//! Hashing manifest: relative path -> content digest
//!
//! A manifest pins the exact content of every file a consistency record was
//! generated against. Entries are kept sorted by path so serialization is
//! stable; per-file hashing runs on rayon and is merged back in that order.

use std::collections::BTreeSet;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::debug;

use crate::core::error::{DriftEntry, DriftReport, RegenError, RegenResult};
use crate::infra::io::read_file_smart;
use crate::infra::walk::{FileSet, walk_files};

/// Digest algorithm; fixed per destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Blake3 => blake3::hash(bytes).as_bytes().to_vec(),
            HashAlgorithm::Sha256 => sha2::Sha256::digest(bytes).to_vec(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Both algorithms produce 256-bit digests.
    pub fn digest_len(self) -> usize {
        32
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = RegenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => Err(RegenError::Validation(format!(
                "unknown hash algorithm `{other}` (expected blake3 or sha256)"
            ))),
        }
    }
}

/// One hashed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub digest: Vec<u8>,
    pub algorithm: HashAlgorithm,
}

impl ManifestEntry {
    pub fn hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// Sorted, duplicate-free set of entries sharing one algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    algorithm: HashAlgorithm,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Hash every regular file under `tree` selected by `files`.
    pub fn compute(tree: &Path, files: &FileSet, algorithm: HashAlgorithm) -> RegenResult<Self> {
        let paths = walk_files(tree, files).map_err(|e| RegenError::io("walk", tree, e))?;
        debug!(tree = %tree.display(), files = paths.len(), algorithm = algorithm.name(), "hashing tree");

        // Order-preserving parallel map: output follows the sorted walk
        let entries = paths
            .into_par_iter()
            .map(|path| {
                let abs = tree.join(&path);
                let content = read_file_smart(&abs).map_err(|e| RegenError::io("read", &abs, e))?;
                Ok(ManifestEntry {
                    digest: algorithm.digest(content.as_ref()),
                    path,
                    algorithm,
                })
            })
            .collect::<RegenResult<Vec<_>>>()?;

        Ok(Self { algorithm, entries })
    }

    /// Hash in-memory contents (e.g. a tree view that is not on disk yet).
    pub fn from_contents<'a, I>(algorithm: HashAlgorithm, contents: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let pairs: Vec<(&str, &[u8])> = contents.into_iter().collect();
        let entries = pairs
            .into_par_iter()
            .map(|(path, bytes)| ManifestEntry {
                path: path.to_string(),
                digest: algorithm.digest(bytes),
                algorithm,
            })
            .collect();
        Self::from_entries(algorithm, entries)
    }

    /// Build from decoded entries, sorting and dropping duplicates.
    pub fn from_entries(algorithm: HashAlgorithm, mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        Self { algorithm, entries }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Every path whose digest differs between `self` (expected) and
    /// `actual`, including paths present on only one side.
    pub fn compare(&self, actual: &Manifest) -> DriftReport {
        let paths: BTreeSet<&str> = self
            .entries
            .iter()
            .chain(actual.entries.iter())
            .map(|e| e.path.as_str())
            .collect();

        let entries = paths
            .into_iter()
            .filter_map(|path| {
                let expected = self.get(path);
                let found = actual.get(path);
                let same = match (expected, found) {
                    (Some(e), Some(f)) => e.digest == f.digest,
                    (None, None) => true,
                    _ => false,
                };
                (!same).then(|| DriftEntry {
                    path: path.to_string(),
                    expected: expected.map(ManifestEntry::hex),
                    actual: found.map(ManifestEntry::hex),
                })
            })
            .collect();

        DriftReport { entries }
    }
}
