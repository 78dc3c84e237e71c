//! Consistency record envelope
//!
//! Records are stored as pretty-printed JSON so they diff well inside the
//! destination repository:
//!
//! ```json
//! {
//!   "format": "patchkeep-consistency",
//!   "format_version": 1,
//!   "hash_algorithm": "blake3",
//!   "files": { "include": ["**"], "exclude": [] },
//!   "patches": [
//!     { "path": "a.txt", "change": "modified", "encoding": "text", "diff": "..." },
//!     { "path": "logo.png", "change": "added", "encoding": "binary", "before": null, "after": "89504e47..." }
//!   ],
//!   "manifest": [ { "path": "a.txt", "digest": "..." } ]
//! }
//! ```
//!
//! Unknown fields are ignored so older builds can still read newer records of
//! the same major version; a `format_version` above [`FORMAT_VERSION`] is
//! refused.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::error::{RegenError, RegenResult};
use crate::core::manifest::{HashAlgorithm, Manifest, ManifestEntry};
use crate::core::patch::{ChangeKind, FilePatch};
use crate::core::record::{BinaryPatch, ConsistencyRecord, FORMAT_VERSION, Patch};
use crate::infra::walk::{FileSet, GlobSpec, is_normalized_rel};

const FORMAT_NAME: &str = "patchkeep-consistency";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: String,
    format_version: u32,
    hash_algorithm: HashAlgorithm,
    #[serde(default)]
    files: GlobSpec,
    #[serde(default)]
    patches: Vec<PatchWire>,
    #[serde(default)]
    manifest: Vec<EntryWire>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
enum PatchWire {
    Text {
        path: String,
        change: ChangeKind,
        diff: String,
    },
    Binary {
        path: String,
        change: ChangeKind,
        #[serde(with = "hex_opt")]
        before: Option<Vec<u8>>,
        #[serde(with = "hex_opt")]
        after: Option<Vec<u8>>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryWire {
    path: String,
    #[serde(with = "hex_bytes")]
    digest: Vec<u8>,
}

/// Serialize a record. Output is byte-identical for equal records.
pub fn encode(record: &ConsistencyRecord) -> RegenResult<Vec<u8>> {
    let patches = record
        .patches()
        .iter()
        .map(|patch| match patch {
            Patch::Text(p) => PatchWire::Text {
                path: p.path.clone(),
                change: p.change,
                diff: p.render(),
            },
            Patch::Binary(p) => PatchWire::Binary {
                path: p.path.clone(),
                change: p.change,
                before: p.before.clone(),
                after: p.after.clone(),
            },
        })
        .collect();

    let manifest = record
        .manifest()
        .entries()
        .iter()
        .map(|e| EntryWire {
            path: e.path.clone(),
            digest: e.digest.clone(),
        })
        .collect();

    let envelope = Envelope {
        format: FORMAT_NAME.to_string(),
        format_version: record.format_version(),
        hash_algorithm: record.manifest().algorithm(),
        files: record.files().spec().clone(),
        patches,
        manifest,
    };

    let mut bytes = serde_json::to_vec_pretty(&envelope)
        .map_err(|e| RegenError::MalformedRecord(format!("cannot serialize record: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse and structurally validate a record.
pub fn decode(bytes: &[u8]) -> RegenResult<ConsistencyRecord> {
    let malformed = RegenError::MalformedRecord;

    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| malformed(format!("not a record envelope: {e}")))?;

    if envelope.format != FORMAT_NAME {
        return Err(malformed(format!("unknown format `{}`", envelope.format)));
    }
    if envelope.format_version == 0 || envelope.format_version > FORMAT_VERSION {
        return Err(malformed(format!(
            "unsupported format version {} (this build reads up to {FORMAT_VERSION})",
            envelope.format_version
        )));
    }

    let algorithm = envelope.hash_algorithm;
    let files = FileSet::from_spec(&envelope.files)
        .map_err(|e| malformed(format!("invalid file set: {e}")))?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(envelope.manifest.len());
    for entry in envelope.manifest {
        check_path(&entry.path)?;
        if !seen.insert(entry.path.clone()) {
            return Err(malformed(format!("duplicate manifest entry {}", entry.path)));
        }
        if entry.digest.len() != algorithm.digest_len() {
            return Err(malformed(format!(
                "digest for {} has {} bytes, {} expects {}",
                entry.path,
                entry.digest.len(),
                algorithm.name(),
                algorithm.digest_len()
            )));
        }
        entries.push(ManifestEntry {
            path: entry.path,
            digest: entry.digest,
            algorithm,
        });
    }
    let manifest = Manifest::from_entries(algorithm, entries);

    let mut seen = HashSet::new();
    let mut patches = Vec::with_capacity(envelope.patches.len());
    for wire in envelope.patches {
        let patch = match wire {
            PatchWire::Text { path, change, diff } => {
                let mut parsed = FilePatch::parse(&path, &diff)
                    .map_err(|e| malformed(format!("patch for {path}: {e}")))?;
                parsed.change = change;
                Patch::Text(parsed)
            }
            PatchWire::Binary {
                path,
                change,
                before,
                after,
            } => {
                let consistent = match change {
                    ChangeKind::Added => before.is_none() && after.is_some(),
                    ChangeKind::Deleted => before.is_some() && after.is_none(),
                    ChangeKind::Modified => before.is_some() && after.is_some(),
                };
                if !consistent {
                    return Err(malformed(format!("binary patch for {path} does not match its change kind")));
                }
                Patch::Binary(BinaryPatch {
                    path,
                    change,
                    before,
                    after,
                })
            }
        };

        let path = patch.path().to_string();
        check_path(&path)?;
        if !seen.insert(path.clone()) {
            return Err(malformed(format!("duplicate patch for {path}")));
        }

        // Pre-patch content must be pinned, and added files have none
        match (patch.change(), manifest.get(&path)) {
            (ChangeKind::Added, Some(_)) => {
                return Err(malformed(format!("added file {path} has a manifest entry")));
            }
            (ChangeKind::Deleted | ChangeKind::Modified, None) => {
                return Err(malformed(format!("patched file {path} has no manifest entry")));
            }
            _ => {}
        }
        patches.push(patch);
    }

    Ok(ConsistencyRecord::from_parts(
        envelope.format_version,
        files,
        manifest,
        patches,
    ))
}

fn check_path(path: &str) -> RegenResult<()> {
    if is_normalized_rel(path) {
        Ok(())
    } else {
        Err(RegenError::MalformedRecord(format!("path `{path}` is not a normalized relative path")))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
