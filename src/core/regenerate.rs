//! Regeneration orchestrator
//!
//! Recomputes the destination-only patch set of a pending change after a
//! reviewer edited it further. Two tracking modes:
//!
//! - consistency record: reverse-apply the baseline's record to recover the
//!   pristine import, then diff pristine against the target
//! - import baseline: rebuild what a clean import of an origin revision
//!   would have produced and diff that against the target
//!
//! Every step runs inside a workspace owned by this invocation. Nothing
//! reaches the destination until the final `update_change`, and any error
//! before it leaves the destination untouched.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::autopatch::{self, AutoPatchConfig};
use crate::core::destination::DestinationPatchContract;
use crate::core::error::{RegenError, RegenResult};
use crate::core::manifest::HashAlgorithm;
use crate::core::origin::ImportPipeline;
use crate::core::record::ConsistencyRecord;
use crate::core::tree::{self, TreeHandle};
use crate::infra::io::write_atomic;
use crate::infra::signal::CancelToken;
use crate::infra::walk::FileSet;

/// References supplied by the caller; anything absent is inferred.
#[derive(Debug, Clone, Default)]
pub struct RegenerateRequest {
    pub baseline_ref: Option<String>,
    pub target_ref: Option<String>,
    /// Origin revision to import from in import-baseline mode
    pub source_ref: Option<String>,
    pub use_import_baseline: bool,
}

/// How a reference was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", content = "ref", rename_all = "snake_case")]
pub enum Resolution {
    Explicit(String),
    Inferred(String),
    /// Chosen by the import fallback policy
    Fallback(String),
}

impl Resolution {
    pub fn reference(&self) -> &str {
        match self {
            Resolution::Explicit(r) | Resolution::Inferred(r) | Resolution::Fallback(r) => r,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Explicit(r) => write!(f, "{r}"),
            Resolution::Inferred(r) => write!(f, "{r} (inferred)"),
            Resolution::Fallback(r) => write!(f, "{r} (fallback)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    ConsistencyRecord,
    ImportBaseline,
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackingMode::ConsistencyRecord => "consistency record",
            TrackingMode::ImportBaseline => "import baseline",
        })
    }
}

/// What to do when no import baseline can be found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFallback {
    /// Import the latest origin revision, with a warning
    #[default]
    Latest,
    Fail,
}

/// Everything the orchestrator needs to know about one migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    /// Migration-owned destination paths
    pub destination_files: FileSet,
    /// Enables consistency-record tracking
    pub record_path: Option<String>,
    pub autopatch: Option<AutoPatchConfig>,
    pub hash_algorithm: HashAlgorithm,
    pub import_fallback: ImportFallback,
}

impl Migration {
    /// `destination_files` without the generated artifacts.
    pub fn diff_files(&self) -> RegenResult<FileSet> {
        if let Some(cfg) = &self.autopatch {
            cfg.validate()?;
        }
        self.destination_files
            .difference(&self.generated_globs())
            .map_err(|e| RegenError::Validation(format!("invalid file set for `{}`: {e}", self.name)))
    }

    fn generated_globs(&self) -> Vec<String> {
        let mut globs = Vec::new();
        if let Some(cfg) = &self.autopatch {
            globs.push(cfg.autopatch_glob());
        }
        if let Some(record) = &self.record_path {
            globs.push(globset::escape(record));
        }
        globs
    }
}

/// Outcome of one regeneration.
#[derive(Debug, Clone, Serialize)]
pub struct RegenerateReport {
    pub migration: String,
    pub target: Resolution,
    pub baseline: Resolution,
    pub mode: TrackingMode,
    /// Auto-patch files written, relative to the destination root
    pub autopatches: Vec<String>,
    pub record_path: Option<String>,
    pub record_patches: Option<usize>,
    pub record_bytes: Option<usize>,
    /// False on a dry run
    pub committed: bool,
}

/// Owned scratch directories, removed on drop.
struct Workspace {
    _root: TempDir,
    premerge: PathBuf,
    checkout: PathBuf,
    record: PathBuf,
    import: PathBuf,
}

impl Workspace {
    fn create(workdir: Option<&Path>) -> RegenResult<Self> {
        let root = match workdir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| RegenError::io("create", dir, e))?;
                tempfile::Builder::new()
                    .prefix("regen-")
                    .tempdir_in(dir)
                    .map_err(|e| RegenError::io("create workspace in", dir, e))?
            }
            None => tempfile::Builder::new()
                .prefix("regen-")
                .tempdir()
                .map_err(|e| RegenError::io("create workspace in", std::env::temp_dir(), e))?,
        };

        let base = root.path().to_path_buf();
        let ws = Self {
            premerge: base.join("premerge"),
            checkout: base.join("checkout"),
            record: base.join("record"),
            import: base.join("import"),
            _root: root,
        };
        for dir in [&ws.premerge, &ws.checkout, &ws.record] {
            fs::create_dir_all(dir).map_err(|e| RegenError::io("create", dir, e))?;
        }
        debug!(workspace = %base.display(), "created regeneration workspace");
        Ok(ws)
    }
}

/// Drives one regeneration against a destination backend.
pub struct Regenerator<'a> {
    destination: &'a dyn DestinationPatchContract,
    pipeline: Option<&'a dyn ImportPipeline>,
    workdir: Option<PathBuf>,
    dry_run: bool,
    cancel: CancelToken,
}

impl<'a> Regenerator<'a> {
    pub fn new(destination: &'a dyn DestinationPatchContract) -> Self {
        Self {
            destination,
            pipeline: None,
            workdir: None,
            dry_run: false,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: &'a dyn ImportPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Parent directory for the per-invocation workspace.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self, step: &str) -> RegenResult<()> {
        if self.cancel.is_cancelled() {
            warn!(step, "regeneration interrupted");
            return Err(RegenError::Cancelled);
        }
        Ok(())
    }

    fn resolve_target(&self, request: &RegenerateRequest) -> RegenResult<Resolution> {
        if let Some(target) = &request.target_ref {
            return Ok(Resolution::Explicit(target.clone()));
        }
        match self.destination.infer_target()? {
            Some(target) => {
                info!(target = %target, "inferred regeneration target");
                Ok(Resolution::Inferred(target))
            }
            None => Err(RegenError::unresolvable(
                "regeneration target",
                format!(
                    "the {} destination has no pending change to infer; pass --regen-target",
                    self.destination.name()
                ),
            )),
        }
    }

    /// Pick the tracking mode and, in record mode, the baseline.
    fn resolve_mode(
        &self,
        migration: &Migration,
        request: &RegenerateRequest,
    ) -> RegenResult<Option<Resolution>> {
        if migration.record_path.is_none() || request.use_import_baseline {
            if migration.record_path.is_some() {
                warn!("--regen-import-baseline given, ignoring the consistency record");
            }
            return Ok(None);
        }

        if let Some(baseline) = &request.baseline_ref {
            return Ok(Some(Resolution::Explicit(baseline.clone())));
        }
        match self.destination.infer_baseline()? {
            Some(baseline) => {
                info!(baseline = %baseline, "inferred regeneration baseline");
                Ok(Some(Resolution::Inferred(baseline)))
            }
            None => Err(RegenError::unresolvable(
                "regeneration baseline",
                "pass --regen-baseline, or --regen-import-baseline to diff against a fresh import",
            )),
        }
    }

    fn resolve_import_baseline(
        &self,
        migration: &Migration,
        request: &RegenerateRequest,
        target: &str,
        workdir: &Path,
    ) -> RegenResult<Resolution> {
        if let Some(source) = &request.source_ref {
            return Ok(Resolution::Explicit(source.clone()));
        }
        if let Some(inferred) = self.destination.infer_import_baseline(target, workdir)? {
            info!(import_baseline = %inferred, "inferred import baseline");
            return Ok(Resolution::Inferred(inferred));
        }

        match migration.import_fallback {
            ImportFallback::Fail => Err(RegenError::unresolvable(
                "import baseline",
                "pass the origin revision as the source reference",
            )),
            ImportFallback::Latest => {
                let latest = self.pipeline.map(|p| p.latest_revision()).transpose()?.flatten();
                match latest {
                    Some(rev) => {
                        warn!(revision = %rev, "import baseline could not be inferred, falling back to latest origin revision");
                        Ok(Resolution::Fallback(rev))
                    }
                    None => Err(RegenError::unresolvable(
                        "import baseline",
                        "no origin revision is available; pass the source reference",
                    )),
                }
            }
        }
    }

    /// Run one regeneration.
    #[instrument(level = "info", skip_all, fields(migration = %migration.name))]
    pub fn run(&self, migration: &Migration, request: &RegenerateRequest) -> RegenResult<RegenerateReport> {
        let target = self.resolve_target(request)?;
        let baseline = self.resolve_mode(migration, request)?;
        let mode = if baseline.is_some() {
            TrackingMode::ConsistencyRecord
        } else {
            TrackingMode::ImportBaseline
        };

        // Fail before any tree is materialized
        if let (Some(baseline), Some(record_path)) = (&baseline, &migration.record_path) {
            if !self.destination.exists(baseline.reference(), record_path)? {
                return Err(RegenError::MissingConsistencyRecord {
                    baseline: baseline.reference().to_string(),
                    path: record_path.clone(),
                });
            }
        }

        let ws = Workspace::create(self.workdir.as_deref())?;
        let diff_files = migration.diff_files()?;

        let baseline = match baseline {
            Some(baseline) => {
                self.prepare_from_record(migration, baseline.reference(), target.reference(), &ws)?;
                baseline
            }
            None => {
                let source = self.resolve_import_baseline(migration, request, target.reference(), &ws.import)?;
                self.prepare_from_import(migration, source.reference(), target.reference(), &diff_files, &ws)?;
                source
            }
        };
        info!(%mode, target = %target, baseline = %baseline, "prepared pristine and target trees");
        self.check_cancelled("diff")?;

        let autopatches = match &migration.autopatch {
            Some(cfg) => {
                let mut cfg = cfg.clone();
                if let Some(record) = &migration.record_path {
                    cfg.file_set = cfg
                        .file_set
                        .difference(&[globset::escape(record)])
                        .map_err(|e| RegenError::Validation(format!("invalid autopatch file set: {e}")))?;
                }
                cfg.output_directory = Some(ws.checkout.clone());
                autopatch::generate(&ws.premerge, &ws.checkout, &cfg)?
            }
            None => Vec::new(),
        };

        let (record_patches, record_bytes) = match &migration.record_path {
            Some(record_path) => {
                let record =
                    ConsistencyRecord::generate(&ws.premerge, &ws.checkout, &diff_files, migration.hash_algorithm)?;
                let bytes = record.to_bytes()?;
                let dest = ws.checkout.join(record_path);
                write_atomic(&dest, &bytes).map_err(|e| RegenError::io("write", &dest, e))?;
                info!(path = %record_path, patches = record.patches().len(), "wrote consistency record");
                (Some(record.patches().len()), Some(bytes.len()))
            }
            None => (None, None),
        };

        self.check_cancelled("commit")?;

        let committed = if self.dry_run {
            info!("dry run, leaving the destination untouched");
            false
        } else {
            let updated = TreeHandle::scan(&ws.checkout, &migration.destination_files)?;
            self.destination
                .update_change(target.reference(), &updated, &migration.destination_files)?;
            info!(target = %target, files = updated.file_count, "updated destination change");
            true
        };

        Ok(RegenerateReport {
            migration: migration.name.clone(),
            target,
            baseline,
            mode,
            autopatches,
            record_path: migration.record_path.clone(),
            record_patches,
            record_bytes,
            committed,
        })
    }

    /// Recover the pristine tree by reversing the baseline's record.
    fn prepare_from_record(
        &self,
        migration: &Migration,
        baseline: &str,
        target: &str,
        ws: &Workspace,
    ) -> RegenResult<()> {
        let Some(record_path) = &migration.record_path else {
            return Err(RegenError::Validation(format!(
                "migration `{}` has no record path",
                migration.name
            )));
        };

        let bytes = self
            .destination
            .read_file(baseline, record_path)?
            .ok_or_else(|| RegenError::MissingConsistencyRecord {
                baseline: baseline.to_string(),
                path: record_path.clone(),
            })?;
        let copy = ws.record.join("record");
        write_atomic(&copy, &bytes).map_err(|e| RegenError::io("write", &copy, e))?;
        let record = ConsistencyRecord::from_bytes(&bytes)?;

        // The record's own file set is the scope its manifest covers
        self.destination.read_tree(baseline, record.files(), &ws.premerge)?;
        self.destination
            .read_tree(target, &migration.destination_files, &ws.checkout)?;
        self.check_cancelled("reverse apply")?;

        record.reverse_apply(&ws.premerge)
    }

    /// Rebuild the pristine tree from a fresh import of `source`.
    fn prepare_from_import(
        &self,
        migration: &Migration,
        source: &str,
        target: &str,
        diff_files: &FileSet,
        ws: &Workspace,
    ) -> RegenResult<()> {
        let Some(pipeline) = self.pipeline else {
            return Err(RegenError::Validation(format!(
                "migration `{}` has no origin to import {source} from",
                migration.name
            )));
        };

        let imported = pipeline.materialize(source, &ws.import)?;
        debug!(origin = pipeline.name(), files = imported.file_count, "materialized import");
        tree::copy_file_set(&imported.root, &ws.premerge, diff_files)?;
        self.destination
            .read_tree(target, &migration.destination_files, &ws.checkout)?;
        Ok(())
    }
}
