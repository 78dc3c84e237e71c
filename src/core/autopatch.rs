//! Per-file patch generation for human review
//!
//! For every text file that differs between two trees, writes one unified
//! diff to `<output>/<directory_prefix>/<directory>/<path><suffix>`. Header,
//! file-name and line-number stripping keep the files stable across
//! machines and across unrelated upstream line shifts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::error::{RegenError, RegenResult};
use crate::core::git::enclosing_work_tree;
use crate::core::patch::{FilePatch, RenderOptions};
use crate::core::tree;
use crate::infra::io::text_view;
use crate::infra::walk::FileSet;

pub const DEFAULT_SUFFIX: &str = ".patch";

#[derive(Debug, Clone)]
pub struct AutoPatchConfig {
    /// Written verbatim before the diff
    pub header: Option<String>,
    pub suffix: String,
    pub directory_prefix: String,
    pub directory: Option<String>,
    /// Root the patch layout is written under; defaults to the next tree
    pub output_directory: Option<PathBuf>,
    pub strip_filenames: bool,
    pub strip_line_numbers: bool,
    /// Which source files get patch files
    pub file_set: FileSet,
}

impl Default for AutoPatchConfig {
    fn default() -> Self {
        Self {
            header: None,
            suffix: DEFAULT_SUFFIX.to_string(),
            directory_prefix: String::new(),
            directory: None,
            output_directory: None,
            strip_filenames: false,
            strip_line_numbers: false,
            file_set: FileSet::all(),
        }
    }
}

impl AutoPatchConfig {
    /// `<prefix>/<directory>` without empty segments.
    fn base_dir(&self) -> String {
        [self.directory_prefix.as_str(), self.directory.as_deref().unwrap_or("")]
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Patch files live in a directory of their own, so that the generator
    /// owns everything below it and nothing else.
    pub fn validate(&self) -> RegenResult<()> {
        if self.base_dir().is_empty() {
            return Err(RegenError::Validation(
                "autopatch needs a `directory_prefix` or `directory` to write patch files under".into(),
            ));
        }
        if self.suffix.is_empty() {
            return Err(RegenError::Validation("autopatch `suffix` must not be empty".into()));
        }
        Ok(())
    }

    /// Relative output path for the patch of `rel`.
    pub fn patch_path(&self, rel: &str) -> String {
        format!("{}/{rel}{}", self.base_dir(), self.suffix)
    }

    /// Glob selecting everything this generator owns.
    pub fn autopatch_glob(&self) -> String {
        format!("{}/**", globset::escape(&self.base_dir()))
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            file_names: !self.strip_filenames,
            line_numbers: !self.strip_line_numbers,
        }
    }
}

/// Write patch files for `previous -> next`. Returns the written paths
/// relative to the output root, sorted.
pub fn generate(previous: &Path, next: &Path, config: &AutoPatchConfig) -> RegenResult<Vec<String>> {
    config.validate()?;
    let output = config.output_directory.as_deref().unwrap_or(next);

    for dir in [previous, next, output] {
        if let Some(repo) = enclosing_work_tree(dir) {
            return Err(RegenError::UnsafeWorkspace {
                path: dir.to_path_buf(),
                repo,
            });
        }
    }

    // Drop stale patch files before writing the fresh set
    let owned = FileSet::new(&[config.autopatch_glob()], &[])
        .map_err(|e| RegenError::Validation(format!("invalid autopatch layout: {e}")))?;
    for stale in tree::list_files(output, &owned)? {
        tree::remove_file(output, &stale)?;
    }

    // Patch files never describe other patch files
    let sources = config
        .file_set
        .difference(&[config.autopatch_glob()])
        .map_err(|e| RegenError::Validation(format!("invalid autopatch file set: {e}")))?;
    let paths: BTreeSet<String> = tree::list_files(previous, &sources)?
        .into_iter()
        .chain(tree::list_files(next, &sources)?)
        .collect();

    let mut written = Vec::new();
    for rel in &paths {
        let before = tree::read_file(previous, rel)?;
        let after = tree::read_file(next, rel)?;
        if before == after {
            continue;
        }

        let (Some(old), Some(new)) = (text_view(before.as_deref()), text_view(after.as_deref())) else {
            warn!(path = %rel, "skipping autopatch for binary file");
            continue;
        };

        let Some(patch) = FilePatch::between(rel, old, new) else {
            continue;
        };

        let mut body = String::new();
        if let Some(header) = &config.header {
            body.push_str(header);
            if !header.ends_with('\n') {
                body.push('\n');
            }
        }
        body.push_str(&patch.render_with(config.render_options()));

        let out_rel = config.patch_path(rel);
        tree::write_file(output, &out_rel, body.as_bytes())?;
        debug!(path = %rel, patch = %out_rel, "wrote autopatch");
        written.push(out_rel);
    }

    info!(count = written.len(), output = %output.display(), "generated autopatch files");
    Ok(written)
}
