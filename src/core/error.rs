//! Regeneration error taxonomy and exit-code mapping
//!
//! Every failure of the regeneration engine is a [`RegenError`]. Variants
//! fall into a small number of [`ErrorKind`] categories and the CLI maps
//! categories, not variants, to exit codes:
//! 0=success, 2=integrity, 3=validation, 4=repo/system, 5=internal,
//! 130=cancelled.

use std::fmt;
use std::io;
use std::path::PathBuf;

use miette::Diagnostic;

use crate::infra::process::ToolOutput;

/// Convenience alias for library results.
pub type RegenResult<T> = std::result::Result<T, RegenError>;

/// One path whose content disagrees with the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEntry {
    pub path: String,
    /// Hex digest the manifest expects; `None` when the path should not exist
    pub expected: Option<String>,
    /// Hex digest found; `None` when the path is missing
    pub actual: Option<String>,
}

impl fmt::Display for DriftEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.expected, &self.actual) {
            (Some(e), Some(a)) => write!(f, "{}: expected {}, found {}", self.path, short(e), short(a)),
            (Some(e), None) => write!(f, "{}: missing (expected {})", self.path, short(e)),
            (None, Some(a)) => write!(f, "{}: unexpected file ({})", self.path, short(a)),
            (None, None) => write!(f, "{}", self.path),
        }
    }
}

fn short(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

/// All mismatching paths found by one verification, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} path(s) drifted", self.entries.len())?;
        for entry in &self.entries {
            write!(f, "\n  • {entry}")?;
        }
        Ok(())
    }
}

/// Coarse error categories used for exit codes and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator input or configuration must be fixed
    Validation,
    /// Tree does not match what a record expects
    Integrity,
    /// External tool failure or timeout
    Tool,
    /// Destination/origin read or write failure
    Backend,
    /// Interrupted before commit
    Cancelled,
}

/// Domain error for the regeneration engine.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum RegenError {
    #[error("cannot resolve {what}")]
    #[diagnostic(code(patchkeep::unresolvable_reference))]
    UnresolvableReference {
        what: String,
        #[help]
        hint: Option<String>,
    },

    #[error("no consistency record at {path} in baseline {baseline}")]
    #[diagnostic(
        code(patchkeep::missing_record),
        help("regenerate with --regen-import-baseline, or import the change again to create a record")
    )]
    MissingConsistencyRecord { baseline: String, path: String },

    #[error("refusing to write into {}: it is inside the git work tree at {}", .path.display(), .repo.display())]
    #[diagnostic(
        code(patchkeep::unsafe_workspace),
        help("use a workdir outside any repository checkout")
    )]
    UnsafeWorkspace { path: PathBuf, repo: PathBuf },

    #[error("invalid input: {0}")]
    #[diagnostic(code(patchkeep::validation))]
    Validation(String),

    #[error("tree drifted from the consistency record: {0}")]
    #[diagnostic(
        code(patchkeep::drift),
        help("the destination changed outside the recorded patches; inspect the listed paths")
    )]
    Drift(DriftReport),

    #[error("patch for {path} does not apply: {reason}")]
    #[diagnostic(code(patchkeep::conflict))]
    Conflict { path: String, reason: String },

    #[error("malformed consistency record: {0}")]
    #[diagnostic(code(patchkeep::malformed_record))]
    MalformedRecord(String),

    #[error("`{command}` {outcome}{}", stderr_suffix(.stderr))]
    #[diagnostic(code(patchkeep::tool))]
    Tool {
        command: String,
        outcome: String,
        status: Option<i32>,
        timed_out: bool,
        stdout: String,
        stderr: String,
    },

    #[error("{backend} backend: {message}")]
    #[diagnostic(code(patchkeep::backend))]
    Backend { backend: &'static str, message: String },

    #[error("failed to {action} {}", .path.display())]
    #[diagnostic(code(patchkeep::io))]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("regeneration cancelled before commit")]
    #[diagnostic(code(patchkeep::cancelled))]
    Cancelled,
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl RegenError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegenError::UnresolvableReference { .. }
            | RegenError::MissingConsistencyRecord { .. }
            | RegenError::UnsafeWorkspace { .. }
            | RegenError::Validation(_)
            | RegenError::MalformedRecord(_) => ErrorKind::Validation,
            RegenError::Drift(_) | RegenError::Conflict { .. } => ErrorKind::Integrity,
            RegenError::Tool { .. } => ErrorKind::Tool,
            RegenError::Backend { .. } | RegenError::Io { .. } => ErrorKind::Backend,
            RegenError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn unresolvable(what: impl Into<String>, hint: impl Into<String>) -> Self {
        RegenError::UnresolvableReference {
            what: what.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        RegenError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        RegenError::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Backend error that keeps the display of its cause.
    pub fn backend_with(
        backend: &'static str,
        message: impl fmt::Display,
        source: impl fmt::Display,
    ) -> Self {
        RegenError::Backend {
            backend,
            message: format!("{message}: {source}"),
        }
    }

    /// Turn a finished process into a tool error (used for nonzero exits).
    pub fn tool(output: &ToolOutput) -> Self {
        RegenError::Tool {
            command: output.command_line(),
            outcome: output.outcome(),
            status: output.status,
            timed_out: output.timed_out,
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        }
    }
}

/// Converts errors to process exit codes
/// 0=success, 2=integrity, 3=validation, 4=repo/system, 130=cancelled
pub fn exit_code_for(e: &RegenError) -> i32 {
    match e.kind() {
        ErrorKind::Integrity => 2,
        ErrorKind::Validation => 3,
        ErrorKind::Tool | ErrorKind::Backend => 4,
        ErrorKind::Cancelled => 130,
    }
}

/// Exit code for an application-level error chain.
/// Anything that is not a `RegenError` is an internal failure (5).
pub fn exit_code_for_anyhow(e: &anyhow::Error) -> i32 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<RegenError>())
        .map_or(5, exit_code_for)
}
