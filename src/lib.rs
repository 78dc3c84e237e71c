//! **patchkeep** - keeps destination-side edits alive across repeated code migrations
//!
//! Records the edits a reviewer made on top of an imported tree as a verifiable
//! consistency record, and regenerates that record (plus reviewable per-file
//! patches) after further edits.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Command handlers behind the CLI
pub mod cli_ext {
    /// `regenerate`: backends from config, then the orchestrator
    pub mod regenerate_cmd;

    /// `inspect` and `verify` over record files
    pub mod record_cmd;
}

/// Regeneration engine
pub mod core {
    /// Error taxonomy and exit codes
    pub mod error;
    pub use error::{RegenError, RegenResult};

    /// Per-file digests of a tree
    pub mod manifest;
    pub use manifest::{HashAlgorithm, Manifest};

    /// Unified diffs: generate, render, parse, apply
    pub mod patch;

    /// Consistency records and their reversal
    pub mod record;
    pub use record::ConsistencyRecord;

    /// Versioned JSON envelope for records
    pub mod codec;

    /// Trees on disk addressed by relative path
    pub mod tree;

    /// Reviewable per-file patch files
    pub mod autopatch;

    /// Git plumbing through the git executable
    pub mod git;

    /// Destination backends
    pub mod destination;

    /// Origin import stand-ins
    pub mod origin;

    /// The regeneration state machine
    pub mod regenerate;
    pub use regenerate::{Migration, RegenerateReport, RegenerateRequest, Regenerator};
}

/// Infrastructure - configuration, I/O, processes and signals
pub mod infra {
    /// Migration config with TOML support and env overrides
    pub mod config;
    pub use config::{PatchkeepConfig, init as config_init, load_config};

    /// Memory-mapped file I/O for large files (>1MB threshold)
    pub mod io;
    pub use io::{FileContent, read_file_smart};

    /// Bounded external process execution
    pub mod process;

    /// Interrupt flag and cancellation tokens
    pub mod signal;

    /// File sets and deterministic tree walking
    pub mod walk;
    pub use walk::FileSet;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use core::{ConsistencyRecord, RegenError, Regenerator};
pub use infra::{FileSet, PatchkeepConfig, load_config};
