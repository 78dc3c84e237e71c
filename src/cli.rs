use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub verbose: bool,  // global --verbose
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "pkeep")]
#[command(
    about = "Keep destination-side edits alive across repeated code migrations"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log every step
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run every step but leave the destination untouched
    #[arg(long, global = true)]
    pub dry_run: bool,
}

impl Cli {
    pub fn context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            verbose: self.verbose,
            no_color: self.no_color,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recompute the destination-only patches of a pending change
    Regenerate(RegenerateArgs),

    /// Show the contents of a consistency record
    Inspect(InspectArgs),

    /// Check that a tree still matches a consistency record
    Verify(VerifyArgs),

    /// Initialize a patchkeep.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RegenerateArgs {
    /// Migration config file
    #[arg(value_hint = ValueHint::FilePath)]
    pub config: PathBuf,

    /// Migration name inside the config
    pub migration: String,

    /// Origin revision to diff against in import-baseline mode
    pub source_ref: Option<String>,

    /// Revision holding the consistency record to start from
    #[arg(long, value_name = "REF")]
    pub regen_baseline: Option<String>,

    /// Pending change to regenerate
    #[arg(long, value_name = "REF")]
    pub regen_target: Option<String>,

    /// Diff against a fresh import instead of the consistency record.
    /// Takes an explicit value only as `--regen-import-baseline=<BOOL>`
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        default_value_t = false,
        value_name = "BOOL"
    )]
    pub regen_import_baseline: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Consistency record file
    #[arg(value_hint = ValueHint::FilePath)]
    pub record: PathBuf,

    /// Print as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Consistency record file
    #[arg(value_hint = ValueHint::FilePath)]
    pub record: PathBuf,

    /// Edited tree the record was generated for
    #[arg(value_hint = ValueHint::DirPath)]
    pub tree: PathBuf,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory (or file path) to initialize config in
    #[arg(default_value = ".", value_hint = ValueHint::AnyPath)]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Directory to install the script into, under the shell's usual name
    #[arg(long, value_hint = ValueHint::DirPath, required_unless_present = "stdout")]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
