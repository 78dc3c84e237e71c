//! `pkeep completions`: shell completion scripts.
//!
//! Scripts are rendered in memory and installed with the same atomic write
//! the engine uses, so reinstalling never leaves a torn script behind in a
//! shell's completion directory.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Generator, Shell, generate};

use crate::cli::{AppContext, Cli, CompletionsArgs};
use crate::infra::io::write_atomic;

pub const BIN_NAME: &str = "pkeep";

/// The completion script for `shell`.
pub fn render(shell: Shell) -> Vec<u8> {
    let mut cmd = Cli::command();
    let mut script = Vec::new();
    generate(shell, &mut cmd, BIN_NAME, &mut script);
    script
}

/// File name the shell looks for (`pkeep.bash`, `_pkeep`, ...).
pub fn script_name(shell: Shell) -> String {
    shell.file_name(BIN_NAME)
}

pub fn run(args: CompletionsArgs, ctx: &AppContext) -> Result<()> {
    let script = render(args.shell);

    if args.stdout {
        io::stdout().write_all(&script).context("write completion to stdout")?;
        return Ok(());
    }

    let dir: PathBuf = args
        .out_dir
        .context("--out-dir is required unless --stdout is set")?;
    let path = dir.join(script_name(args.shell));
    write_atomic(&path, &script).with_context(|| format!("write {}", path.display()))?;

    if !ctx.quiet {
        eprintln!("Wrote {} completion to {}", args.shell, path.display());
    }
    Ok(())
}
