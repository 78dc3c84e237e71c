use std::process::ExitCode;

use clap::Parser;
use patchkeep::cli::{AppContext, Cli, Commands};
use patchkeep::core::error::{RegenError, exit_code_for_anyhow};
use miette::{GraphicalReportHandler, GraphicalTheme};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn init_logging(ctx: &AppContext) {
    let default = if ctx.verbose {
        "debug"
    } else if ctx.quiet {
        "warn"
    } else {
        "info"
    };

    // PATCHKEEP_LOG wins over RUST_LOG, both over the flags
    let filter = std::env::var("PATCHKEEP_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!ctx.no_color)
        .with_target(false)
        .init();
}

fn report(err: &anyhow::Error, ctx: &AppContext) {
    let Some(regen) = err.chain().find_map(|c| c.downcast_ref::<RegenError>()) else {
        eprintln!("Error: {err:#}");
        return;
    };

    // Outer context added by the command handlers
    if err.to_string() != regen.to_string() {
        eprintln!("Error: {err}");
    }

    let handler = if ctx.no_color {
        GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor())
    } else {
        GraphicalReportHandler::new()
    }
    .with_width(400);
    let mut out = String::new();
    match handler.render_report(&mut out, regen) {
        Ok(()) => eprint!("{out}"),
        Err(_) => eprintln!("Error: {regen}"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = cli.context();
    init_logging(&ctx);

    if let Err(e) = patchkeep::infra::signal::install_interrupt_handlers() {
        warn!(error = %e, "cannot install interrupt handlers");
    }

    let result = match cli.command {
        Commands::Regenerate(args) => patchkeep::cli_ext::regenerate_cmd::run(args, &ctx),
        Commands::Inspect(args) => patchkeep::cli_ext::record_cmd::inspect(args, &ctx),
        Commands::Verify(args) => patchkeep::cli_ext::record_cmd::verify(args, &ctx),
        Commands::Init(args) => patchkeep::infra::config::init(args, &ctx),
        Commands::Completions(args) => patchkeep::completion::run(args, &ctx),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, &ctx);
            let code = exit_code_for_anyhow(&e);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
