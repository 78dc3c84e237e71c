//! `pkeep regenerate`: wire a configured migration to its backends and run
//! the orchestrator.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use crate::{
    cli::{AppContext, RegenerateArgs},
    core::{
        destination::{DestinationPatchContract, FolderDestination, GitDestination},
        origin::{FolderOrigin, GitOrigin, ImportPipeline},
        regenerate::{RegenerateReport, RegenerateRequest, Regenerator},
    },
    infra::{
        config::{EndpointConfig, MigrationConfig, Settings, load_config},
        signal::CancelToken,
    },
};

fn open_destination(
    endpoint: &EndpointConfig,
    settings: &Settings,
) -> Result<Box<dyn DestinationPatchContract>>
{
    let destination: Box<dyn DestinationPatchContract> = match endpoint
    {
        EndpointConfig::Folder { path } => Box::new(FolderDestination::new(path)),
        EndpointConfig::Git { repo, label } =>
        {
            Box::new(GitDestination::open(repo, label.as_deref(), settings.tool_timeout())?)
        }
    };
    Ok(destination)
}

fn open_origin(
    migration: &MigrationConfig,
    settings: &Settings,
) -> Result<Option<Box<dyn ImportPipeline>>>
{
    let Some(origin) = &migration.origin
    else
    {
        return Ok(None);
    };
    let files = migration.origin_file_set()?;

    let pipeline: Box<dyn ImportPipeline> = match origin
    {
        EndpointConfig::Folder { path } => Box::new(FolderOrigin::new(path, files)),
        EndpointConfig::Git { repo, .. } =>
        {
            Box::new(GitOrigin::open(repo, files, settings.tool_timeout())?)
        }
    };
    Ok(Some(pipeline))
}

#[instrument(skip_all, fields(migration = %args.migration))]
pub fn run(
    args: RegenerateArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config = load_config(&args.config)?;
    let migration_cfg = config.migration(&args.migration)?;
    let migration = migration_cfg.to_migration(&args.migration, &config.settings)?;

    let destination = open_destination(&migration_cfg.destination, &config.settings)
        .with_context(|| format!("Cannot open destination of `{}`", args.migration))?;
    let origin = open_origin(migration_cfg, &config.settings)
        .with_context(|| format!("Cannot open origin of `{}`", args.migration))?;
    debug!(destination = destination.name(), origin = ?origin.as_ref().map(|o| o.name()), "opened backends");

    let mut regenerator = Regenerator::new(&*destination)
        .dry_run(ctx.dry_run)
        .with_cancel(CancelToken::default());
    if let Some(origin) = origin.as_deref()
    {
        regenerator = regenerator.with_pipeline(origin);
    }
    if let Some(workdir) = &config
        .settings
        .workdir
    {
        regenerator = regenerator.with_workdir(workdir);
    }

    let request = RegenerateRequest {
        baseline_ref: args.regen_baseline,
        target_ref: args.regen_target,
        source_ref: args.source_ref,
        use_import_baseline: args.regen_import_baseline,
    };
    let report = regenerator.run(&migration, &request)?;

    if args.json
    {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    else if !ctx.quiet
    {
        print_report(&report, ctx);
    }
    Ok(())
}

fn print_report(
    report: &RegenerateReport,
    ctx: &AppContext,
)
{
    let status = if report.committed { "Regenerated" } else { "Dry run" };
    if ctx.no_color
    {
        println!("{} {}", status, report.migration);
    }
    else
    {
        println!("{} {}", status.green().bold(), report.migration.cyan());
    }

    println!("  Mode:     {}", report.mode);
    println!("  Target:   {}", report.target);
    println!("  Baseline: {}", report.baseline);

    if let (Some(path), Some(patches), Some(bytes)) =
        (&report.record_path, report.record_patches, report.record_bytes)
    {
        println!("  Record:   {path} ({patches} patch(es), {bytes} bytes)");
    }

    println!("  Autopatches: {}", report.autopatches.len());
    for path in &report.autopatches
    {
        println!("    {path}");
    }
}
