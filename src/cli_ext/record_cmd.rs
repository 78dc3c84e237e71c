//! `pkeep inspect` and `pkeep verify` over a record file.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde_json::json;
use tabled::{Table, Tabled};
use tracing::instrument;

use crate::{
    cli::{AppContext, InspectArgs, VerifyArgs},
    core::record::{ConsistencyRecord, Patch, read_record},
};

#[derive(Tabled)]
struct PatchRow
{
    path: String,
    change: String,
    encoding: &'static str,
    size: String,
}

#[derive(Tabled)]
struct EntryRow
{
    path: String,
    digest: String,
}

fn patch_row(patch: &Patch) -> PatchRow
{
    let (encoding, size) = match patch
    {
        Patch::Text(p) => ("text", format!("{} hunk(s)", p.hunks.len())),
        Patch::Binary(b) =>
        {
            let len = |v: &Option<Vec<u8>>| v.as_ref().map_or(0, Vec::len);
            ("binary", format!("{} -> {} bytes", len(&b.before), len(&b.after)))
        }
    };

    PatchRow { path: patch.path().to_string(), change: format!("{:?}", patch.change()).to_lowercase(), encoding, size }
}

fn summary_json(record: &ConsistencyRecord) -> serde_json::Value
{
    let patches: Vec<_> = record
        .patches()
        .iter()
        .map(|p| {
            json!({
                "path": p.path(),
                "change": p.change(),
                "binary": p.is_binary(),
            })
        })
        .collect();
    let manifest: Vec<_> = record
        .manifest()
        .entries()
        .iter()
        .map(|e| json!({ "path": e.path, "digest": e.hex() }))
        .collect();

    json!({
        "format_version": record.format_version(),
        "hash_algorithm": record.manifest().algorithm(),
        "files": record.files().spec(),
        "patches": patches,
        "manifest": manifest,
    })
}

#[instrument(skip_all, fields(record = %args.record.display()))]
pub fn inspect(
    args: InspectArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let record = read_record(&args.record)?;

    if args.json
    {
        println!("{}", serde_json::to_string_pretty(&summary_json(&record))?);
        return Ok(());
    }

    let spec = record
        .files()
        .spec();
    let title = format!("Consistency record v{}", record.format_version());
    if ctx.no_color
    {
        println!("{title}");
    }
    else
    {
        println!("{}", title.bold());
    }
    println!("  Algorithm: {}", record.manifest().algorithm().name());
    println!("  Include:   {}", spec.include.join(", "));
    if !spec
        .exclude
        .is_empty()
    {
        println!("  Exclude:   {}", spec.exclude.join(", "));
    }

    println!("\nPatches ({})", record.patches().len());
    if !record
        .patches()
        .is_empty()
    {
        let rows: Vec<PatchRow> = record
            .patches()
            .iter()
            .map(patch_row)
            .collect();
        println!("{}", Table::new(rows));
    }

    println!("\nManifest ({})", record.manifest().len());
    if !record
        .manifest()
        .is_empty()
    {
        let rows: Vec<EntryRow> = record
            .manifest()
            .entries()
            .iter()
            .map(|e| EntryRow { path: e.path.clone(), digest: e.hex() })
            .collect();
        println!("{}", Table::new(rows));
    }
    Ok(())
}

/// Check that reversing the record on `tree` reproduces its manifest.
/// The reversal is computed in memory, so the tree is never written.
#[instrument(skip_all, fields(record = %args.record.display(), tree = %args.tree.display()))]
pub fn verify(
    args: VerifyArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let record = read_record(&args.record)?;
    if !args
        .tree
        .is_dir()
    {
        anyhow::bail!("Tree {} is not a directory", args.tree.display());
    }

    let plan = record
        .plan_reverse(&args.tree)
        .with_context(|| format!("{} does not match {}", args.tree.display(), args.record.display()))?;

    if !ctx.quiet
    {
        let status = if ctx.no_color { "OK".to_string() } else { "OK".green().bold().to_string() };
        println!(
            "{status} {} patch(es) reverse cleanly; {} pristine file(s) verified",
            plan.len(),
            record.manifest().len()
        );
    }
    Ok(())
}
