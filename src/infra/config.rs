use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::autopatch::{AutoPatchConfig, DEFAULT_SUFFIX};
use crate::core::error::RegenError;
use crate::core::manifest::HashAlgorithm;
use crate::core::regenerate::{ImportFallback, Migration};
use crate::infra::walk::{FileSet, GlobSpec, is_normalized_rel};

/// Default file name written by `pkeep init`
pub const CONFIG_FILE: &str = "patchkeep.toml";

const ENV_PREFIX: &str = "PATCHKEEP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchkeepConfig
{
    #[serde(default)]
    pub settings: Settings,

    /// Migrations by name
    #[serde(default)]
    pub migrations: BTreeMap<String, MigrationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings
{
    /// Digest used for new manifests
    pub hash_algorithm: HashAlgorithm,

    /// Upper bound for every external tool call
    pub tool_timeout_secs: u64,

    /// Parent of per-run workspaces; a fresh temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Policy when no import baseline can be resolved
    pub import_fallback: ImportFallback,
}

impl Default for Settings
{
    fn default() -> Self
    {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            tool_timeout_secs: 120,
            workdir: None,
            import_fallback: ImportFallback::default(),
        }
    }
}

impl Settings
{
    pub fn tool_timeout(&self) -> Duration
    {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Where trees come from or go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointConfig
{
    Folder
    {
        path: PathBuf
    },
    Git
    {
        repo: PathBuf,
        /// Origin label trailer (destinations only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

impl EndpointConfig
{
    fn location_mut(&mut self) -> &mut PathBuf
    {
        match self
        {
            EndpointConfig::Folder { path } => path,
            EndpointConfig::Git { repo, .. } => repo,
        }
    }
}

fn default_suffix() -> String
{
    DEFAULT_SUFFIX.to_string()
}

fn default_include() -> Vec<String>
{
    GlobSpec::default().include
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoPatchSettings
{
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    #[serde(default = "default_suffix")]
    pub suffix: String,

    #[serde(default)]
    pub directory_prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    #[serde(default)]
    pub strip_filenames: bool,

    #[serde(default)]
    pub strip_line_numbers: bool,

    /// Source files that get patch files
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl AutoPatchSettings
{
    fn to_config(&self) -> Result<AutoPatchConfig>
    {
        let config = AutoPatchConfig {
            header: self
                .header
                .clone(),
            suffix: self
                .suffix
                .clone(),
            directory_prefix: self
                .directory_prefix
                .clone(),
            directory: self
                .directory
                .clone(),
            output_directory: None,
            strip_filenames: self.strip_filenames,
            strip_line_numbers: self.strip_line_numbers,
            file_set: FileSet::new(&self.include, &self.exclude)
                .map_err(|e| RegenError::Validation(format!("invalid autopatch globs: {e}")))?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig
{
    /// Record location inside the destination; enables record tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,

    /// Migration-owned destination paths
    #[serde(default)]
    pub destination_files: GlobSpec,

    /// Origin paths that are imported
    #[serde(default)]
    pub origin_files: GlobSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<EndpointConfig>,

    pub destination: EndpointConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopatch: Option<AutoPatchSettings>,
}

impl MigrationConfig
{
    /// Compile into the orchestrator's view of this migration.
    pub fn to_migration(
        &self,
        name: &str,
        settings: &Settings,
    ) -> Result<Migration>
    {
        if let Some(record) = &self.record_path
        {
            if !is_normalized_rel(record)
            {
                return Err(RegenError::Validation(format!(
                    "record_path `{record}` of migration `{name}` must be a normalized relative path"
                ))
                .into());
            }
        }

        let destination_files = FileSet::from_spec(&self.destination_files)
            .map_err(|e| RegenError::Validation(format!("invalid destination_files for `{name}`: {e}")))?;
        let autopatch = self
            .autopatch
            .as_ref()
            .map(AutoPatchSettings::to_config)
            .transpose()?;

        Ok(Migration {
            name: name.to_string(),
            destination_files,
            record_path: self
                .record_path
                .clone(),
            autopatch,
            hash_algorithm: settings.hash_algorithm,
            import_fallback: settings.import_fallback,
        })
    }

    pub fn origin_file_set(&self) -> Result<FileSet>
    {
        let files = FileSet::from_spec(&self.origin_files)
            .map_err(|e| RegenError::Validation(format!("invalid origin_files: {e}")))?;
        Ok(files)
    }
}

impl PatchkeepConfig
{
    pub fn migration(
        &self,
        name: &str,
    ) -> Result<&MigrationConfig>
    {
        let found = self
            .migrations
            .get(name)
            .ok_or_else(|| {
                let known: Vec<&str> = self
                    .migrations
                    .keys()
                    .map(String::as_str)
                    .collect();
                RegenError::Validation(format!("no migration named `{name}` (known: {})", known.join(", ")))
            })?;
        Ok(found)
    }

    /// Sample configuration written by `init`.
    pub fn sample() -> Self
    {
        let migration = MigrationConfig {
            record_path: Some(".patchkeep/record.json".to_string()),
            destination_files: GlobSpec { include: vec!["**".to_string()], exclude: vec![CONFIG_FILE.to_string()] },
            origin_files: GlobSpec::default(),
            origin: Some(EndpointConfig::Folder { path: PathBuf::from("../upstream") }),
            destination: EndpointConfig::Folder { path: PathBuf::from(".") },
            autopatch: Some(AutoPatchSettings {
                header: Some("# Generated by pkeep; edit the destination, not this file".to_string()),
                suffix: default_suffix(),
                directory_prefix: "patches".to_string(),
                directory: None,
                strip_filenames: false,
                strip_line_numbers: true,
                include: default_include(),
                exclude: vec![],
            }),
        };

        Self { settings: Settings::default(), migrations: BTreeMap::from([("example".to_string(), migration)]) }
    }
}

/// Expand `~`/`$VAR` and anchor relative paths at `base`.
fn resolve_path(
    base: &Path,
    path: &Path,
) -> Result<PathBuf>
{
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| RegenError::Validation(format!("cannot expand path `{raw}`: {e}")))?;
    let expanded = PathBuf::from(expanded.as_ref());

    Ok(if expanded.is_absolute() { expanded } else { base.join(expanded) })
}

/// Load a config file, layered with `PATCHKEEP__*` environment variables.
/// Relative paths inside it resolve against the file's directory.
pub fn load_config(path: &Path) -> Result<PatchkeepConfig>
{
    if !path.is_file()
    {
        return Err(RegenError::Validation(format!("config file not found at {}", path.display())).into());
    }

    let cfg = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| RegenError::Validation(format!("cannot load {}: {e}", path.display())))?;
    let mut parsed: PatchkeepConfig = cfg
        .try_deserialize()
        .map_err(|e| RegenError::Validation(format!("cannot parse {}: {e}", path.display())))?;

    let base = match path.parent()
    {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if let Some(workdir) = &parsed
        .settings
        .workdir
    {
        parsed
            .settings
            .workdir = Some(resolve_path(&base, workdir)?);
    }
    for migration in parsed
        .migrations
        .values_mut()
    {
        let dest = migration
            .destination
            .location_mut();
        *dest = resolve_path(&base, dest)?;

        if let Some(origin) = migration
            .origin
            .as_mut()
        {
            let loc = origin.location_mut();
            *loc = resolve_path(&base, loc)?;
        }
    }

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = if !args
        .path
        .is_dir()
        && args
            .path
            .extension()
            .is_some()
    {
        args.path
    }
    else
    {
        args.path
            .join(CONFIG_FILE)
    };

    if config_path.exists() && !args.force
    {
        return Err(RegenError::Validation(format!(
            "config file already exists at {}; use --force to overwrite",
            config_path.display()
        ))
        .into());
    }

    let body = toml::to_string_pretty(&PatchkeepConfig::sample())
        .context("Failed to serialize default config")?;
    let contents = format!(
        "# patchkeep configuration\n\
         # Paths are relative to this file. Override settings with\n\
         # PATCHKEEP__SETTINGS__<KEY> environment variables.\n\n{body}"
    );

    if let Some(parent) = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    std::fs::write(&config_path, contents).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
