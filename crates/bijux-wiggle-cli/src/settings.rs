// SPDX-License-Identifier: Apache-2.0

use crate::CliError;
use bijux_wiggle_core::{resolve_bijux_cache_dir, resolve_bijux_config_path, ConfigPathScope};
use bijux_wiggle_engine::{EngineConfig, S3Target};
use bijux_wiggle_model::BatchBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_STAGE_PROGRAM: &str = "bijux-wiggle";

/// Contents of `wiggle.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub database: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub batch_system: Option<String>,
    pub wiggletools: Option<String>,
    pub stage_program: Option<String>,
    pub queue: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub aws_config: Option<PathBuf>,
}

impl FileConfig {
    pub(crate) fn parse(raw: &str, origin: &Path) -> Result<Self, CliError> {
        toml::from_str(raw).map_err(|e| {
            CliError::validation(format!("invalid config {}: {e}", origin.display()))
        })
    }
}

/// The explicit path, else the first existing user or workspace file.
pub(crate) fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    [ConfigPathScope::User, ConfigPathScope::Workspace]
        .into_iter()
        .map(resolve_bijux_config_path)
        .find(|path| path.is_file())
}

pub(crate) fn read_file_config(path: Option<&Path>) -> Result<FileConfig, CliError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CliError::usage(format!("cannot read config {}: {e}", path.display())))?;
    FileConfig::parse(&raw, path)
}

fn default_stage_program() -> String {
    std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| DEFAULT_STAGE_PROGRAM.to_string())
}

/// Builds the immutable engine settings; `--db` wins over the file.
pub(crate) fn engine_config(
    file: &FileConfig,
    config_file: Option<&Path>,
    database: Option<&Path>,
) -> Result<EngineConfig, CliError> {
    let database = database
        .map(Path::to_path_buf)
        .or_else(|| file.database.clone())
        .ok_or_else(|| {
            CliError::usage("no database configured; pass --db or set `database` in wiggle.toml")
        })?;
    let backend = match &file.batch_system {
        Some(raw) => raw
            .parse::<BatchBackend>()
            .map_err(|e| CliError::validation(e.to_string()))?,
        None => BatchBackend::Sge,
    };
    let working_directory = file
        .working_directory
        .clone()
        .unwrap_or_else(|| resolve_bijux_cache_dir().join("wiggle"));
    let s3 = match (&file.s3_bucket, &file.s3_region) {
        (Some(bucket), Some(region)) => Some(S3Target {
            bucket: bucket.clone(),
            region: region.clone(),
            aws_config: file.aws_config.clone(),
        }),
        (None, None) => None,
        _ => {
            return Err(CliError::validation(
                "s3_bucket and s3_region must be set together",
            ))
        }
    };

    let mut config = EngineConfig::new(database, working_directory, backend);
    if let Some(wiggletools) = &file.wiggletools {
        config.wiggletools = wiggletools.clone();
    }
    config.stage_program = file
        .stage_program
        .clone()
        .unwrap_or_else(default_stage_program);
    config.queue = file.queue.clone();
    config.s3 = s3;
    config.config_file = config_file.map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    Ok(config)
}
