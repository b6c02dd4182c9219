// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_model::BatchBackend;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Long-term public copy of finished results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct S3Target {
    pub bucket: String,
    pub region: String,
    /// Exported as `AWS_CONFIG_FILE` for the copy.
    pub aws_config: Option<PathBuf>,
}

impl S3Target {
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("https://s3-{}.amazonaws.com/{}/", self.region, self.bucket)
    }

    #[must_use]
    pub fn object_uri(&self, location: &str) -> String {
        format!("s3://{}/{}", self.bucket, basename(location))
    }
}

/// Immutable settings handed to every engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub database: PathBuf,
    pub working_directory: PathBuf,
    pub backend: BatchBackend,
    pub wiggletools: String,
    pub stage_program: String,
    pub queue: Option<String>,
    pub s3: Option<S3Target>,
    /// Forwarded to the finish stage so compute nodes read the same settings.
    pub config_file: Option<PathBuf>,
}

impl EngineConfig {
    #[must_use]
    pub fn new(database: PathBuf, working_directory: PathBuf, backend: BatchBackend) -> Self {
        Self {
            database,
            working_directory,
            backend,
            wiggletools: "wiggletools".to_string(),
            stage_program: "bijux-wiggle".to_string(),
            queue: None,
            s3: None,
            config_file: None,
        }
    }

    #[must_use]
    pub fn public_url(&self, location: &str) -> Option<String> {
        self.s3.as_ref().map(|s3| public_url(s3, location))
    }
}

fn basename(location: &str) -> String {
    Path::new(location)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string())
}

/// Public address of a result copied to S3 under its basename.
#[must_use]
pub fn public_url(s3: &S3Target, location: &str) -> String {
    format!("{}{}", s3.base_url(), basename(location))
}
