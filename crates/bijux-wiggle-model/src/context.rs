// SPDX-License-Identifier: Apache-2.0

use crate::JobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Binary signal track.
    Track,
    /// Tabular text result, optionally paired with a chart.
    Table,
}

impl OutputKind {
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Track => ".bw",
            Self::Table => ".txt",
        }
    }
}

/// Hand-off record written at dispatch time and read by the finish stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobContext {
    pub job_id: JobId,
    pub database: PathBuf,
    pub destination: String,
    pub output_kind: OutputKind,
    /// Command reading the stage-1 outputs (histogram, apply_paste).
    #[serde(default)]
    pub finish_command: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Task files and other scratch to delete once the job is signed off.
    #[serde(default)]
    pub temps: Vec<PathBuf>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub description: String,
}
