// SPDX-License-Identifier: Apache-2.0

use crate::{split_argv, BatchError, BatchErrorCode, CommandRunner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TASK_FILE_SCHEMA_VERSION: u32 = 1;

const FAILURE_MARKER_SUFFIX: &str = ".failed";

/// Array index variables set by LSF and SGE respectively.
pub const TASK_INDEX_ENV: [&str; 2] = ["LSB_JOBINDEX", "SGE_TASK_ID"];

/// Command lines of one array job, addressed by 1-based task index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskFile {
    pub schema_version: u32,
    pub commands: Vec<Vec<String>>,
}

impl TaskFile {
    #[must_use]
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Self {
            schema_version: TASK_FILE_SCHEMA_VERSION,
            commands,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), BatchError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| BatchError::new(BatchErrorCode::InvalidTask, e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| {
            BatchError::new(BatchErrorCode::Io, format!("write {}: {e}", path.display()))
        })
    }

    pub fn read(path: &Path) -> Result<Self, BatchError> {
        let bytes = std::fs::read(path).map_err(|e| {
            BatchError::new(BatchErrorCode::Io, format!("read {}: {e}", path.display()))
        })?;
        let file: Self = serde_json::from_slice(&bytes).map_err(|e| {
            BatchError::new(
                BatchErrorCode::InvalidTask,
                format!("{} is not a task file: {e}", path.display()),
            )
        })?;
        if file.schema_version != TASK_FILE_SCHEMA_VERSION {
            return Err(BatchError::new(
                BatchErrorCode::InvalidTask,
                format!("unsupported task file schema {}", file.schema_version),
            ));
        }
        Ok(file)
    }

    pub fn command(&self, index: usize) -> Result<&[String], BatchError> {
        index
            .checked_sub(1)
            .and_then(|i| self.commands.get(i))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                BatchError::new(
                    BatchErrorCode::InvalidTask,
                    format!("task index {index} outside 1..={}", self.commands.len()),
                )
            })
    }
}

/// Task index of the current array element, if the scheduler set one.
#[must_use]
pub fn task_index_from_env() -> Option<usize> {
    TASK_INDEX_ENV
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find_map(|raw| raw.trim().parse::<usize>().ok())
}

/// Runs one command of a task file and returns its exit status.
pub fn run_task(runner: &dyn CommandRunner, tasks: &Path, index: usize) -> Result<i32, BatchError> {
    let file = TaskFile::read(tasks)?;
    let (program, args) = split_argv(file.command(index)?)?;
    tracing::info!(tasks = %tasks.display(), index, program, "running task");
    let output = runner.run(program, args, &[])?;
    if !output.success() {
        tracing::error!(index, status = output.status, stderr = %output.stderr.trim(), "task failed");
        let marker = failure_marker(tasks, index);
        if let Err(e) = std::fs::write(&marker, output.status.to_string()) {
            tracing::warn!(marker = %marker.display(), error = %e, "failed to record task failure");
        }
    }
    Ok(output.status)
}

fn failure_marker(tasks: &Path, index: usize) -> PathBuf {
    let mut name = tasks.as_os_str().to_os_string();
    name.push(format!(".{index}{FAILURE_MARKER_SUFFIX}"));
    PathBuf::from(name)
}

/// Exit codes recorded by failed tasks of `tasks`, in task order. The
/// finish stage starts once stage 1 has ended regardless of outcome, so it
/// checks these before signing a job off.
#[must_use]
pub fn failed_task_codes(tasks: &Path) -> Vec<i32> {
    let Ok(file) = TaskFile::read(tasks) else {
        return Vec::new();
    };
    (1..=file.commands.len())
        .filter_map(|index| std::fs::read_to_string(failure_marker(tasks, index)).ok())
        .map(|raw| raw.trim().parse::<i32>().unwrap_or(1))
        .collect()
}
