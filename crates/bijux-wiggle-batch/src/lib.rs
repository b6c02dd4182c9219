// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Batch scheduler adapters. Every external program goes through a
//! [`CommandRunner`] so scheduler interactions can be scripted in tests.

mod lsf;
mod runner;
mod sge;
mod synchronous;
mod tasks;

use bijux_wiggle_model::{BatchBackend, BatchHandle};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub use lsf::{parse_bjobs_states, parse_bsub_handle, LsfScheduler};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use sge::{parse_qacct_exit_codes, parse_qsub_handle, SgeScheduler};
pub use synchronous::SynchronousScheduler;
pub use tasks::{
    failed_task_codes, run_task, task_index_from_env, TaskFile, TASK_FILE_SCHEMA_VERSION,
    TASK_INDEX_ENV,
};

pub const CRATE_NAME: &str = "bijux-wiggle-batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BatchErrorCode {
    Spawn,
    SubmitRejected,
    UnparsableHandle,
    PollFailed,
    InvalidTask,
    Io,
}

impl BatchErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn_failed",
            Self::SubmitRejected => "submit_rejected",
            Self::UnparsableHandle => "unparsable_handle",
            Self::PollFailed => "poll_failed",
            Self::InvalidTask => "invalid_task",
            Self::Io => "io_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    pub code: BatchErrorCode,
    pub message: String,
}

impl BatchError {
    #[must_use]
    pub fn new(code: BatchErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for BatchError {}

/// What a stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageCommand {
    /// One array task per command line, dispatched through a task file.
    Array {
        commands: Vec<Vec<String>>,
        task_file: PathBuf,
    },
    /// A single command line.
    Single(Vec<String>),
}

impl StageCommand {
    #[must_use]
    pub fn task_count(&self) -> usize {
        match self {
            Self::Array { commands, .. } => commands.len(),
            Self::Single(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSubmission {
    pub name: String,
    pub command: StageCommand,
    /// Stage starts only after this one has ended.
    pub depends_on: Option<BatchHandle>,
    pub log_dir: PathBuf,
}

/// Result of a submission. Synchronous runs return exit codes instead of a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub handle: Option<BatchHandle>,
    pub exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    Active,
    Finished { exit_codes: Vec<i32> },
}

impl StageState {
    #[must_use]
    pub fn failed_codes(&self) -> Option<&[i32]> {
        match self {
            Self::Finished { exit_codes } if exit_codes.iter().any(|c| *c != 0) => {
                Some(exit_codes)
            }
            _ => None,
        }
    }
}

pub trait BatchScheduler: Send + Sync {
    fn backend(&self) -> BatchBackend;
    fn submit(&self, submission: &StageSubmission) -> Result<Submission, BatchError>;
    fn stage_state(&self, handle: &BatchHandle) -> Result<StageState, BatchError>;
}

/// Program and arguments shared by the cluster adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOptions {
    /// Executable re-entered on the compute node (`run-task`, `finish`).
    pub stage_program: String,
    pub queue: Option<String>,
}

impl ClusterOptions {
    fn argv(&self, command: &StageCommand) -> Result<Vec<String>, BatchError> {
        match command {
            StageCommand::Array { commands, task_file } => {
                TaskFile::new(commands.clone()).write(task_file)?;
                Ok(vec![
                    self.stage_program.clone(),
                    "run-task".to_string(),
                    "--tasks".to_string(),
                    task_file.display().to_string(),
                ])
            }
            StageCommand::Single(argv) => {
                if argv.is_empty() {
                    return Err(BatchError::new(BatchErrorCode::InvalidTask, "empty command line"));
                }
                Ok(argv.clone())
            }
        }
    }
}

pub(crate) fn split_argv(argv: &[String]) -> Result<(&str, &[String]), BatchError> {
    argv.split_first()
        .map(|(program, args)| (program.as_str(), args))
        .ok_or_else(|| BatchError::new(BatchErrorCode::InvalidTask, "empty command line"))
}
