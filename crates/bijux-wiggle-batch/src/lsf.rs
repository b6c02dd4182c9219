// SPDX-License-Identifier: Apache-2.0

use crate::{
    BatchError, BatchErrorCode, BatchScheduler, ClusterOptions, CommandRunner, StageCommand,
    StageState, StageSubmission, Submission,
};
use bijux_wiggle_model::{BatchBackend, BatchHandle};
use regex::Regex;
use std::sync::Arc;

const ACTIVE_STATES: [&str; 8] = ["PEND", "PROV", "PSUSP", "RUN", "USUSP", "SSUSP", "WAIT", "UNKWN"];

const BSUB_SUBMITTED: &str = r"Job <(\d+)> is submitted";

/// Extracts the job id from `bsub` output such as
/// `Job <123> is submitted to default queue <normal>.`
pub fn parse_bsub_handle(stdout: &str) -> Result<BatchHandle, BatchError> {
    let pattern = Regex::new(BSUB_SUBMITTED)
        .map_err(|e| BatchError::new(BatchErrorCode::UnparsableHandle, e.to_string()))?;
    let id = pattern
        .captures(stdout)
        .and_then(|c| c.get(1))
        .ok_or_else(|| {
            BatchError::new(
                BatchErrorCode::UnparsableHandle,
                format!("bsub output has no job id: `{}`", stdout.trim()),
            )
        })?;
    BatchHandle::parse(id.as_str())
        .map_err(|e| BatchError::new(BatchErrorCode::UnparsableHandle, e.0))
}

/// Reads `bjobs -noheader -a -o "stat exit_code"` output, one line per
/// array element. `None` means at least one element is still alive.
#[must_use]
pub fn parse_bjobs_states(stdout: &str) -> Option<Vec<i32>> {
    let mut codes = Vec::new();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let Some(stat) = fields.next() else {
            continue;
        };
        if ACTIVE_STATES.contains(&stat) {
            return None;
        }
        let exit = fields.next().and_then(|f| f.parse::<i32>().ok());
        codes.push(match (stat, exit) {
            ("DONE", _) => 0,
            (_, Some(code)) => code,
            _ => 1,
        });
    }
    Some(codes)
}

pub struct LsfScheduler {
    runner: Arc<dyn CommandRunner>,
    options: ClusterOptions,
}

impl LsfScheduler {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, options: ClusterOptions) -> Self {
        Self { runner, options }
    }
}

impl BatchScheduler for LsfScheduler {
    fn backend(&self) -> BatchBackend {
        BatchBackend::Lsf
    }

    fn submit(&self, submission: &StageSubmission) -> Result<Submission, BatchError> {
        let argv = self.options.argv(&submission.command)?;
        let (name, log) = match &submission.command {
            StageCommand::Array { commands, .. } => (
                format!("{}[1-{}]", submission.name, commands.len()),
                submission.log_dir.join(format!("{}.%J.%I.log", submission.name)),
            ),
            StageCommand::Single(_) => (
                submission.name.clone(),
                submission.log_dir.join(format!("{}.%J.log", submission.name)),
            ),
        };
        let mut args = vec![
            "-J".to_string(),
            name,
            "-o".to_string(),
            log.display().to_string(),
        ];
        if let Some(queue) = &self.options.queue {
            args.extend(["-q".to_string(), queue.clone()]);
        }
        if let Some(parent) = &submission.depends_on {
            args.extend(["-w".to_string(), format!("ended({parent})")]);
        }
        args.extend(argv);

        let output = self.runner.run("bsub", &args, &[])?;
        if !output.success() {
            return Err(BatchError::new(
                BatchErrorCode::SubmitRejected,
                format!("bsub exited {}: {}", output.status, output.stderr.trim()),
            ));
        }
        let handle = parse_bsub_handle(&output.stdout)?;
        tracing::info!(handle = %handle, name = %submission.name, tasks = submission.command.task_count(), "submitted to LSF");
        Ok(Submission {
            handle: Some(handle),
            exit_codes: Vec::new(),
        })
    }

    fn stage_state(&self, handle: &BatchHandle) -> Result<StageState, BatchError> {
        let args = [
            "-noheader",
            "-a",
            "-o",
            "stat exit_code",
            handle.as_str(),
        ]
        .map(str::to_string);
        let output = self.runner.run("bjobs", &args, &[])?;
        if output.stderr.contains("is not found") {
            tracing::warn!(handle = %handle, "LSF no longer knows the job");
            return Ok(StageState::Finished {
                exit_codes: Vec::new(),
            });
        }
        if !output.success() {
            return Err(BatchError::new(
                BatchErrorCode::PollFailed,
                format!("bjobs exited {}: {}", output.status, output.stderr.trim()),
            ));
        }
        Ok(match parse_bjobs_states(&output.stdout) {
            None => StageState::Active,
            Some(exit_codes) => StageState::Finished { exit_codes },
        })
    }
}
