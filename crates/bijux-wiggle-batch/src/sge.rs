// SPDX-License-Identifier: Apache-2.0

use crate::{
    BatchError, BatchErrorCode, BatchScheduler, ClusterOptions, CommandRunner, StageCommand,
    StageState, StageSubmission, Submission,
};
use bijux_wiggle_model::{BatchBackend, BatchHandle};
use regex::Regex;
use std::sync::Arc;

const QSUB_TERSE: &str = r"^(\d+)(?:\.\S+)?$";

/// `qsub -terse` prints `123` for plain jobs and `123.1-3:1` for arrays.
pub fn parse_qsub_handle(stdout: &str) -> Result<BatchHandle, BatchError> {
    let pattern = Regex::new(QSUB_TERSE)
        .map_err(|e| BatchError::new(BatchErrorCode::UnparsableHandle, e.to_string()))?;
    let id = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|line| pattern.captures(line))
        .and_then(|c| c.get(1))
        .ok_or_else(|| {
            BatchError::new(
                BatchErrorCode::UnparsableHandle,
                format!("qsub output has no job id: `{}`", stdout.trim()),
            )
        })?;
    BatchHandle::parse(id.as_str())
        .map_err(|e| BatchError::new(BatchErrorCode::UnparsableHandle, e.0))
}

/// Per-task exit codes from `qacct -j` records. A non-zero `failed` value
/// stands in for the task's `exit_status`.
#[must_use]
pub fn parse_qacct_exit_codes(stdout: &str) -> Vec<i32> {
    let mut codes = Vec::new();
    let mut task_failed = false;
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let code = value.parse::<i32>().unwrap_or(1);
        match key {
            "failed" if code != 0 => {
                codes.push(code);
                task_failed = true;
            }
            "exit_status" => {
                if !task_failed {
                    codes.push(code);
                }
                task_failed = false;
            }
            _ => {}
        }
    }
    codes
}

pub struct SgeScheduler {
    runner: Arc<dyn CommandRunner>,
    options: ClusterOptions,
}

impl SgeScheduler {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, options: ClusterOptions) -> Self {
        Self { runner, options }
    }
}

impl BatchScheduler for SgeScheduler {
    fn backend(&self) -> BatchBackend {
        BatchBackend::Sge
    }

    fn submit(&self, submission: &StageSubmission) -> Result<Submission, BatchError> {
        let argv = self.options.argv(&submission.command)?;
        let log_dir = submission.log_dir.display().to_string();
        let mut args = vec![
            "-terse".to_string(),
            "-N".to_string(),
            submission.name.clone(),
            "-o".to_string(),
            log_dir.clone(),
            "-e".to_string(),
            log_dir,
        ];
        if let Some(queue) = &self.options.queue {
            args.extend(["-q".to_string(), queue.clone()]);
        }
        if let StageCommand::Array { commands, .. } = &submission.command {
            args.extend(["-t".to_string(), format!("1-{}", commands.len())]);
        }
        if let Some(parent) = &submission.depends_on {
            args.extend(["-hold_jid".to_string(), parent.to_string()]);
        }
        args.extend(["-b".to_string(), "y".to_string()]);
        args.extend(argv);

        let output = self.runner.run("qsub", &args, &[])?;
        if !output.success() {
            return Err(BatchError::new(
                BatchErrorCode::SubmitRejected,
                format!("qsub exited {}: {}", output.status, output.stderr.trim()),
            ));
        }
        let handle = parse_qsub_handle(&output.stdout)?;
        tracing::info!(handle = %handle, name = %submission.name, tasks = submission.command.task_count(), "submitted to SGE");
        Ok(Submission {
            handle: Some(handle),
            exit_codes: Vec::new(),
        })
    }

    fn stage_state(&self, handle: &BatchHandle) -> Result<StageState, BatchError> {
        let args = ["-j".to_string(), handle.as_str().to_string()];
        if self.runner.run("qstat", &args, &[])?.success() {
            return Ok(StageState::Active);
        }
        let qacct = self.runner.run("qacct", &args, &[])?;
        let exit_codes = parse_qacct_exit_codes(&qacct.stdout);
        if !qacct.success() || exit_codes.is_empty() {
            // Accounting lags behind qstat; the job has not been written yet.
            tracing::debug!(handle = %handle, "no accounting record yet");
            return Ok(StageState::Active);
        }
        Ok(StageState::Finished { exit_codes })
    }
}
