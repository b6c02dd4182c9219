// SPDX-License-Identifier: Apache-2.0

use crate::{
    split_argv, BatchError, BatchScheduler, CommandRunner, StageCommand, StageState,
    StageSubmission, Submission,
};
use bijux_wiggle_model::{BatchBackend, BatchHandle};
use std::sync::Arc;

/// Runs stage commands in the calling thread, one after another.
pub struct SynchronousScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl SynchronousScheduler {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn run_line(&self, argv: &[String]) -> Result<i32, BatchError> {
        let (program, args) = split_argv(argv)?;
        let output = self.runner.run(program, args, &[])?;
        if !output.success() {
            tracing::error!(program, status = output.status, stderr = %output.stderr.trim(), "command failed");
        }
        Ok(output.status)
    }
}

impl BatchScheduler for SynchronousScheduler {
    fn backend(&self) -> BatchBackend {
        BatchBackend::Synchronous
    }

    fn submit(&self, submission: &StageSubmission) -> Result<Submission, BatchError> {
        let exit_codes = match &submission.command {
            StageCommand::Array { commands, .. } => commands
                .iter()
                .map(|argv| self.run_line(argv))
                .collect::<Result<Vec<_>, _>>()?,
            StageCommand::Single(argv) => vec![self.run_line(argv)?],
        };
        tracing::info!(name = %submission.name, exit_codes = ?exit_codes, "ran synchronously");
        Ok(Submission {
            handle: None,
            exit_codes,
        })
    }

    /// Nothing is ever left running.
    fn stage_state(&self, _handle: &BatchHandle) -> Result<StageState, BatchError> {
        Ok(StageState::Finished {
            exit_codes: Vec::new(),
        })
    }
}
