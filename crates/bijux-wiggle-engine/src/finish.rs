// SPDX-License-Identifier: Apache-2.0

use crate::config::S3Target;
use crate::engine::read_context;
use crate::{Engine, EngineError};
use bijux_wiggle_batch::failed_task_codes;
use bijux_wiggle_model::{JobContext, JobStatus};
use bijux_wiggle_store::remove_temp_artifacts;
use std::path::Path;
use tracing::{error, info, warn};

/// Written next to an output by the compute tool when it produced nothing.
pub const EMPTY_MARKER_SUFFIX: &str = ".empty";
pub const SUMMARY_SUFFIX: &str = ".summary.tsv";

/// Column totals of a histogram table: the first column holds bin starts,
/// each following column one labelled sub-expression.
#[must_use]
pub fn histogram_summary(table: &str, labels: &[String]) -> Vec<(String, f64)> {
    let mut totals = vec![0.0_f64; labels.len()];
    for line in table.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let counts = line.split_whitespace().skip(1);
        for (total, field) in totals.iter_mut().zip(counts) {
            if let Ok(value) = field.parse::<f64>() {
                *total += value;
            }
        }
    }
    labels.iter().cloned().zip(totals).collect()
}

fn render_total(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn render_summary(rows: &[(String, f64)]) -> String {
    rows.iter()
        .map(|(label, total)| format!("{label}\t{}\n", render_total(*total)))
        .collect()
}

impl Engine {
    pub fn finish_from_file(&mut self, context_file: &Path) -> Result<JobStatus, EngineError> {
        let context = read_context(context_file)?;
        self.finish(&context, Some(context_file))
    }

    /// Signs a job off: runs its finish command, classifies the output,
    /// publishes it and flips the ledger. Failures land in the ledger as
    /// `ERROR`; only infrastructure faults are returned as errors.
    pub fn finish(
        &mut self,
        context: &JobContext,
        context_file: Option<&Path>,
    ) -> Result<JobStatus, EngineError> {
        let job_id = context.job_id;
        let current = self.store.require_job(job_id)?.status;
        if current.is_terminal() {
            warn!(job_id = job_id.0, status = current.as_str(), "job already settled");
            return Ok(current);
        }
        let outcome = match self.produce(context) {
            Ok(status) => status,
            Err(reason) => {
                error!(job_id = job_id.0, reason = %reason, "finish stage failed");
                JobStatus::Error
            }
        };
        let status = self.settle(job_id, outcome)?;
        let url = if status == JobStatus::Done {
            self.config.public_url(&context.destination)
        } else {
            None
        };
        self.notifier.finished(context, status, url.as_deref());
        if status != JobStatus::Error {
            for temp in &context.temps {
                remove_temp_artifacts(temp);
            }
            if let Some(path) = context_file {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove job context");
                }
            }
        }
        info!(job_id = job_id.0, status = status.as_str(), "job signed off");
        Ok(status)
    }

    fn produce(&self, context: &JobContext) -> Result<JobStatus, String> {
        for temp in &context.temps {
            let failed = failed_task_codes(temp);
            if !failed.is_empty() {
                return Err(format!("stage 1 tasks exited with {failed:?}"));
            }
        }
        if let Some(argv) = &context.finish_command {
            let (program, args) = argv
                .split_first()
                .ok_or_else(|| "empty finish command".to_string())?;
            let output = self
                .runner
                .run(program, args, &[])
                .map_err(|e| e.to_string())?;
            if !output.success() {
                return Err(format!(
                    "{program} exited {}: {}",
                    output.status,
                    output.stderr.trim()
                ));
            }
        }

        let destination = Path::new(&context.destination);
        let size = std::fs::metadata(destination)
            .map_err(|e| format!("output {}: {e}", context.destination))?
            .len();
        let marker = format!("{}{EMPTY_MARKER_SUFFIX}", context.destination);
        if size == 0 || Path::new(&marker).exists() {
            return Ok(JobStatus::Empty);
        }

        let mut published = vec![context.destination.clone()];
        if !context.labels.is_empty() {
            let table = std::fs::read_to_string(destination)
                .map_err(|e| format!("read {}: {e}", context.destination))?;
            let summary = histogram_summary(&table, &context.labels);
            let path = format!("{}{SUMMARY_SUFFIX}", context.destination);
            std::fs::write(&path, render_summary(&summary))
                .map_err(|e| format!("write {path}: {e}"))?;
            published.push(path);
        }
        if let Some(s3) = &self.config.s3 {
            for file in &published {
                self.copy_to_s3(s3, file)?;
            }
        }
        Ok(JobStatus::Done)
    }

    fn copy_to_s3(&self, s3: &S3Target, file: &str) -> Result<(), String> {
        let args = [
            "s3".to_string(),
            "cp".to_string(),
            file.to_string(),
            s3.object_uri(file),
            "--acl".to_string(),
            "public-read".to_string(),
        ];
        let env: Vec<(String, String)> = s3
            .aws_config
            .iter()
            .map(|p| ("AWS_CONFIG_FILE".to_string(), p.display().to_string()))
            .collect();
        let output = self.runner.run("aws", &args, &env).map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!(
                "copy of {file} to {} failed: {}",
                s3.object_uri(file),
                output.stderr.trim()
            ));
        }
        info!(file, uri = %s3.object_uri(file), "copied to long-term storage");
        Ok(())
    }
}
