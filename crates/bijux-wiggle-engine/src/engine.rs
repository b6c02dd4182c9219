// SPDX-License-Identifier: Apache-2.0

use crate::config::EngineConfig;
use crate::notify::{Notifier, TracingNotifier};
use crate::plan::{
    resolve_request, PlanOutcome, PreviewAllocator, RequestSpec, Resolved, StoreBranches,
    TempFileAllocator,
};
use crate::{EngineError, EngineErrorCode};
use bijux_wiggle_batch::{
    run_task, BatchError, BatchScheduler, ClusterOptions, CommandRunner, LsfScheduler,
    SgeScheduler, StageCommand, StageSubmission, SynchronousScheduler, SystemRunner,
};
use bijux_wiggle_core::{canonical::stable_json_pretty, sha256_hex};
use bijux_wiggle_model::{
    BatchBackend, BatchHandle, CacheEntry, JobContext, JobId, JobStatus, NormalizedQuery,
    ResultEnvelope, ResultStatus,
};
use bijux_wiggle_query::{normalize_query, plan_dispatch, DispatchPlan};
use bijux_wiggle_store::{CleanReport, PurgeReport, StoreErrorCode, WiggleStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: WiggleStore,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) scheduler: Arc<dyn BatchScheduler>,
    pub(crate) notifier: Arc<dyn Notifier>,
}

fn scheduler_for(config: &EngineConfig, runner: Arc<dyn CommandRunner>) -> Arc<dyn BatchScheduler> {
    let options = ClusterOptions {
        stage_program: config.stage_program.clone(),
        queue: config.queue.clone(),
    };
    match config.backend {
        BatchBackend::Lsf => Arc::new(LsfScheduler::new(runner, options)),
        BatchBackend::Sge => Arc::new(SgeScheduler::new(runner, options)),
        BatchBackend::Synchronous => Arc::new(SynchronousScheduler::new(runner)),
    }
}

/// Short stable tag for correlating log lines about one query.
fn query_digest(query: &NormalizedQuery) -> String {
    sha256_hex(query.as_str().as_bytes())[..12].to_string()
}

pub(crate) fn job_artifact(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let store = WiggleStore::open(&config.database)?;
        Ok(Self::with_store(config, store, Arc::new(SystemRunner)))
    }

    /// Builds an engine over an existing store; the scheduler for the
    /// configured backend shares `runner`.
    #[must_use]
    pub fn with_store(config: EngineConfig, store: WiggleStore, runner: Arc<dyn CommandRunner>) -> Self {
        let scheduler = scheduler_for(&config, runner.clone());
        Self {
            config,
            store,
            runner,
            scheduler,
            notifier: Arc::new(TracingNotifier),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &WiggleStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut WiggleStore {
        &mut self.store
    }

    /// Plans a request without writing rows or reserving files.
    pub fn plan(&self, spec: &RequestSpec) -> Result<PlanOutcome, EngineError> {
        let request = match resolve_request(&self.store, spec)? {
            Resolved::Invalid(reason) => return Ok(PlanOutcome::Invalid { reason }),
            Resolved::Request(request) => request,
        };
        let mut plan = plan_dispatch(
            &request,
            &StoreBranches::preview(&self.store),
            &mut PreviewAllocator::new(&self.config.working_directory),
        )?;
        plan.stage1 = plan.stage1.iter().map(|c| self.wiggletools_argv(c)).collect();
        plan.finish_command = plan.finish_command.as_ref().map(|c| self.wiggletools_argv(c));
        Ok(PlanOutcome::Planned { plan })
    }

    /// Hit path returns the reconciled status of the job that owns the
    /// cached result; miss path plans, records and submits a new job.
    pub fn request(&mut self, spec: &RequestSpec) -> Result<ResultEnvelope, EngineError> {
        let request = match resolve_request(&self.store, spec)? {
            Resolved::Invalid(reason) => {
                info!(reason = %reason, "request is invalid");
                return Ok(ResultEnvelope::invalid());
            }
            Resolved::Request(request) => request,
        };
        let normalized = normalize_query(&request)?;
        if let Some(job_id) = self.store.lookup(&normalized)?.and_then(|e| e.job_id) {
            self.store.touch(&normalized)?;
            info!(query_digest = %query_digest(&normalized), job_id = job_id.0, "cache hit");
            let envelope = self.result(job_id)?;
            match envelope.status {
                ResultStatus::Launched | ResultStatus::Waiting => {
                    self.notifier
                        .acknowledged(job_id, &spec.describe(), &spec.emails);
                }
                ResultStatus::Unknown => {
                    warn!(query_digest = %query_digest(&normalized), job_id = job_id.0, "cached result is gone; recomputing");
                    self.store.remove(&normalized)?;
                }
                _ => {}
            }
            if envelope.status != ResultStatus::Unknown {
                return Ok(envelope);
            }
        }

        std::fs::create_dir_all(&self.config.working_directory).map_err(|e| {
            EngineError::new(
                EngineErrorCode::Io,
                format!("create {}: {e}", self.config.working_directory.display()),
            )
        })?;
        let plan = plan_dispatch(
            &request,
            &StoreBranches::live(&self.store),
            &mut TempFileAllocator::new(&self.config.working_directory),
        )?;
        info!(
            query = %normalized,
            query_digest = %query_digest(&normalized),
            destination = %plan.destination,
            stage1 = plan.stage1.len(),
            "cache miss"
        );
        self.launch(spec, plan)
    }

    fn wiggletools_argv(&self, tokens: &[String]) -> Vec<String> {
        std::iter::once(self.config.wiggletools.clone())
            .chain(tokens.iter().cloned())
            .collect()
    }

    fn launch(&mut self, spec: &RequestSpec, plan: DispatchPlan) -> Result<ResultEnvelope, EngineError> {
        let job_id = self
            .store
            .create_job(self.config.backend, &plan.destination, JobStatus::Launched)?;
        let now = self.store.now_unix();
        self.store.insert(&CacheEntry {
            query: plan.normalized.clone(),
            location: plan.destination.clone(),
            last_access: now,
            pinned: spec.pinned,
            primary: true,
            job_id: Some(job_id),
        })?;
        for row in &plan.secondary {
            self.store.insert(&CacheEntry {
                query: row.query.clone(),
                location: row.location.clone(),
                last_access: now,
                pinned: false,
                primary: false,
                job_id: Some(job_id),
            })?;
        }

        let base = self.config.working_directory.join(format!("wiggle-job-{job_id}"));
        let task_file = job_artifact(&base, ".tasks.json");
        let context_file = job_artifact(&base, ".context.json");
        self.store
            .set_temp(job_id, Some(&base.display().to_string()))?;

        let commands: Vec<Vec<String>> = plan.stage1.iter().map(|c| self.wiggletools_argv(c)).collect();
        let context = JobContext {
            job_id,
            database: self.config.database.clone(),
            destination: plan.destination.clone(),
            output_kind: plan.output_kind,
            finish_command: plan.finish_command.as_ref().map(|c| self.wiggletools_argv(c)),
            labels: plan.labels.clone(),
            temps: if commands.is_empty() {
                Vec::new()
            } else {
                vec![task_file.clone()]
            },
            emails: spec.emails.clone(),
            description: spec.describe(),
        };
        write_context(&context_file, &context)?;
        self.notifier
            .acknowledged(job_id, &context.description, &context.emails);

        let stage1 = (!commands.is_empty()).then(|| StageSubmission {
            name: format!("wiggle-job-{job_id}"),
            command: StageCommand::Array {
                commands,
                task_file,
            },
            depends_on: None,
            log_dir: self.config.working_directory.clone(),
        });
        if self.config.backend == BatchBackend::Synchronous {
            self.run_synchronously(&context, &context_file, stage1)
        } else {
            self.submit_stages(job_id, &context_file, stage1)
        }
    }

    fn run_synchronously(
        &mut self,
        context: &JobContext,
        context_file: &Path,
        stage1: Option<StageSubmission>,
    ) -> Result<ResultEnvelope, EngineError> {
        let job_id = context.job_id;
        if let Some(submission) = stage1 {
            let codes = match self.scheduler.submit(&submission) {
                Ok(done) => done.exit_codes,
                Err(e) => return self.submission_failed(job_id, &e),
            };
            if codes.iter().any(|c| *c != 0) {
                let status = self.settle(job_id, JobStatus::Error)?;
                self.notifier.finished(context, status, None);
                return Ok(ResultEnvelope::for_job(job_id, status).with_return_values(codes));
            }
        }
        self.finish(context, Some(context_file))?;
        let job = self.store.require_job(job_id)?;
        self.settled_envelope(&job)
    }

    fn submit_stages(
        &mut self,
        job_id: JobId,
        context_file: &Path,
        stage1: Option<StageSubmission>,
    ) -> Result<ResultEnvelope, EngineError> {
        let stage1_handle = match stage1 {
            Some(submission) => match self.scheduler.submit(&submission) {
                Ok(done) => done.handle,
                Err(e) => return self.submission_failed(job_id, &e),
            },
            None => None,
        };
        let finish = StageSubmission {
            name: format!("wiggle-job-{job_id}.finish"),
            command: StageCommand::Single(self.finish_argv(context_file)),
            depends_on: stage1_handle.clone(),
            log_dir: self.config.working_directory.clone(),
        };
        let stage2_handle = match self.scheduler.submit(&finish) {
            Ok(done) => done.handle,
            Err(e) => {
                self.store
                    .set_handles(job_id, stage1_handle.as_ref(), None)?;
                return self.submission_failed(job_id, &e);
            }
        };
        self.store
            .set_handles(job_id, stage1_handle.as_ref(), stage2_handle.as_ref())?;
        info!(
            job_id = job_id.0,
            backend = self.config.backend.as_str(),
            stage1 = stage1_handle.as_ref().map(BatchHandle::as_str).unwrap_or("-"),
            stage2 = stage2_handle.as_ref().map(BatchHandle::as_str).unwrap_or("-"),
            "job launched"
        );
        Ok(ResultEnvelope::for_job(job_id, JobStatus::Launched)
            .with_handle(stage1_handle.or(stage2_handle)))
    }

    fn finish_argv(&self, context_file: &Path) -> Vec<String> {
        let mut argv = vec![self.config.stage_program.clone()];
        if let Some(config_file) = &self.config.config_file {
            argv.extend(["--config".to_string(), config_file.display().to_string()]);
        }
        argv.extend([
            "finish".to_string(),
            "--context".to_string(),
            context_file.display().to_string(),
        ]);
        argv
    }

    fn submission_failed(
        &mut self,
        job_id: JobId,
        err: &BatchError,
    ) -> Result<ResultEnvelope, EngineError> {
        error!(job_id = job_id.0, error = %err, "submission failed");
        let status = self.settle(job_id, JobStatus::Error)?;
        Ok(ResultEnvelope::for_job(job_id, status))
    }

    /// Moves a job towards `status`. Losing the race against another
    /// process that already settled it returns the status that won.
    pub(crate) fn settle(&self, job_id: JobId, status: JobStatus) -> Result<JobStatus, EngineError> {
        match self.store.advance_status(job_id, status) {
            Ok(next) => Ok(next),
            Err(e) if e.code == StoreErrorCode::Conflict => {
                let current = self.store.require_job(job_id)?.status;
                warn!(job_id = job_id.0, wanted = status.as_str(), current = current.as_str(), "status already settled");
                Ok(current)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one stage-1 task; the index normally comes from the scheduler.
    pub fn run_task(&self, tasks: &Path, index: usize) -> Result<i32, EngineError> {
        Ok(run_task(self.runner.as_ref(), tasks, index)?)
    }

    pub fn clean(&mut self, max_age_days: i64) -> Result<CleanReport, EngineError> {
        if max_age_days < 0 {
            return Err(EngineError::new(
                EngineErrorCode::Validation,
                "max age must not be negative",
            ));
        }
        Ok(self.store.clean(max_age_days)?)
    }

    /// Purges the given jobs, or every terminal job when `ids` is empty.
    pub fn purge(&mut self, ids: &[JobId]) -> Result<Vec<PurgeReport>, EngineError> {
        if ids.is_empty() {
            return Ok(self.store.purge_terminal()?);
        }
        let mut reports = Vec::new();
        for id in ids {
            match self.store.purge_job(*id)? {
                Some(report) => reports.push(report),
                None => warn!(job_id = id.0, "no such job to purge"),
            }
        }
        Ok(reports)
    }
}

fn write_context(path: &Path, context: &JobContext) -> Result<(), EngineError> {
    let text = stable_json_pretty(context)
        .map_err(|e| EngineError::new(EngineErrorCode::Io, e.to_string()))?;
    std::fs::write(path, text).map_err(|e| {
        EngineError::new(EngineErrorCode::Io, format!("write {}: {e}", path.display()))
    })
}

pub fn read_context(path: &Path) -> Result<JobContext, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| {
        EngineError::new(EngineErrorCode::Io, format!("read {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::new(
            EngineErrorCode::Validation,
            format!("{} is not a job context: {e}", path.display()),
        )
    })
}
