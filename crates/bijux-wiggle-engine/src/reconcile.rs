// SPDX-License-Identifier: Apache-2.0

use crate::{Engine, EngineError};
use bijux_wiggle_batch::StageState;
use bijux_wiggle_model::{BatchHandle, JobId, JobRecord, JobStatus, ResultEnvelope};
use std::path::Path;
use tracing::{debug, warn};

impl Engine {
    /// Current status of a job, polling its scheduler while it is in flight.
    /// Stage 2 is polled first since it carries the terminal flip; stage 1
    /// only while stage 2 is still pending.
    pub fn result(&mut self, job_id: JobId) -> Result<ResultEnvelope, EngineError> {
        let Some(job) = self.store.get_job(job_id)? else {
            return Ok(ResultEnvelope::unknown(job_id));
        };
        if job.status.is_terminal() {
            return self.settled_envelope(&job);
        }
        if job.backend != self.scheduler.backend() {
            warn!(
                job_id = job_id.0,
                job_backend = job.backend.as_str(),
                configured = self.scheduler.backend().as_str(),
                "job was launched on another backend; not polling"
            );
            return Ok(ResultEnvelope::for_job(job_id, job.status));
        }
        let Some(stage2) = job.stage2_handle.clone() else {
            return Ok(ResultEnvelope::for_job(job_id, job.status));
        };

        match self.scheduler.stage_state(&stage2)? {
            StageState::Active => {}
            state @ StageState::Finished { .. } => {
                if let Some(codes) = state.failed_codes() {
                    return self.fail(job_id, codes.to_vec(), stage2);
                }
                let job = self.store.require_job(job_id)?;
                if job.status.is_terminal() {
                    return self.settled_envelope(&job);
                }
                warn!(job_id = job_id.0, handle = %stage2, "finish stage ended without recording a result");
                return self.fail(job_id, Vec::new(), stage2);
            }
        }

        if let Some(stage1) = job.stage1_handle.clone() {
            if let Some(codes) = self.scheduler.stage_state(&stage1)?.failed_codes() {
                return self.fail(job_id, codes.to_vec(), stage1);
            }
        }
        let status = self.settle(job_id, JobStatus::Waiting)?;
        if status.is_terminal() {
            let job = self.store.require_job(job_id)?;
            return self.settled_envelope(&job);
        }
        debug!(job_id = job_id.0, "job still in flight");
        Ok(ResultEnvelope::for_job(job_id, status)
            .with_handle(job.stage1_handle.or(job.stage2_handle)))
    }

    fn fail(
        &mut self,
        job_id: JobId,
        codes: Vec<i32>,
        handle: BatchHandle,
    ) -> Result<ResultEnvelope, EngineError> {
        let status = self.settle(job_id, JobStatus::Error)?;
        if status != JobStatus::Error {
            let job = self.store.require_job(job_id)?;
            return self.settled_envelope(&job);
        }
        Ok(ResultEnvelope::for_job(job_id, status)
            .with_return_values(codes)
            .with_handle(Some(handle)))
    }

    /// Envelope of a job whose status needs no polling. A `DONE` job whose
    /// output file has been collected reports `UNKNOWN`, never a dangling
    /// location.
    pub(crate) fn settled_envelope(&self, job: &JobRecord) -> Result<ResultEnvelope, EngineError> {
        let envelope = ResultEnvelope::for_job(job.job_id, job.status);
        if job.status != JobStatus::Done {
            return Ok(envelope);
        }
        let location = self
            .store
            .cache_rows_for_job(job.job_id)?
            .into_iter()
            .find(|row| row.primary)
            .map(|row| row.location)
            .unwrap_or_else(|| job.destination.clone());
        if !Path::new(&location).is_file() {
            warn!(job_id = job.job_id.0, location = %location, "result file is gone");
            return Ok(ResultEnvelope::unknown(job.job_id));
        }
        let url = self.config.public_url(&location);
        Ok(envelope.with_location(location).with_url(url))
    }
}
