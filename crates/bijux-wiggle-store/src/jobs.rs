// SPDX-License-Identifier: Apache-2.0

use crate::{decode_column, StoreError, StoreErrorCode, WiggleStore};
use bijux_wiggle_model::{BatchBackend, BatchHandle, JobId, JobRecord, JobStatus};
use rusqlite::{params, OptionalExtension, Row};

const JOB_COLUMNS: &str = "job_id, stage1_handle, stage2_handle, status, temp, destination, backend";

fn handle_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<BatchHandle>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Ok(Some(decode_column(idx, BatchHandle::parse(&raw))?)),
        None => Ok(None),
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get(3)?;
    let backend: String = row.get(6)?;
    Ok(JobRecord {
        job_id: JobId(row.get(0)?),
        stage1_handle: handle_column(row, 1)?,
        stage2_handle: handle_column(row, 2)?,
        status: decode_column(3, status.parse::<JobStatus>())?,
        temp: row.get(4)?,
        destination: row.get(5)?,
        backend: decode_column(6, backend.parse::<BatchBackend>())?,
    })
}

impl WiggleStore {
    pub fn create_job(
        &self,
        backend: BatchBackend,
        destination: &str,
        status: JobStatus,
    ) -> Result<JobId, StoreError> {
        self.conn.execute(
            "INSERT INTO jobs (status, destination, backend) VALUES (?1, ?2, ?3)",
            params![status.as_str(), destination, backend.as_str()],
        )?;
        let job_id = JobId(self.conn.last_insert_rowid());
        tracing::debug!(job_id = job_id.0, status = status.as_str(), "job created");
        Ok(job_id)
    }

    pub fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"))?;
        Ok(stmt.query_row(params![job_id.0], job_from_row).optional()?)
    }

    pub fn require_job(&self, job_id: JobId) -> Result<JobRecord, StoreError> {
        self.get_job(job_id)?.ok_or_else(|| {
            StoreError::new(StoreErrorCode::NotFound, format!("job {job_id} is not in the ledger"))
        })
    }

    pub fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY job_id ASC"))?;
        let rows = stmt
            .query_map([], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY job_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_handles(
        &self,
        job_id: JobId,
        stage1: Option<&BatchHandle>,
        stage2: Option<&BatchHandle>,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE jobs SET stage1_handle = ?2, stage2_handle = ?3 WHERE job_id = ?1",
            params![
                job_id.0,
                stage1.map(BatchHandle::as_str),
                stage2.map(BatchHandle::as_str)
            ],
        )?;
        expect_one_row(updated, job_id)
    }

    pub fn set_temp(&self, job_id: JobId, temp: Option<&str>) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE jobs SET temp = ?2 WHERE job_id = ?1",
            params![job_id.0, temp],
        )?;
        expect_one_row(updated, job_id)
    }

    /// Compare-and-set status transition. Repeating the current status is a
    /// no-op; anything that would move backwards or leave a terminal state is
    /// rejected with `Conflict`.
    pub fn advance_status(&self, job_id: JobId, next: JobStatus) -> Result<JobStatus, StoreError> {
        let current = self.require_job(job_id)?.status;
        if current == next {
            return Ok(current);
        }
        if !current.can_advance_to(next) {
            return Err(StoreError::new(
                StoreErrorCode::Conflict,
                format!("job {job_id} cannot move from {current} to {next}"),
            ));
        }
        let updated = self.conn.execute(
            "UPDATE jobs SET status = ?2 WHERE job_id = ?1 AND status = ?3",
            params![job_id.0, next.as_str(), current.as_str()],
        )?;
        if updated == 0 {
            // Another process moved the job in between; re-evaluate against its value.
            return self.advance_status(job_id, next);
        }
        tracing::info!(job_id = job_id.0, from = current.as_str(), to = next.as_str(), "job status advanced");
        Ok(next)
    }

    /// Removes the job row and every cache row it produced.
    pub fn delete_job(&mut self, job_id: JobId) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cache WHERE job_id = ?1", params![job_id.0])?;
        let deleted = tx.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id.0])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

fn expect_one_row(updated: usize, job_id: JobId) -> Result<(), StoreError> {
    if updated == 0 {
        return Err(StoreError::new(
            StoreErrorCode::NotFound,
            format!("job {job_id} is not in the ledger"),
        ));
    }
    Ok(())
}
