// SPDX-License-Identifier: Apache-2.0

use crate::{StoreError, WiggleStore};
use bijux_wiggle_core::SECONDS_PER_DAY;
use bijux_wiggle_model::{JobId, JobStatus};
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

/// Files written next to a result that share its lifetime.
pub const RESULT_SIDECAR_SUFFIXES: [&str; 2] = [".summary.tsv", ".empty"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub max_age_days: i64,
    pub expired_queries: Vec<String>,
    pub removed_files: Vec<String>,
    pub released_temps: Vec<String>,
    pub purged_error_jobs: Vec<JobId>,
    /// ERROR jobs kept because one of their rows is pinned.
    pub retained_error_jobs: Vec<JobId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub removed_queries: Vec<String>,
    pub removed_files: Vec<String>,
}

fn remove_file_if_present(path: &Path, removed: &mut Vec<String>) {
    match std::fs::remove_file(path) {
        Ok(()) => removed.push(path.display().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

/// Removes a temp artifact and every sibling named `<temp>.<suffix>`
/// (per-task logs and exit markers).
pub fn remove_temp_artifacts(temp: &Path) -> Vec<String> {
    let mut removed = Vec::new();
    remove_file_if_present(temp, &mut removed);
    let (Some(dir), Some(stem)) = (temp.parent(), temp.file_name()) else {
        return removed;
    };
    let prefix = format!("{}.", stem.to_string_lossy());
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return removed;
    };
    let mut siblings = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect::<Vec<_>>();
    siblings.sort();
    for path in siblings {
        remove_file_if_present(&path, &mut removed);
    }
    removed
}

fn remove_result_files(location: &str, removed: &mut Vec<String>) {
    remove_file_if_present(Path::new(location), removed);
    for suffix in RESULT_SIDECAR_SUFFIXES {
        remove_file_if_present(Path::new(&format!("{location}{suffix}")), removed);
    }
}

impl WiggleStore {
    /// Deletes files whose location is no longer referenced by any cache row.
    fn drop_unreferenced(&self, locations: BTreeSet<String>) -> Result<Vec<String>, StoreError> {
        let mut removed = Vec::new();
        for location in locations {
            if self.location_references(&location)? == 0 {
                remove_result_files(&location, &mut removed);
            }
        }
        Ok(removed)
    }

    /// Age-based collection: expired unpinned rows and their files, temp
    /// artifacts of finished jobs, then ERROR jobs so they can be retried.
    pub fn clean(&mut self, max_age_days: i64) -> Result<CleanReport, StoreError> {
        let cutoff = self.now_unix() - max_age_days.saturating_mul(SECONDS_PER_DAY);
        let mut report = CleanReport {
            max_age_days,
            ..CleanReport::default()
        };

        let expired: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT query, location FROM cache
                 WHERE pinned = 0 AND last_access < ?1 ORDER BY query",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        {
            let tx = self.conn.transaction()?;
            for (query, _) in &expired {
                tx.execute("DELETE FROM cache WHERE query = ?1 AND pinned = 0", params![query])?;
            }
            tx.commit()?;
        }
        let locations = expired.iter().map(|(_, loc)| loc.clone()).collect();
        report.removed_files = self.drop_unreferenced(locations)?;
        report.expired_queries = expired.into_iter().map(|(q, _)| q).collect();

        for status in [JobStatus::Done, JobStatus::Empty] {
            for job in self.jobs_with_status(status)? {
                let Some(temp) = job.temp.as_deref() else {
                    continue;
                };
                report
                    .released_temps
                    .extend(remove_temp_artifacts(Path::new(temp)));
                self.set_temp(job.job_id, None)?;
            }
        }

        for job in self.jobs_with_status(JobStatus::Error)? {
            let rows = self.cache_rows_for_job(job.job_id)?;
            if rows.iter().any(|r| r.pinned) {
                report.retained_error_jobs.push(job.job_id);
                continue;
            }
            if let Some(purged) = self.purge_job(job.job_id)? {
                report.removed_files.extend(purged.removed_files);
                report.purged_error_jobs.push(job.job_id);
            }
        }

        tracing::info!(
            max_age_days,
            expired = report.expired_queries.len(),
            files = report.removed_files.len(),
            temps = report.released_temps.len(),
            error_jobs = report.purged_error_jobs.len(),
            "cache cleaned"
        );
        Ok(report)
    }

    /// Deletes one job, its cache rows, its temp artifacts and any result
    /// file left without a referencing row.
    pub fn purge_job(&mut self, job_id: JobId) -> Result<Option<PurgeReport>, StoreError> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(None);
        };
        let rows = self.cache_rows_for_job(job_id)?;
        let mut removed_files = job
            .temp
            .as_deref()
            .map(|t| remove_temp_artifacts(Path::new(t)))
            .unwrap_or_default();
        self.delete_job(job_id)?;
        let locations = rows.iter().map(|r| r.location.clone()).collect();
        removed_files.extend(self.drop_unreferenced(locations)?);
        tracing::info!(job_id = job_id.0, status = job.status.as_str(), "job purged");
        Ok(Some(PurgeReport {
            job_id,
            status: job.status,
            removed_queries: rows.into_iter().map(|r| r.query.as_str().to_string()).collect(),
            removed_files,
        }))
    }

    /// Purges every job that reached a terminal status. Running jobs keep
    /// their rows so their finish stage can still record a result.
    pub fn purge_terminal(&mut self) -> Result<Vec<PurgeReport>, StoreError> {
        let mut reports = Vec::new();
        for status in [JobStatus::Done, JobStatus::Empty, JobStatus::Error] {
            for job in self.jobs_with_status(status)? {
                if let Some(report) = self.purge_job(job.job_id)? {
                    reports.push(report);
                }
            }
        }
        reports.sort_by_key(|r| r.job_id);
        Ok(reports)
    }
}
