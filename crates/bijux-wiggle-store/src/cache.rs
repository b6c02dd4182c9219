// SPDX-License-Identifier: Apache-2.0

use crate::{decode_column, StoreError, WiggleStore};
use bijux_wiggle_model::{CacheEntry, JobId, NormalizedQuery};
use rusqlite::{params, OptionalExtension, Row};

const CACHE_COLUMNS: &str = "query, location, last_access, pinned, primary_loc, job_id";

fn cache_entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let query: String = row.get(0)?;
    Ok(CacheEntry {
        query: decode_column(0, NormalizedQuery::new(query))?,
        location: row.get(1)?,
        last_access: row.get(2)?,
        pinned: row.get(3)?,
        primary: row.get(4)?,
        job_id: row.get::<_, Option<i64>>(5)?.map(JobId),
    })
}

impl WiggleStore {
    pub fn lookup(&self, query: &NormalizedQuery) -> Result<Option<CacheEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {CACHE_COLUMNS} FROM cache WHERE query = ?1"))?;
        Ok(stmt
            .query_row(params![query.as_str()], cache_entry_from_row)
            .optional()?)
    }

    /// Writes a row unless one already exists for the same query. Returns
    /// whether this call won; losing a concurrent race is not an error.
    pub fn insert(&self, entry: &CacheEntry) -> Result<bool, StoreError> {
        let written = self.conn.execute(
            "INSERT INTO cache (query, location, last_access, pinned, primary_loc, job_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(query) DO NOTHING",
            params![
                entry.query.as_str(),
                entry.location,
                entry.last_access,
                entry.pinned,
                entry.primary,
                entry.job_id.map(|id| id.0)
            ],
        )?;
        if written == 0 {
            tracing::warn!(query = entry.query.as_str(), "cache row already present; keeping existing");
        }
        Ok(written > 0)
    }

    pub fn touch(&self, query: &NormalizedQuery) -> Result<bool, StoreError> {
        let updated = self.conn.execute(
            "UPDATE cache SET last_access = ?2 WHERE query = ?1",
            params![query.as_str(), self.now_unix()],
        )?;
        Ok(updated > 0)
    }

    pub fn remove(&self, query: &NormalizedQuery) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM cache WHERE query = ?1", params![query.as_str()])?;
        Ok(deleted > 0)
    }

    /// Location of a branch whose producing job finished with a usable
    /// result. Hits refresh `last_access`.
    pub fn completed_location(
        &self,
        query: &NormalizedQuery,
    ) -> Result<Option<String>, StoreError> {
        let location: Option<String> = self
            .conn
            .prepare_cached(
                "SELECT c.location FROM cache c JOIN jobs j ON c.job_id = j.job_id
                 WHERE c.query = ?1 AND j.status IN ('DONE', 'EMPTY')",
            )?
            .query_row(params![query.as_str()], |row| row.get(0))
            .optional()?;
        if location.is_some() {
            self.touch(query)?;
        }
        Ok(location)
    }

    pub fn list_cache(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CACHE_COLUMNS} FROM cache ORDER BY last_access DESC, query ASC"
        ))?;
        let rows = stmt
            .query_map([], cache_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn cache_rows_for_job(&self, job_id: JobId) -> Result<Vec<CacheEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CACHE_COLUMNS} FROM cache WHERE job_id = ?1 ORDER BY query ASC"
        ))?;
        let rows = stmt
            .query_map(params![job_id.0], cache_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of cache rows still pointing at `location`.
    pub fn location_references(&self, location: &str) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM cache WHERE location = ?1",
            params![location],
            |row| row.get(0),
        )?)
    }
}
