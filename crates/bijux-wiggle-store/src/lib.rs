// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! SQLite persistence for the cache table, the job ledger and the dataset
//! reference tables. Each process opens its own connection; statements are
//! the only serialization point between concurrent requests.

mod cache;
mod datasets;
mod gc;
mod jobs;

use bijux_wiggle_core::{Clock, SystemClock};
use rusqlite::Connection;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use datasets::DatasetTable;
pub use gc::{remove_temp_artifacts, CleanReport, PurgeReport, RESULT_SIDECAR_SUFFIXES};

pub const CRATE_NAME: &str = "bijux-wiggle-store";
pub const SQLITE_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreErrorCode {
    NotFound,
    Validation,
    Conflict,
    Sqlite,
    Io,
}

impl StoreErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::Conflict => "conflict",
            Self::Sqlite => "sqlite_error",
            Self::Io => "io_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new(StoreErrorCode::Sqlite, value.to_string())
    }
}

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS assemblies (
      name TEXT PRIMARY KEY,
      location TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jobs (
      job_id INTEGER PRIMARY KEY AUTOINCREMENT,
      stage1_handle TEXT,
      stage2_handle TEXT,
      status TEXT NOT NULL,
      temp TEXT,
      destination TEXT NOT NULL,
      backend TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cache (
      query TEXT NOT NULL UNIQUE,
      location TEXT NOT NULL,
      last_access INTEGER NOT NULL,
      pinned INTEGER NOT NULL DEFAULT 0,
      primary_loc INTEGER NOT NULL DEFAULT 0,
      job_id INTEGER
    );
    CREATE INDEX IF NOT EXISTS cache_job_id ON cache(job_id);
    CREATE INDEX IF NOT EXISTS cache_last_access ON cache(last_access);
";

pub struct WiggleStore {
    conn: Connection,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl WiggleStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!("PRAGMA user_version={SQLITE_SCHEMA_VERSION};"))?;
        Ok(Self {
            conn,
            path,
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn now_unix(&self) -> i64 {
        self.clock.now_unix()
    }
}

pub(crate) fn decode_column<T, E>(idx: usize, value: Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    value.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
