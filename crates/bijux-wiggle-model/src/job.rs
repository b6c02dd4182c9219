// SPDX-License-Identifier: Apache-2.0

use crate::{NormalizedQuery, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier handed back by a batch scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchHandle(String);

impl BatchHandle {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("batch handle must not be empty".to_string()));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ValidationError(format!(
                "batch handle `{s}` must not contain whitespace"
            )));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BatchHandle {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BatchHandle> for String {
    fn from(value: BatchHandle) -> Self {
        value.0
    }
}

impl Display for BatchHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger lifecycle: `Launched -> Waiting -> {Done, Empty, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Launched,
    Waiting,
    Done,
    Empty,
    Error,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launched => "LAUNCHED",
            Self::Waiting => "WAITING",
            Self::Done => "DONE",
            Self::Empty => "EMPTY",
            Self::Error => "ERROR",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Empty | Self::Error)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Launched => 0,
            Self::Waiting => 1,
            Self::Done | Self::Empty | Self::Error => 2,
        }
    }

    /// Forward moves only; nothing leaves a terminal state.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LAUNCHED" => Ok(Self::Launched),
            "WAITING" => Ok(Self::Waiting),
            "DONE" => Ok(Self::Done),
            "EMPTY" => Ok(Self::Empty),
            "ERROR" => Ok(Self::Error),
            other => Err(ValidationError(format!("unknown job status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchBackend {
    #[serde(rename = "LSF")]
    Lsf,
    #[serde(rename = "SGE")]
    Sge,
    #[serde(rename = "SYNC")]
    Synchronous,
}

impl BatchBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lsf => "LSF",
            Self::Sge => "SGE",
            Self::Synchronous => "SYNC",
        }
    }
}

impl Display for BatchBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchBackend {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LSF" => Ok(Self::Lsf),
            "SGE" => Ok(Self::Sge),
            "SYNC" | "SYNCHRONOUS" => Ok(Self::Synchronous),
            other => Err(ValidationError(format!(
                "unknown batch system `{other}`; expected LSF, SGE or SYNC"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub stage1_handle: Option<BatchHandle>,
    pub stage2_handle: Option<BatchHandle>,
    pub status: JobStatus,
    pub temp: Option<String>,
    pub destination: String,
    pub backend: BatchBackend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: NormalizedQuery,
    pub location: String,
    pub last_access: i64,
    pub pinned: bool,
    /// Final merged output of its job, as opposed to a reusable branch output.
    pub primary: bool,
    pub job_id: Option<JobId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use JobStatus::*;
        assert!(Launched.can_advance_to(Waiting));
        assert!(Launched.can_advance_to(Error));
        assert!(Waiting.can_advance_to(Done));
        assert!(Waiting.can_advance_to(Empty));
        assert!(!Waiting.can_advance_to(Launched));
        assert!(!Waiting.can_advance_to(Waiting));
        for terminal in [Done, Empty, Error] {
            for next in [Launched, Waiting, Done, Empty, Error] {
                assert!(!terminal.can_advance_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn status_text_roundtrips_through_from_str() {
        for status in [
            JobStatus::Launched,
            JobStatus::Waiting,
            JobStatus::Done,
            JobStatus::Empty,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn backend_names_accept_config_spellings() {
        assert_eq!("lsf".parse::<BatchBackend>(), Ok(BatchBackend::Lsf));
        assert_eq!(" SGE ".parse::<BatchBackend>(), Ok(BatchBackend::Sge));
        assert_eq!(
            "synchronous".parse::<BatchBackend>(),
            Ok(BatchBackend::Synchronous)
        );
        assert!("slurm".parse::<BatchBackend>().is_err());
    }

    #[test]
    fn batch_handle_rejects_whitespace() {
        assert!(BatchHandle::parse("12345").is_ok());
        assert!(BatchHandle::parse("12 345").is_err());
        assert!(BatchHandle::parse("  ").is_err());
    }
}
