// SPDX-License-Identifier: Apache-2.0

use crate::{BatchHandle, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Status vocabulary of the result envelope: the ledger states plus the
/// request-level outcomes `INVALID` and `UNKNOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStatus {
    Invalid,
    Launched,
    Waiting,
    Done,
    Empty,
    Error,
    Unknown,
}

impl ResultStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "INVALID",
            Self::Launched => "LAUNCHED",
            Self::Waiting => "WAITING",
            Self::Done => "DONE",
            Self::Empty => "EMPTY",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<JobStatus> for ResultStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Launched => Self::Launched,
            JobStatus::Waiting => Self::Waiting,
            JobStatus::Done => Self::Done,
            JobStatus::Empty => Self::Empty,
            JobStatus::Error => Self::Error,
        }
    }
}

impl Display for ResultStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sole contract with the web-facing and notification collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_values: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<BatchHandle>,
}

impl ResultEnvelope {
    #[must_use]
    pub fn new(id: Option<JobId>, status: ResultStatus) -> Self {
        Self {
            id,
            status,
            location: None,
            url: None,
            return_values: Vec::new(),
            handle: None,
        }
    }

    #[must_use]
    pub fn invalid() -> Self {
        Self::new(None, ResultStatus::Invalid)
    }

    #[must_use]
    pub fn unknown(id: JobId) -> Self {
        Self::new(Some(id), ResultStatus::Unknown)
    }

    #[must_use]
    pub fn for_job(id: JobId, status: JobStatus) -> Self {
        Self::new(Some(id), status.into())
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    #[must_use]
    pub fn with_return_values(mut self, values: Vec<i32>) -> Self {
        self.return_values = values;
        self
    }

    #[must_use]
    pub fn with_handle(mut self, handle: Option<BatchHandle>) -> Self {
        self.handle = handle;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_absent_fields() {
        let json = serde_json::to_string(&ResultEnvelope::invalid()).expect("encode");
        assert_eq!(json, r#"{"status":"INVALID"}"#);
    }

    #[test]
    fn done_envelope_carries_id_and_location() {
        let env = ResultEnvelope::for_job(JobId(1), JobStatus::Done).with_location("/w/out.bw");
        let json = serde_json::to_string(&env).expect("encode");
        assert_eq!(json, r#"{"ID":1,"status":"DONE","location":"/w/out.bw"}"#);
    }
}
