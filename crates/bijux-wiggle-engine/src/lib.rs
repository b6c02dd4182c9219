// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Request orchestration over the store, the planner and a batch scheduler:
//! the hit/miss path, status reconciliation and the finish stage.

mod config;
mod engine;
mod finish;
mod notify;
mod plan;
mod reconcile;

use bijux_wiggle_batch::BatchError;
use bijux_wiggle_query::{DispatchError, DispatchErrorCode};
use bijux_wiggle_store::{StoreError, StoreErrorCode};
use std::fmt::{Display, Formatter};

pub use config::{public_url, EngineConfig, S3Target};
pub use engine::{read_context, Engine};
pub use finish::{histogram_summary, EMPTY_MARKER_SUFFIX, SUMMARY_SUFFIX};
pub use notify::{Notifier, TracingNotifier};
pub use plan::{PlanOutcome, RequestSpec};

pub const CRATE_NAME: &str = "bijux-wiggle-engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineErrorCode {
    Validation,
    NotFound,
    Store,
    Scheduler,
    Io,
}

impl EngineErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::Store => "store_error",
            Self::Scheduler => "scheduler_error",
            Self::Io => "io_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: EngineErrorCode,
    pub message: String,
}

impl EngineError {
    #[must_use]
    pub fn new(code: EngineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        let code = match value.code {
            StoreErrorCode::Validation => EngineErrorCode::Validation,
            StoreErrorCode::NotFound => EngineErrorCode::NotFound,
            StoreErrorCode::Io => EngineErrorCode::Io,
            _ => EngineErrorCode::Store,
        };
        Self::new(code, value.to_string())
    }
}

impl From<BatchError> for EngineError {
    fn from(value: BatchError) -> Self {
        Self::new(EngineErrorCode::Scheduler, value.to_string())
    }
}

impl From<DispatchError> for EngineError {
    fn from(value: DispatchError) -> Self {
        let code = match value.code {
            DispatchErrorCode::Lookup => EngineErrorCode::Store,
            DispatchErrorCode::Allocation => EngineErrorCode::Io,
            _ => EngineErrorCode::Validation,
        };
        Self::new(code, value.to_string())
    }
}
