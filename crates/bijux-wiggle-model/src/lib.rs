// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! Wiggle model SSOT: the records shared by the normalizer, the store, the
//! batch adapters and the engine.

mod context;
mod dataset;
mod envelope;
mod job;
mod query;

pub use context::{JobContext, OutputKind};
pub use dataset::{
    parse_constraint, AttributeName, DatasetSelector, ValidationError, ATTRIBUTE_MAX_LEN,
    CORE_DATASET_COLUMNS,
};
pub use envelope::{ResultEnvelope, ResultStatus};
pub use job::{BatchBackend, BatchHandle, CacheEntry, JobId, JobRecord, JobStatus};
pub use query::NormalizedQuery;

pub const CRATE_NAME: &str = "bijux-wiggle-model";
