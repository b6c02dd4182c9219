// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod dispatch;
mod normalize;
mod query_error;

pub use dispatch::{
    classify_merge, plan_dispatch, BranchCache, DispatchPlan, MergeClass, OutputAllocator,
    PlannedCacheRow, APPLY_PASTE_METRIC, HISTOGRAM_TOTAL_LABEL,
};
pub use normalize::{normalize_query, normalize_spaces, ComputeRequest, Operand};
pub use query_error::{DispatchError, DispatchErrorCode};

pub const CRATE_NAME: &str = "bijux-wiggle-query";
