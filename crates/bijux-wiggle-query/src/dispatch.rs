// SPDX-License-Identifier: Apache-2.0

use crate::normalize::{normalize_query, ComputeRequest, Operand};
use crate::{DispatchError, DispatchErrorCode};
use bijux_wiggle_model::{NormalizedQuery, OutputKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const HISTOGRAM_TOTAL_LABEL: &str = "ALL";
pub const HISTOGRAM_REGIONS_LABEL: &str = "Regions";
pub const APPLY_PASTE_METRIC: &str = "AUC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum MergeClass {
    Histogram { width: String },
    Profile { param: String },
    Profiles { param: String },
    ApplyPaste,
    /// Binary merge written as a new track.
    Write,
}

/// Classifies a normalized merge operator by its leading token.
pub fn classify_merge(merge: &str) -> Result<MergeClass, DispatchError> {
    let mut words = merge.split(' ');
    let head = words.next().unwrap_or_default();
    let mut param = |name: &str| {
        words
            .next()
            .filter(|w| !w.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| {
                DispatchError::new(
                    DispatchErrorCode::MalformedOperator,
                    format!("`{head}` requires a {name} parameter"),
                )
            })
    };
    match head {
        "histogram" => Ok(MergeClass::Histogram {
            width: param("bin width")?,
        }),
        "profile" => Ok(MergeClass::Profile {
            param: param("window")?,
        }),
        "profiles" => Ok(MergeClass::Profiles {
            param: param("method")?,
        }),
        "apply_paste" => Ok(MergeClass::ApplyPaste),
        _ => Ok(MergeClass::Write),
    }
}

/// Read side of the cache as seen by the dispatcher: completed branch outputs.
pub trait BranchCache {
    fn completed_location(&self, query: &NormalizedQuery) -> Result<Option<String>, String>;
}

/// Creates a fresh, unique output file and returns its location.
pub trait OutputAllocator {
    fn allocate(&mut self, kind: OutputKind) -> Result<String, String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCacheRow {
    pub query: NormalizedQuery,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPlan {
    pub normalized: NormalizedQuery,
    pub class: Option<MergeClass>,
    /// Independent compute commands, one argument vector each.
    pub stage1: Vec<Vec<String>>,
    /// Command that reads the stage-1 outputs, run by the finish stage.
    pub finish_command: Option<Vec<String>>,
    pub destination: String,
    pub output_kind: OutputKind,
    /// Branch outputs produced by this plan, reusable by later requests.
    pub secondary: Vec<PlannedCacheRow>,
    pub labels: Vec<String>,
}

struct ResolvedBranch {
    expression: Vec<String>,
    location: Option<String>,
    materialize: Option<PlannedCacheRow>,
}

fn resolve_branch(
    operand: &Operand,
    cache: &dyn BranchCache,
    allocator: &mut dyn OutputAllocator,
) -> Result<ResolvedBranch, DispatchError> {
    let (Some(query), Some(tokens)) = (operand.branch_query(), operand.branch_tokens()) else {
        return Ok(ResolvedBranch {
            expression: operand.datasets.clone(),
            location: None,
            materialize: None,
        });
    };
    let cached = cache
        .completed_location(&query)
        .map_err(|e| DispatchError::new(DispatchErrorCode::Lookup, e))?;
    if let Some(location) = cached {
        debug!(query = %query, location = %location, "reusing cached branch");
        return Ok(ResolvedBranch {
            expression: vec![location.clone()],
            location: Some(location),
            materialize: None,
        });
    }
    let destination = allocate(allocator, OutputKind::Track)?;
    let mut expression = vec!["write".to_string(), destination.clone()];
    expression.extend(tokens);
    Ok(ResolvedBranch {
        expression,
        location: Some(destination.clone()),
        materialize: Some(PlannedCacheRow {
            query,
            location: destination,
        }),
    })
}

fn allocate(allocator: &mut dyn OutputAllocator, kind: OutputKind) -> Result<String, DispatchError> {
    allocator
        .allocate(kind)
        .map_err(|e| DispatchError::new(DispatchErrorCode::Allocation, e))
}

fn dataset_label(location: &str) -> String {
    Path::new(location)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string())
}

/// Splits a request into cached branches and the commands still to run.
pub fn plan_dispatch(
    request: &ComputeRequest,
    cache: &dyn BranchCache,
    allocator: &mut dyn OutputAllocator,
) -> Result<DispatchPlan, DispatchError> {
    let normalized = normalize_query(request)?;
    let (Some(right), Some(merge)) = (&request.right, &request.merge) else {
        let left = resolve_branch(&request.left, cache, allocator)?;
        let destination = left.location.clone().ok_or_else(|| {
            DispatchError::new(
                DispatchErrorCode::MalformedOperator,
                "left operand requires an operator",
            )
        })?;
        let stage1 = if left.materialize.is_some() {
            vec![left.expression]
        } else {
            Vec::new()
        };
        return Ok(DispatchPlan {
            normalized,
            class: None,
            stage1,
            finish_command: None,
            destination,
            output_kind: OutputKind::Track,
            secondary: left.materialize.into_iter().collect(),
            labels: Vec::new(),
        });
    };

    let class = classify_merge(merge)?;
    if class == MergeClass::ApplyPaste && right.datasets.len() != 1 {
        return Err(DispatchError::new(
            DispatchErrorCode::ApplyPasteArity,
            format!(
                "apply_paste needs exactly one right-hand dataset, got {}",
                right.datasets.len()
            ),
        ));
    }

    let left = resolve_branch(&request.left, cache, allocator)?;
    let left_location = left.location.clone().ok_or_else(|| {
        DispatchError::new(
            DispatchErrorCode::MalformedOperator,
            "left operand requires an operator",
        )
    })?;
    // apply_paste reads the raw right-hand dataset, so its branch is never built.
    let right = if class == MergeClass::ApplyPaste {
        ResolvedBranch {
            expression: right.datasets.clone(),
            location: None,
            materialize: None,
        }
    } else {
        resolve_branch(right, cache, allocator)?
    };

    let materialized: Vec<Vec<String>> = [&left, &right]
        .into_iter()
        .filter(|b| b.materialize.is_some())
        .map(|b| b.expression.clone())
        .collect();

    let mut labels = Vec::new();
    let (stage1, finish_command, destination, output_kind) = match &class {
        MergeClass::Histogram { width } => {
            let destination = allocate(allocator, OutputKind::Table)?;
            let mut cmd = vec![
                "histogram".to_string(),
                destination.clone(),
                width.clone(),
                left_location.clone(),
            ];
            labels.push(HISTOGRAM_TOTAL_LABEL.to_string());
            if let Some(right_location) = &right.location {
                cmd.extend(["mult".to_string(), left_location.clone(), right_location.clone()]);
                labels.push(HISTOGRAM_REGIONS_LABEL.to_string());
            } else {
                for dataset in &right.expression {
                    cmd.extend(["mult".to_string(), left_location.clone(), dataset.clone()]);
                    labels.push(dataset_label(dataset));
                }
            }
            (materialized, Some(cmd), destination, OutputKind::Table)
        }
        MergeClass::Profile { param } | MergeClass::Profiles { param } => {
            let destination = allocate(allocator, OutputKind::Table)?;
            let head = if matches!(class, MergeClass::Profile { .. }) {
                "profile"
            } else {
                "profiles"
            };
            let mut cmd = vec![head.to_string(), destination.clone(), param.clone()];
            cmd.extend(right.expression.iter().cloned());
            cmd.extend(left.expression.iter().cloned());
            (vec![cmd], None, destination, OutputKind::Table)
        }
        MergeClass::ApplyPaste => {
            let destination = allocate(allocator, OutputKind::Table)?;
            let cmd = vec![
                "apply_paste".to_string(),
                destination.clone(),
                APPLY_PASTE_METRIC.to_string(),
                right.expression[0].clone(),
                left_location.clone(),
            ];
            (materialized, Some(cmd), destination, OutputKind::Table)
        }
        MergeClass::Write => {
            let destination = allocate(allocator, OutputKind::Track)?;
            let mut cmd = vec!["write".to_string(), destination.clone()];
            cmd.extend(merge.split(' ').map(ToString::to_string));
            cmd.extend(left.expression.iter().cloned());
            cmd.extend(right.expression.iter().cloned());
            (vec![cmd], None, destination, OutputKind::Track)
        }
    };

    let secondary = [left.materialize, right.materialize]
        .into_iter()
        .flatten()
        .collect();
    Ok(DispatchPlan {
        normalized,
        class: Some(class),
        stage1,
        finish_command,
        destination,
        output_kind,
        secondary,
        labels,
    })
}
