// SPDX-License-Identifier: Apache-2.0

use crate::{EngineError, EngineErrorCode};
use bijux_wiggle_model::{DatasetSelector, JobStatus, NormalizedQuery, OutputKind};
use bijux_wiggle_query::{
    BranchCache, ComputeRequest, DispatchErrorCode, DispatchPlan, Operand, OutputAllocator,
};
use bijux_wiggle_store::WiggleStore;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A compute request as the caller states it: selectors, operators and
/// bookkeeping flags. Selections are resolved against the dataset table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSpec {
    pub left: DatasetSelector,
    pub left_operator: String,
    pub right: Option<DatasetSelector>,
    pub right_operator: Option<String>,
    pub merge: Option<String>,
    pub assembly: String,
    /// Exempt the primary result from age-based collection.
    pub pinned: bool,
    pub emails: Vec<String>,
}

impl RequestSpec {
    #[must_use]
    pub fn describe(&self) -> String {
        let left = format!("{} over {}", self.left_operator.trim(), self.left.describe());
        match (&self.right, &self.merge) {
            (Some(right), Some(merge)) => format!(
                "{} of [{left}] against [{} over {}] on {}",
                merge.trim(),
                self.right_operator.as_deref().unwrap_or("datasets").trim(),
                right.describe(),
                self.assembly
            ),
            _ => format!("{left} on {}", self.assembly),
        }
    }
}

/// Outcome of planning without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanOutcome {
    Invalid { reason: String },
    Planned { plan: DispatchPlan },
}

pub(crate) enum Resolved {
    Invalid(String),
    Request(ComputeRequest),
}

pub(crate) fn resolve_request(
    store: &WiggleStore,
    spec: &RequestSpec,
) -> Result<Resolved, EngineError> {
    if spec.left.is_empty() {
        return Err(EngineError::new(
            EngineErrorCode::Validation,
            "left selection needs at least one attribute=value constraint",
        ));
    }
    if spec.right.as_ref().is_some_and(DatasetSelector::is_empty) {
        return Err(EngineError::new(
            EngineErrorCode::Validation,
            "right selection needs at least one attribute=value constraint",
        ));
    }
    if spec.assembly.trim().is_empty() {
        return Err(EngineError::new(EngineErrorCode::Validation, "assembly is required"));
    }
    let left = Operand::transformed(&spec.left_operator, store.resolve(&spec.left, &spec.assembly)?);
    let right = match &spec.right {
        Some(selector) => Some(Operand::transformed(
            spec.right_operator.as_deref().unwrap_or_default(),
            store.resolve(selector, &spec.assembly)?,
        )),
        None => None,
    };
    match ComputeRequest::new(left, right, spec.merge.as_deref()) {
        Ok(request) => Ok(Resolved::Request(request)),
        Err(e) if e.code == DispatchErrorCode::Invalid => Ok(Resolved::Invalid(e.message)),
        Err(e) => Err(e.into()),
    }
}

/// Branch lookups against the store. Previews do not refresh `last_access`.
pub(crate) struct StoreBranches<'a> {
    store: &'a WiggleStore,
    touch: bool,
}

impl<'a> StoreBranches<'a> {
    pub(crate) fn live(store: &'a WiggleStore) -> Self {
        Self { store, touch: true }
    }

    pub(crate) fn preview(store: &'a WiggleStore) -> Self {
        Self {
            store,
            touch: false,
        }
    }
}

impl BranchCache for StoreBranches<'_> {
    fn completed_location(&self, query: &NormalizedQuery) -> Result<Option<String>, String> {
        if self.touch {
            return self
                .store
                .completed_location(query)
                .map_err(|e| e.to_string());
        }
        let Some(entry) = self.store.lookup(query).map_err(|e| e.to_string())? else {
            return Ok(None);
        };
        let Some(job_id) = entry.job_id else {
            return Ok(None);
        };
        let finished = self
            .store
            .get_job(job_id)
            .map_err(|e| e.to_string())?
            .is_some_and(|job| matches!(job.status, JobStatus::Done | JobStatus::Empty));
        Ok(finished.then_some(entry.location))
    }
}

/// Reserves a uniquely named output file in the working directory.
pub(crate) struct TempFileAllocator<'a> {
    dir: &'a Path,
}

impl<'a> TempFileAllocator<'a> {
    pub(crate) fn new(dir: &'a Path) -> Self {
        Self { dir }
    }
}

impl OutputAllocator for TempFileAllocator<'_> {
    fn allocate(&mut self, kind: OutputKind) -> Result<String, String> {
        let (_file, path) = tempfile::Builder::new()
            .prefix("wiggle-")
            .suffix(kind.suffix())
            .tempfile_in(self.dir)
            .map_err(|e| format!("create output in {}: {e}", self.dir.display()))?
            .keep()
            .map_err(|e| e.to_string())?;
        Ok(path.display().to_string())
    }
}

/// Names outputs without creating them.
pub(crate) struct PreviewAllocator {
    dir: PathBuf,
    next: usize,
}

impl PreviewAllocator {
    pub(crate) fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            next: 0,
        }
    }
}

impl OutputAllocator for PreviewAllocator {
    fn allocate(&mut self, kind: OutputKind) -> Result<String, String> {
        self.next += 1;
        Ok(self
            .dir
            .join(format!("wiggle-preview-{}{}", self.next, kind.suffix()))
            .display()
            .to_string())
    }
}
