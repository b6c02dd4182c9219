// SPDX-License-Identifier: Apache-2.0

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Canonical cache key and audit record of a requested computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedQuery(String);

impl NormalizedQuery {
    /// Wraps an already canonical key, e.g. one read back from the cache table.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError("normalized query must not be empty".to_string()));
        }
        if value.trim() != value {
            return Err(ValidationError(
                "normalized query must not carry surrounding whitespace".to_string(),
            ));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NormalizedQuery {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NormalizedQuery> for String {
    fn from(value: NormalizedQuery) -> Self {
        value.0
    }
}

impl Display for NormalizedQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
