// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const ATTRIBUTE_MAX_LEN: usize = 64;

/// Leading columns every dataset table carries, in this order.
pub const CORE_DATASET_COLUMNS: [&str; 5] = ["location", "name", "type", "annotation", "assembly"];

/// Column identifier of the dataset table. Only the shape is checked here;
/// membership in the live schema is checked by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct AttributeName(String);

impl AttributeName {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("attribute name must not be empty".to_string()));
        }
        if s.len() > ATTRIBUTE_MAX_LEN {
            return Err(ValidationError(format!(
                "attribute name exceeds max length {ATTRIBUTE_MAX_LEN}"
            )));
        }
        let mut chars = s.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError(format!(
                "attribute name `{s}` must match [A-Za-z_][A-Za-z0-9_]*"
            )));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AttributeName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AttributeName> for String {
    fn from(value: AttributeName) -> Self {
        value.0
    }
}

impl Display for AttributeName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute constraints: values OR-ed within an attribute, attributes AND-ed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetSelector(BTreeMap<AttributeName, Vec<String>>);

impl DatasetSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a selector from `attribute=value` tokens.
    pub fn from_constraints<S: AsRef<str>>(constraints: &[S]) -> Result<Self, ValidationError> {
        let mut selector = Self::new();
        for raw in constraints {
            let (attribute, value) = parse_constraint(raw.as_ref())?;
            selector.insert(attribute, value);
        }
        Ok(selector)
    }

    pub fn insert(&mut self, attribute: AttributeName, value: String) {
        let values = self.0.entry(attribute).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeName, &[String])> {
        self.0.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Human readable form used in job descriptions.
    #[must_use]
    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(|(attribute, values)| {
                let alternatives = values
                    .iter()
                    .map(|v| format!("{attribute}={v}"))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                format!("({alternatives})")
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

pub fn parse_constraint(input: &str) -> Result<(AttributeName, String), ValidationError> {
    let (attribute, value) = input
        .split_once('=')
        .ok_or_else(|| ValidationError(format!("constraint `{input}` must be attribute=value")))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError(format!(
            "constraint `{input}` has an empty value"
        )));
    }
    Ok((AttributeName::parse(attribute)?, value.to_string()))
}
