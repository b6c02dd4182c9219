// SPDX-License-Identifier: Apache-2.0

use crate::{DispatchError, DispatchErrorCode};
use bijux_wiggle_model::NormalizedQuery;
use serde::{Deserialize, Serialize};

/// Token that closes an operand's dataset list in a stage expression.
const OPERAND_TERMINATOR: &str = ":";

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Collapses every run of non-word characters into one space and drops the
/// separators at both ends.
#[must_use]
pub fn normalize_spaces(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;
    for c in input.chars() {
        if is_word_char(c) {
            if pending_separator && !out.is_empty() {
                out.push(' ');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }
    out
}

/// One side of a request: an optional operator applied to resolved datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub operator: Option<String>,
    pub datasets: Vec<String>,
}

impl Operand {
    #[must_use]
    pub fn transformed(operator: &str, datasets: Vec<String>) -> Self {
        let operator = normalize_spaces(operator);
        Self {
            operator: (!operator.is_empty()).then_some(operator),
            datasets,
        }
    }

    #[must_use]
    pub fn pass_through(datasets: Vec<String>) -> Self {
        Self {
            operator: None,
            datasets,
        }
    }

    fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .operator
            .iter()
            .flat_map(|op| op.split(' '))
            .map(ToString::to_string)
            .collect();
        tokens.extend(self.datasets.iter().cloned());
        tokens
    }

    #[must_use]
    pub fn expression(&self) -> String {
        self.tokens().join(" ")
    }

    /// Self-contained stage expression of a transformed operand.
    #[must_use]
    pub fn branch_tokens(&self) -> Option<Vec<String>> {
        self.operator.as_ref()?;
        let mut tokens = self.tokens();
        tokens.push(OPERAND_TERMINATOR.to_string());
        Some(tokens)
    }

    /// Cache key of the operand's own output; `None` for pass-through operands.
    #[must_use]
    pub fn branch_query(&self) -> Option<NormalizedQuery> {
        let tokens = self.branch_tokens()?;
        NormalizedQuery::new(tokens.join(" ")).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub left: Operand,
    pub right: Option<Operand>,
    pub merge: Option<String>,
}

impl ComputeRequest {
    /// Validates a request whose selections are already resolved to locations.
    pub fn new(
        left: Operand,
        right: Option<Operand>,
        merge: Option<&str>,
    ) -> Result<Self, DispatchError> {
        if left.operator.is_none() {
            return Err(DispatchError::new(
                DispatchErrorCode::MalformedOperator,
                "left operand requires an operator",
            ));
        }
        if left.datasets.is_empty() {
            return Err(DispatchError::new(
                DispatchErrorCode::Invalid,
                "left selection resolved to zero datasets",
            ));
        }
        let merge = merge.map(normalize_spaces).filter(|m| !m.is_empty());
        match &right {
            Some(r) if r.datasets.is_empty() => {
                return Err(DispatchError::new(
                    DispatchErrorCode::Invalid,
                    "right selection resolved to zero datasets",
                ));
            }
            Some(_) if merge.is_none() => {
                return Err(DispatchError::new(
                    DispatchErrorCode::MalformedOperator,
                    "a merge operator is required when a right operand is given",
                ));
            }
            _ => {}
        }
        Ok(Self {
            merge: right.as_ref().and(merge),
            left,
            right,
        })
    }
}

/// `"<opA> <paths>"` or `"<merge>; <opA> <pathsA>; <opB-or-paths B>"`.
pub fn normalize_query(request: &ComputeRequest) -> Result<NormalizedQuery, DispatchError> {
    let left = request.left.expression();
    let raw = match (&request.right, &request.merge) {
        (Some(right), Some(merge)) => format!("{merge}; {left}; {}", right.expression()),
        _ => left,
    };
    NormalizedQuery::new(raw)
        .map_err(|e| DispatchError::new(DispatchErrorCode::MalformedOperator, e.to_string()))
}
