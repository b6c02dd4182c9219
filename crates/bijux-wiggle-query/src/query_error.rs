// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchErrorCode {
    /// A selection resolved to zero datasets.
    Invalid,
    MalformedOperator,
    ApplyPasteArity,
    Lookup,
    Allocation,
}

impl DispatchErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid_selection",
            Self::MalformedOperator => "malformed_operator",
            Self::ApplyPasteArity => "apply_paste_arity",
            Self::Lookup => "cache_lookup_failed",
            Self::Allocation => "output_allocation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub code: DispatchErrorCode,
    pub message: String,
}

impl DispatchError {
    #[must_use]
    pub fn new(code: DispatchErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for DispatchError {}
