// This module defines the error taxonomy of the IL code generator using the thiserror
// crate. CodegenError has exactly three families: Format (malformed swizzle or write-mask
// notation), ContractViolation (API misuse such as constructing nodes outside a
// compilation unit, unbalanced control flow, or activating an unknown function) and
// TypeMismatch (an operand type combination for which no emission rule exists). Every
// family is fatal for the current compilation unit: errors are raised at the point of
// malformed construction so that no syntactically valid but wrong assembly is produced.
// CodegenResult<T> is the convenience alias used throughout the crate.

//! Error types for the IL code generator.
//!
//! Using thiserror for idiomatic error handling.

use thiserror::Error;

/// Main error type for code generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("Invalid {notation} '{text}': {reason}")]
    Format {
        notation: &'static str,
        text: String,
        reason: String,
    },

    #[error("Contract violation: {reason}")]
    ContractViolation { reason: String },

    #[error("No emission rule for {operation} over ({operands})")]
    TypeMismatch {
        operation: String,
        operands: String,
    },
}

impl CodegenError {
    pub fn format(notation: &'static str, text: &str, reason: impl Into<String>) -> Self {
        CodegenError::Format {
            notation,
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    pub fn contract(reason: impl Into<String>) -> Self {
        CodegenError::ContractViolation {
            reason: reason.into(),
        }
    }

    pub fn type_mismatch(operation: impl Into<String>, operands: impl Into<String>) -> Self {
        CodegenError::TypeMismatch {
            operation: operation.into(),
            operands: operands.into(),
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(self, CodegenError::Format { .. })
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, CodegenError::ContractViolation { .. })
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, CodegenError::TypeMismatch { .. })
    }
}

/// Result type alias for code generation operations.
pub type CodegenResult<T> = Result<T, CodegenError>;
