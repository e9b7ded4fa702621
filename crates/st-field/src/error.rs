// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Errors raised by field primitives and every neural-operator component built on them.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FieldError {
    /// A caller supplied an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Two shapes that must agree did not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A component was configured in a way that cannot be executed.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A numeric operation would divide by zero or otherwise produce an unflagged NaN.
    #[error("numerically degenerate {label}: {detail}")]
    NumericDegenerate { label: &'static str, detail: String },
    /// Axis index beyond the rank of the field.
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    /// Flat buffer length did not match the requested shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
}

/// Result alias used across the field and neural-operator crates.
pub type FieldResult<T> = Result<T, FieldError>;

impl FieldError {
    /// Convenience constructor for [`FieldError::ShapeMismatch`].
    pub fn shape(expected: &[usize], got: &[usize]) -> Self {
        FieldError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
