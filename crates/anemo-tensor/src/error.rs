// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Result alias used by every numeric helper in the workspace.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors raised by tensor constructors, operators and persistence helpers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    #[error("invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero")]
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor does not match the tensor shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Computation received an empty input which would otherwise trigger a panic.
    #[error("empty input encountered in {0}")]
    EmptyInput(&'static str),
    /// Attempted to load a parameter that was missing from the state dict.
    #[error("missing parameter '{name}' in state dict")]
    MissingParameter { name: String },
    /// Numeric guard detected a non-finite value.
    #[error("non-finite value {value} encountered in {label}")]
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    #[error("invalid value for {label}")]
    InvalidValue { label: &'static str },
    /// Wrapper around I/O failures when persisting or restoring tensors.
    #[error("i/o error: {message}")]
    IoError { message: String },
    /// Wrapper around serde failures when (de)serialising tensors.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}
