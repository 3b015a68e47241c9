// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use anemo_tensor::TensorError;
use std::path::PathBuf;
use thiserror::Error;

pub type VisionResult<T> = Result<T, VisionError>;

/// Failures raised by image handling, model construction and explanation.
#[derive(Debug, Error)]
pub enum VisionError {
    /// The image violates the three-channel `[0, 255]` contract or could not
    /// be decoded.
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },
    /// Grad-CAM was asked to tap a layer the model does not have.
    #[error("unknown layer '{name}'")]
    UnknownLayer { name: String },
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl VisionError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        VisionError::InvalidImage {
            reason: reason.into(),
        }
    }
}
