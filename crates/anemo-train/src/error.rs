// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::phase::Phase;
use anemo_config::ConfigError;
use anemo_tensor::TensorError;
use anemo_vision::VisionError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced while preparing data, training or writing artefacts.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("variant '{variant}' has no dataset at {path}")]
    MissingVariant { variant: String, path: PathBuf },
    #[error("dataset at {path} is unusable: {reason}")]
    Dataset { path: PathBuf, reason: String },
    #[error("{phase} diverged at epoch {epoch}, batch {batch}: loss = {loss}")]
    Diverged {
        phase: Phase,
        epoch: usize,
        batch: usize,
        loss: f32,
    },
    #[error("checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn dataset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type TrainResult<T> = Result<T, TrainError>;
