// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The preprocessing shared by training, inference and explanation.

use crate::error::VisionResult;
use crate::rgb::ImageTensor;
use crate::transforms::{clahe, ClaheConfig, Normalization};
use anemo_tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Contrast enhancement followed by backbone normalization.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Preprocessor {
    pub clahe: ClaheConfig,
    pub normalization: Normalization,
}

impl Preprocessor {
    pub fn apply(&self, image: &ImageTensor) -> VisionResult<ImageTensor> {
        let enhanced = clahe(image, &self.clahe)?;
        self.normalization.apply(&enhanced)
    }

    /// [`Preprocessor::apply`] followed by conversion to a `(1, 3 * H * W)`
    /// network input row.
    pub fn to_input_row(&self, image: &ImageTensor) -> VisionResult<Tensor> {
        self.apply(image)?.to_planar_row()
    }
}

/// Preprocesses with the default configuration (CLAHE 3.0 on an 8x8 grid,
/// ImageNet statistics).
pub fn preprocess(image: &ImageTensor) -> VisionResult<ImageTensor> {
    Preprocessor::default().apply(image)
}
