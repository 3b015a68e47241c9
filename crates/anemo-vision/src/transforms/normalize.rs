// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{VisionError, VisionResult};
use crate::rgb::ImageTensor;
use serde::{Deserialize, Serialize};

/// Per-channel standardisation applied after scaling levels to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet channel statistics used by the pretrained backbone.
    pub fn imagenet() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    /// Value range an input in `[0, 255]` is mapped to, per channel.
    pub fn output_range(&self) -> [(f32, f32); 3] {
        let mut range = [(0.0, 0.0); 3];
        for (c, slot) in range.iter_mut().enumerate() {
            *slot = (
                -self.mean[c] / self.std[c],
                (1.0 - self.mean[c]) / self.std[c],
            );
        }
        range
    }

    pub fn apply(&self, image: &ImageTensor) -> VisionResult<ImageTensor> {
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(VisionError::invalid(
                "normalization std must be positive and finite",
            ));
        }
        let mut output = image.clone();
        for pixel in output.data_mut().chunks_exact_mut(3) {
            for (c, value) in pixel.iter_mut().enumerate() {
                *value = (*value / 255.0 - self.mean[c]) / self.std[c];
            }
        }
        Ok(output)
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::imagenet()
    }
}
