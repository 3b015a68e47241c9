// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::tap::TapGradient;
use crate::error::{VisionError, VisionResult};
use crate::models::ClassifierModel;
use crate::rgb::ImageTensor;
use anemo_tensor::{PureResult, Tensor, TensorError};

#[derive(Debug, Clone, Copy)]
pub struct GradCamConfig {
    pub height: usize,
    pub width: usize,
    pub apply_relu: bool,
}

impl GradCamConfig {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            apply_relu: true,
        }
    }
}

fn ensure_same_shape(lhs: &Tensor, rhs: &Tensor) -> PureResult<()> {
    if lhs.shape() != rhs.shape() {
        return Err(TensorError::ShapeMismatch {
            left: lhs.shape(),
            right: rhs.shape(),
        });
    }
    Ok(())
}

/// Divides by the maximum. A maximum that is not positive and finite zeroes
/// the map.
pub fn normalise_by_max(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !(max.is_finite() && max > 0.0) || values.iter().any(|v| !v.is_finite()) {
        values.iter_mut().for_each(|value| *value = 0.0);
        return;
    }
    for value in values.iter_mut() {
        *value /= max;
    }
}

pub struct GradCam;

impl GradCam {
    /// `activations` and `gradients` are `(channels, height * width)`.
    pub fn attribute(
        activations: &Tensor,
        gradients: &Tensor,
        config: &GradCamConfig,
    ) -> PureResult<Tensor> {
        ensure_same_shape(activations, gradients)?;
        if config.height == 0 || config.width == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: config.height,
                cols: config.width,
            });
        }
        let spatial = config.height * config.width;
        let (channels, features) = activations.shape();
        if features != spatial {
            return Err(TensorError::ShapeMismatch {
                left: (channels, features),
                right: (channels, spatial),
            });
        }
        let mut weights = vec![0.0f32; channels];
        for (channel, weight) in weights.iter_mut().enumerate() {
            let row = &gradients.data()[channel * features..(channel + 1) * features];
            *weight = row.iter().sum::<f32>() / features as f32;
        }
        let mut heatmap = vec![0.0f32; spatial];
        for (idx, cell) in heatmap.iter_mut().enumerate() {
            let mut value = 0.0f32;
            for (channel, weight) in weights.iter().enumerate() {
                value += weight * activations.data()[channel * features + idx];
            }
            if config.apply_relu && value < 0.0 {
                value = 0.0;
            }
            *cell = value;
        }
        normalise_by_max(&mut heatmap);
        Tensor::from_vec(config.height, config.width, heatmap)
    }
}

/// Prediction and saliency map for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    /// Sigmoid output in `[0, 1]`.
    pub prediction: f32,
    /// `(height, width)` map over the tap layer's spatial grid, values in
    /// `[0, 1]`.
    pub heatmap: Tensor,
}

/// Grad-CAM of output `unit` for a single preprocessed input row.
pub fn grad_cam<M: TapGradient + ?Sized>(
    model: &M,
    input: &Tensor,
    tap: &str,
    unit: usize,
) -> VisionResult<Explanation> {
    let forward = model.tap_forward(input, tap)?;
    let gradient = model.tap_gradient(&forward, unit)?;
    let shape = forward.shape;
    let spatial = shape.hw.0 * shape.hw.1;
    let activations =
        Tensor::from_vec(shape.channels, spatial, forward.activation.data().to_vec())?;
    let gradients = Tensor::from_vec(shape.channels, spatial, gradient.into_vec())?;
    let heatmap = GradCam::attribute(
        &activations,
        &gradients,
        &GradCamConfig::new(shape.hw.0, shape.hw.1),
    )?;
    Ok(Explanation {
        prediction: forward.output.data()[unit],
        heatmap,
    })
}

/// Explains the model's single sigmoid output for `image`, which must already
/// have the model's input size. Runs with evaluation semantics through the
/// model's own preprocessing and leaves the training flag as it found it.
pub fn explain(
    image: &ImageTensor,
    model: &ClassifierModel,
    tap: &str,
) -> VisionResult<Explanation> {
    let expected = model.config().input_hw();
    if image.hw() != expected {
        return Err(VisionError::invalid(format!(
            "expected a {}x{} image, got {}x{}",
            expected.0,
            expected.1,
            image.height(),
            image.width()
        )));
    }
    let input = model.preprocessor().to_input_row(image)?;
    grad_cam(model, &input, tap, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grad_cam_normalises_heatmap() {
        let activations = Tensor::from_vec(
            2,
            4,
            vec![
                1.0, 1.0, 1.0, 1.0, // channel 0
                0.5, 1.0, 1.5, 2.0, // channel 1
            ],
        )
        .unwrap();
        let gradients = Tensor::from_vec(
            2,
            4,
            vec![
                -1.0, -1.0, -1.0, -1.0, // channel 0
                0.0, 0.0, 0.0, 4.0, // channel 1
            ],
        )
        .unwrap();
        let heatmap =
            GradCam::attribute(&activations, &gradients, &GradCamConfig::new(2, 2)).unwrap();
        // weights (-1, 1): -1 + channel 1, clipped at zero.
        let expected = [0.0, 0.0, 0.5, 1.0];
        for (value, expected) in heatmap.data().iter().zip(expected.iter()) {
            assert!((value - expected).abs() < 1e-6);
        }
        assert_eq!(heatmap.shape(), (2, 2));
    }

    #[test]
    fn degenerate_maxima_give_zero_maps() {
        let mut negative = vec![-1.0, -0.5, 0.0];
        normalise_by_max(&mut negative);
        assert_eq!(negative, vec![0.0; 3]);
        let mut poisoned = vec![0.5, f32::NAN, 1.0];
        normalise_by_max(&mut poisoned);
        assert_eq!(poisoned, vec![0.0; 3]);
        let mut infinite = vec![0.5, f32::INFINITY];
        normalise_by_max(&mut infinite);
        assert_eq!(infinite, vec![0.0; 2]);
    }
}
