// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{VisionError, VisionResult};
use crate::models::{ClassifierModel, FeatureShape, ModelTrace};
use anemo_tensor::{Tensor, TensorError};

/// Forward pass that kept the activation of a named intermediate layer.
#[derive(Debug, Clone)]
pub struct TapForward {
    /// Tap activation, `(1, C * H * W)` channel-major.
    pub activation: Tensor,
    /// Model output, `(1, units)`.
    pub output: Tensor,
    pub shape: FeatureShape,
    tap_index: usize,
    trace: ModelTrace,
}

/// Gradient of a scalar model output with respect to a named intermediate
/// activation.
pub trait TapGradient: Sync {
    fn tap_forward(&self, input: &Tensor, tap: &str) -> VisionResult<TapForward>;

    /// Gradient of output `unit` with respect to `forward.activation`. Never
    /// touches parameter accumulators.
    fn tap_gradient(&self, forward: &TapForward, unit: usize) -> VisionResult<Tensor>;
}

impl TapGradient for ClassifierModel {
    fn tap_forward(&self, input: &Tensor, tap: &str) -> VisionResult<TapForward> {
        let backbone = self.backbone();
        let (Some(tap_index), Some(shape)) =
            (backbone.stack().position(tap), backbone.feature_shape(tap))
        else {
            return Err(VisionError::UnknownLayer {
                name: tap.to_string(),
            });
        };
        if input.shape().0 != 1 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: (1, input.shape().1),
            }
            .into());
        }
        let trace = self.trace_inference(input)?;
        let activation = trace
            .backbone
            .layer_output(tap_index)
            .cloned()
            .ok_or_else(|| VisionError::UnknownLayer {
                name: tap.to_string(),
            })?;
        Ok(TapForward {
            activation,
            output: trace.output().clone(),
            shape,
            tap_index,
            trace,
        })
    }

    fn tap_gradient(&self, forward: &TapForward, unit: usize) -> VisionResult<Tensor> {
        let units = forward.output.shape().1;
        if unit >= units {
            return Err(TensorError::InvalidValue {
                label: "tap_gradient_unit",
            }
            .into());
        }
        let seed = Tensor::from_fn(1, units, |_, c| if c == unit { 1.0 } else { 0.0 })?;
        let grad_features = self
            .head()
            .input_gradient_with_trace(&forward.trace.head, &seed)?;
        let grad = self.backbone().stack().gradient_at(
            &forward.trace.backbone,
            forward.tap_index,
            &grad_features,
        )?;
        Ok(grad)
    }
}
