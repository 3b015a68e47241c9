// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor, TensorError};

/// Trait implemented by differentiable losses that operate directly on
/// tensors.
pub trait Loss {
    /// Computes the loss value for the given predictions and targets as a
    /// `1 x 1` tensor.
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;

    /// Returns the gradient of the loss with respect to the predictions.
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;
}

/// Binary cross-entropy over sigmoid probabilities, averaged over the batch.
///
/// With class weights each sample's term is scaled by the weight of its
/// label (`label >= 0.5` selects class 1). The mean still divides by the
/// sample count, not by the summed weights.
#[derive(Debug, Clone, Copy)]
pub struct BinaryCrossEntropy {
    class_weights: Option<[f32; 2]>,
    epsilon: f32,
}

impl Default for BinaryCrossEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryCrossEntropy {
    pub fn new() -> Self {
        Self {
            class_weights: None,
            epsilon: 1e-7,
        }
    }

    /// Weights `[negative, positive]` applied per sample.
    pub fn with_class_weights(mut self, weights: [f32; 2]) -> Self {
        self.class_weights = Some(weights);
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon.clamp(1e-12, 0.1);
        self
    }

    pub fn class_weights(&self) -> Option<[f32; 2]> {
        self.class_weights
    }

    fn weight(&self, target: f32) -> f32 {
        match self.class_weights {
            Some([negative, positive]) => {
                if target >= 0.5 {
                    positive
                } else {
                    negative
                }
            }
            None => 1.0,
        }
    }

    fn guard(prediction: &Tensor, target: &Tensor) -> PureResult<()> {
        if prediction.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                left: prediction.shape(),
                right: target.shape(),
            });
        }
        Ok(())
    }
}

impl Loss for BinaryCrossEntropy {
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        Self::guard(prediction, target)?;
        let inv = 1.0 / prediction.len() as f32;
        let mut sum = 0.0f32;
        for (&pred, &tgt) in prediction.data().iter().zip(target.data().iter()) {
            let prob = pred.clamp(self.epsilon, 1.0 - self.epsilon);
            let term = -(tgt * prob.ln() + (1.0 - tgt) * (1.0 - prob).ln());
            sum += self.weight(tgt) * term;
        }
        Tensor::from_vec(1, 1, vec![sum * inv])
    }

    /// The derivative is evaluated at the clipped probability, which keeps it
    /// finite when the sigmoid saturates.
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        Self::guard(prediction, target)?;
        let (rows, cols) = prediction.shape();
        let inv = 1.0 / (rows * cols) as f32;
        let grad = prediction
            .data()
            .iter()
            .zip(target.data().iter())
            .map(|(&pred, &tgt)| {
                let prob = pred.clamp(self.epsilon, 1.0 - self.epsilon);
                self.weight(tgt) * (prob - tgt) / (prob * (1.0 - prob)) * inv
            })
            .collect();
        Tensor::from_vec(rows, cols, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unweighted_value_matches_closed_form() {
        let mut loss = BinaryCrossEntropy::new();
        let prediction = Tensor::from_vec(2, 1, vec![0.9, 0.2]).unwrap();
        let target = Tensor::from_vec(2, 1, vec![1.0, 0.0]).unwrap();
        let value = loss.forward(&prediction, &target).unwrap().data()[0];
        let expected = -(0.9f32.ln() + 0.8f32.ln()) / 2.0;
        assert!((value - expected).abs() < 1e-6);
    }

    #[test]
    fn class_weights_scale_each_label() {
        let prediction = Tensor::from_vec(2, 1, vec![0.6, 0.6]).unwrap();
        let target = Tensor::from_vec(2, 1, vec![1.0, 0.0]).unwrap();
        let mut plain = BinaryCrossEntropy::new();
        let mut weighted = BinaryCrossEntropy::new().with_class_weights([0.5, 2.0]);
        let plain_grad = plain.backward(&prediction, &target).unwrap();
        let weighted_grad = weighted.backward(&prediction, &target).unwrap();
        assert!((weighted_grad.data()[0] - 2.0 * plain_grad.data()[0]).abs() < 1e-6);
        assert!((weighted_grad.data()[1] - 0.5 * plain_grad.data()[1]).abs() < 1e-6);
    }

    #[test]
    fn gradient_times_sigmoid_slope_is_residual() {
        let mut loss = BinaryCrossEntropy::new();
        let p = 0.3f32;
        let prediction = Tensor::from_vec(1, 1, vec![p]).unwrap();
        let target = Tensor::from_vec(1, 1, vec![1.0]).unwrap();
        let grad = loss.backward(&prediction, &target).unwrap().data()[0];
        assert!((grad * p * (1.0 - p) - (p - 1.0)).abs() < 1e-5);
    }

    #[test]
    fn nan_label_yields_nan_loss() {
        let mut loss = BinaryCrossEntropy::new().with_class_weights([1.0, 1.0]);
        let prediction = Tensor::from_vec(2, 1, vec![0.4, 0.7]).unwrap();
        let target = Tensor::from_vec(2, 1, vec![f32::NAN, 1.0]).unwrap();
        assert!(loss.forward(&prediction, &target).unwrap().data()[0].is_nan());
    }
}
