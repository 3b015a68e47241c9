// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Buffer, Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_MOMENTUM: f32 = 0.99;
pub const DEFAULT_EPSILON: f32 = 1e-3;

/// Batch normalisation over the channel axis of `(batch, C * S)` rows, where
/// `S` is the spatial extent (1 for dense features).
///
/// Running statistics decay with `momentum`:
/// `running = momentum * running + (1 - momentum) * batch_stat`.
#[derive(Debug)]
pub struct BatchNorm {
    channels: usize,
    spatial: usize,
    epsilon: f32,
    momentum: f32,
    gamma: Parameter,
    beta: Parameter,
    running_mean: Buffer,
    running_var: Buffer,
    training: AtomicBool,
    stored_statistics: bool,
}

struct Statistics {
    mean: Vec<f32>,
    inv_std: Vec<f32>,
}

impl BatchNorm {
    /// Normalises dense `(batch, features)` activations.
    pub fn new_1d(name: impl Into<String>, features: usize) -> PureResult<Self> {
        Self::build(name.into(), features, 1, DEFAULT_MOMENTUM, DEFAULT_EPSILON)
    }

    /// Normalises `channels` feature maps of size `input_hw`.
    pub fn new_2d(
        name: impl Into<String>,
        channels: usize,
        input_hw: (usize, usize),
    ) -> PureResult<Self> {
        Self::build(
            name.into(),
            channels,
            input_hw.0 * input_hw.1,
            DEFAULT_MOMENTUM,
            DEFAULT_EPSILON,
        )
    }

    fn build(
        name: String,
        channels: usize,
        spatial: usize,
        momentum: f32,
        epsilon: f32,
    ) -> PureResult<Self> {
        if channels == 0 || spatial == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: channels,
                cols: spatial,
            });
        }
        if !(0.0..=1.0).contains(&momentum) || !momentum.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "batchnorm_momentum",
            });
        }
        if epsilon <= 0.0 || !epsilon.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "batchnorm_epsilon",
                value: epsilon,
            });
        }
        Ok(Self {
            channels,
            spatial,
            epsilon,
            momentum,
            gamma: Parameter::new(format!("{name}::gamma"), Tensor::full(1, channels, 1.0)?),
            beta: Parameter::new(format!("{name}::beta"), Tensor::zeros(1, channels)?),
            running_mean: Buffer::new(
                format!("{name}::running_mean"),
                Tensor::zeros(1, channels)?,
            ),
            running_var: Buffer::new(
                format!("{name}::running_var"),
                Tensor::full(1, channels, 1.0)?,
            ),
            training: AtomicBool::new(true),
            stored_statistics: false,
        })
    }

    /// Pins the layer to its running statistics regardless of the training
    /// flag. Gamma and beta still receive gradients.
    pub fn with_stored_statistics(mut self) -> Self {
        self.stored_statistics = true;
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Whether the next forward pass normalises with batch statistics.
    pub fn uses_batch_statistics(&self) -> bool {
        !self.stored_statistics && self.training.load(Ordering::Relaxed)
    }

    fn guard_input(&self, input: &Tensor) -> PureResult<usize> {
        let (rows, cols) = input.shape();
        if cols != self.channels * self.spatial {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.channels * self.spatial),
            });
        }
        Ok(rows)
    }

    fn batch_statistics(&self, input: &Tensor) -> (Vec<f32>, Vec<f32>) {
        let (batch, cols) = input.shape();
        let count = (batch * self.spatial) as f32;
        let data = input.data();
        let mut mean = vec![0.0f32; self.channels];
        let mut variance = vec![0.0f32; self.channels];
        for c in 0..self.channels {
            let mut sum = 0.0f32;
            for b in 0..batch {
                let start = b * cols + c * self.spatial;
                sum += data[start..start + self.spatial].iter().sum::<f32>();
            }
            mean[c] = sum / count;
            let mut sq = 0.0f32;
            for b in 0..batch {
                let start = b * cols + c * self.spatial;
                for value in &data[start..start + self.spatial] {
                    let centered = value - mean[c];
                    sq += centered * centered;
                }
            }
            variance[c] = sq / count;
        }
        (mean, variance)
    }

    fn stored(&self) -> PureResult<Statistics> {
        let mean = self.running_mean.get()?.into_vec();
        let inv_std = self
            .running_var
            .get()?
            .data()
            .iter()
            .map(|v| 1.0 / (v + self.epsilon).sqrt())
            .collect();
        Ok(Statistics { mean, inv_std })
    }

    fn from_batch(&self, input: &Tensor) -> Statistics {
        let (mean, variance) = self.batch_statistics(input);
        let inv_std = variance
            .iter()
            .map(|v| 1.0 / (v + self.epsilon).sqrt())
            .collect();
        Statistics { mean, inv_std }
    }

    fn normalise(&self, input: &Tensor, stats: &Statistics) -> PureResult<Tensor> {
        let gamma = self.gamma.value().data();
        let beta = self.beta.value().data();
        let data = input.data();
        let (rows, cols) = input.shape();
        Tensor::from_fn(rows, cols, |b, col| {
            let c = col / self.spatial;
            let value = data[b * cols + col];
            (value - stats.mean[c]) * stats.inv_std[c] * gamma[c] + beta[c]
        })
    }

    /// Returns `(grad_input, grad_gamma, grad_beta)`.
    fn gradients(
        &self,
        input: &Tensor,
        grad_output: &Tensor,
        stats: &Statistics,
        through_batch: bool,
    ) -> PureResult<(Tensor, Tensor, Tensor)> {
        if grad_output.shape() != input.shape() {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: input.shape(),
            });
        }
        let (batch, cols) = input.shape();
        let count = (batch * self.spatial) as f32;
        let gamma = self.gamma.value().data();
        let x = input.data();
        let g = grad_output.data();
        let mut sum_g = vec![0.0f32; self.channels];
        let mut sum_g_xhat = vec![0.0f32; self.channels];
        for b in 0..batch {
            for col in 0..cols {
                let c = col / self.spatial;
                let idx = b * cols + col;
                let xhat = (x[idx] - stats.mean[c]) * stats.inv_std[c];
                sum_g[c] += g[idx];
                sum_g_xhat[c] += g[idx] * xhat;
            }
        }
        let grad_input = Tensor::from_fn(batch, cols, |b, col| {
            let c = col / self.spatial;
            let idx = b * cols + col;
            let scale = gamma[c] * stats.inv_std[c];
            if through_batch {
                let xhat = (x[idx] - stats.mean[c]) * stats.inv_std[c];
                scale * (g[idx] - sum_g[c] / count - xhat * sum_g_xhat[c] / count)
            } else {
                scale * g[idx]
            }
        })?;
        let grad_gamma = Tensor::from_vec(1, self.channels, sum_g_xhat)?;
        let grad_beta = Tensor::from_vec(1, self.channels, sum_g)?;
        Ok((grad_input, grad_gamma, grad_beta))
    }
}

impl Module for BatchNorm {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        if !self.uses_batch_statistics() {
            return self.normalise(input, &self.stored()?);
        }
        let (mean, variance) = self.batch_statistics(input);
        let momentum = self.momentum;
        self.running_mean.update(|running| {
            for (r, m) in running.data_mut().iter_mut().zip(mean.iter()) {
                *r = momentum * *r + (1.0 - momentum) * m;
            }
        })?;
        self.running_var.update(|running| {
            for (r, v) in running.data_mut().iter_mut().zip(variance.iter()) {
                *r = momentum * *r + (1.0 - momentum) * v;
            }
        })?;
        let inv_std = variance
            .iter()
            .map(|v| 1.0 / (v + self.epsilon).sqrt())
            .collect();
        self.normalise(input, &Statistics { mean, inv_std })
    }

    fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        self.normalise(input, &self.stored()?)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        let through_batch = self.uses_batch_statistics();
        let stats = if through_batch {
            self.from_batch(input)
        } else {
            self.stored()?
        };
        let (grad_input, grad_gamma, grad_beta) =
            self.gradients(input, grad_output, &stats, through_batch)?;
        self.gamma.accumulate(&grad_gamma)?;
        self.beta.accumulate(&grad_beta)?;
        Ok(grad_input)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        let stats = self.stored()?;
        let (grad_input, _, _) = self.gradients(input, grad_output, &stats, false)?;
        Ok(grad_input)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.gamma)?;
        visitor(&self.beta)?;
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.gamma)?;
        visitor(&mut self.beta)?;
        Ok(())
    }

    fn visit_buffers(&self, visitor: &mut dyn FnMut(&Buffer) -> PureResult<()>) -> PureResult<()> {
        visitor(&self.running_mean)?;
        visitor(&self.running_var)?;
        Ok(())
    }

    fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss(bn: &BatchNorm, input: &Tensor, weights: &Tensor) -> f32 {
        bn.forward(input).unwrap().hadamard(weights).unwrap().data().iter().sum()
    }

    #[test]
    fn training_forward_whitens_each_channel() {
        let bn = BatchNorm::new_2d("bn", 2, (1, 2)).unwrap();
        let input =
            Tensor::from_vec(2, 4, vec![1.0, 3.0, 10.0, 10.0, 5.0, 7.0, 20.0, 20.0]).unwrap();
        let out = bn.forward(&input).unwrap();
        let mut channel0 = 0.0;
        let mut channel1 = 0.0;
        for b in 0..2 {
            channel0 += out.data()[b * 4] + out.data()[b * 4 + 1];
            channel1 += out.data()[b * 4 + 2] + out.data()[b * 4 + 3];
        }
        assert!(channel0.abs() < 1e-4);
        assert!(channel1.abs() < 1e-4);
        let running = bn.running_mean.get().unwrap();
        assert!((running.data()[0] - 0.04).abs() < 1e-5);
        assert!((running.data()[1] - 0.15).abs() < 1e-5);
    }

    #[test]
    fn batch_gradient_matches_finite_difference() {
        let mut bn = BatchNorm::new_1d("bn", 2).unwrap();
        let input = Tensor::from_vec(3, 2, vec![0.5, -1.0, 1.5, 0.2, -0.3, 0.9]).unwrap();
        let weights = Tensor::from_vec(3, 2, vec![1.0, -2.0, 0.5, 3.0, -1.0, 0.25]).unwrap();
        let grad = bn.backward(&input, &weights).unwrap();
        let eps = 1e-2;
        for idx in 0..6 {
            let mut plus = input.clone();
            plus.data_mut()[idx] += eps;
            let mut minus = input.clone();
            minus.data_mut()[idx] -= eps;
            let numeric = (loss(&bn, &plus, &weights) - loss(&bn, &minus, &weights)) / (2.0 * eps);
            assert!(
                (numeric - grad.data()[idx]).abs() < 2e-2,
                "idx {idx}: numeric {numeric} analytic {}",
                grad.data()[idx]
            );
        }
    }

    #[test]
    fn stored_statistics_ignore_training_flag() {
        let bn = BatchNorm::new_1d("bn", 1).unwrap().with_stored_statistics();
        bn.set_training(true);
        let input = Tensor::from_vec(2, 1, vec![4.0, 8.0]).unwrap();
        let out = bn.forward(&input).unwrap();
        let scale = 1.0 / (1.0f32 + DEFAULT_EPSILON).sqrt();
        assert!((out.data()[0] - 4.0 * scale).abs() < 1e-5);
        assert_eq!(bn.running_mean.get().unwrap().data(), &[0.0]);
    }

    #[test]
    fn infer_uses_running_statistics_without_updating_them() {
        let bn = BatchNorm::new_1d("bn", 1).unwrap();
        bn.set_training(true);
        let input = Tensor::from_vec(2, 1, vec![4.0, 8.0]).unwrap();
        let out = bn.infer(&input).unwrap();
        let scale = 1.0 / (1.0f32 + DEFAULT_EPSILON).sqrt();
        assert!((out.data()[1] - 8.0 * scale).abs() < 1e-5);
        assert_eq!(bn.running_mean.get().unwrap().data(), &[0.0]);
        assert_eq!(bn.running_var.get().unwrap().data(), &[1.0]);
        assert!(bn.uses_batch_statistics());
    }

    #[test]
    fn state_dict_includes_running_statistics() {
        let bn = BatchNorm::new_1d("head_bn", 3).unwrap();
        let state = bn.state_dict().unwrap();
        assert!(state.contains_key("head_bn::running_mean"));
        assert!(state.contains_key("head_bn::running_var"));
        assert!(state.contains_key("head_bn::gamma"));
    }
}
