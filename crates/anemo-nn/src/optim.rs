// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use crate::{PureResult, Tensor, TensorError};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Moments {
    first: Tensor,
    second: Tensor,
}

/// Adam with the bias correction folded into the step size:
/// `lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)`.
///
/// Moment estimates are keyed by parameter name, so one optimizer can drive a
/// subset of a module selected per step.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    iterations: u64,
    moments: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> PureResult<Self> {
        Self::with_betas(learning_rate, 0.9, 0.999, 1e-7)
    }

    pub fn with_betas(
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> PureResult<Self> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "adam_learning_rate",
                value: learning_rate,
            });
        }
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(TensorError::InvalidValue { label: "adam_betas" });
        }
        if epsilon <= 0.0 {
            return Err(TensorError::InvalidValue {
                label: "adam_epsilon",
            });
        }
        Ok(Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            iterations: 0,
            moments: HashMap::new(),
        })
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) -> PureResult<()> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "adam_learning_rate",
                value: learning_rate,
            });
        }
        self.learning_rate = learning_rate;
        Ok(())
    }

    /// Number of completed update steps.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Applies one update to every parameter that holds a gradient and whose
    /// name passes `filter`. Returns the number of updated parameters.
    pub fn step<M: Module + ?Sized>(
        &mut self,
        module: &mut M,
        filter: &dyn Fn(&str) -> bool,
    ) -> PureResult<usize> {
        self.iterations += 1;
        let t = self.iterations as i32;
        let lr_t = self.learning_rate * (1.0 - self.beta2.powi(t)).sqrt()
            / (1.0 - self.beta1.powi(t));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let moments = &mut self.moments;
        let mut updated = 0usize;
        module.visit_parameters_mut(&mut |param| {
            if !filter(param.name()) {
                return Ok(());
            }
            let Some(grad) = param.gradient().cloned() else {
                return Ok(());
            };
            if !moments.contains_key(param.name()) {
                let (rows, cols) = grad.shape();
                moments.insert(
                    param.name().to_string(),
                    Moments {
                        first: Tensor::zeros(rows, cols)?,
                        second: Tensor::zeros(rows, cols)?,
                    },
                );
            }
            let Some(state) = moments.get_mut(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            if state.first.shape() != grad.shape() {
                return Err(TensorError::ShapeMismatch {
                    left: state.first.shape(),
                    right: grad.shape(),
                });
            }
            let first = state.first.data_mut();
            let second = state.second.data_mut();
            let values = param.value_mut().data_mut();
            for (idx, g) in grad.data().iter().enumerate() {
                first[idx] = beta1 * first[idx] + (1.0 - beta1) * g;
                second[idx] = beta2 * second[idx] + (1.0 - beta2) * g * g;
                values[idx] -= lr_t * first[idx] / (second[idx].sqrt() + epsilon);
            }
            updated += 1;
            Ok(())
        })?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::linear::Linear;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut layer = Linear::with_seed("fc", 1, 1, Some(3)).unwrap();
        let before = layer.weight().value().data()[0];
        let input = Tensor::from_vec(1, 1, vec![2.0]).unwrap();
        let grad = Tensor::from_vec(1, 1, vec![0.5]).unwrap();
        layer.backward(&input, &grad).unwrap();
        let mut adam = Adam::new(0.1).unwrap();
        let updated = adam.step(&mut layer, &|_| true).unwrap();
        assert_eq!(updated, 2);
        let after = layer.weight().value().data()[0];
        assert!(((before - after) - 0.1).abs() < 1e-4);
        assert_eq!(adam.iterations(), 1);
    }

    #[test]
    fn filter_excludes_parameters() {
        let mut layer = Linear::with_seed("fc", 2, 1, Some(4)).unwrap();
        let input = Tensor::from_vec(1, 2, vec![1.0, 1.0]).unwrap();
        layer
            .backward(&input, &Tensor::from_vec(1, 1, vec![1.0]).unwrap())
            .unwrap();
        let weight_before = layer.weight().value().clone();
        let mut adam = Adam::new(0.01).unwrap();
        let updated = adam.step(&mut layer, &|name| name.ends_with("bias")).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(layer.weight().value(), &weight_before);
        assert!(layer.bias().value().data()[0] < 0.0);
    }

    #[test]
    fn rejects_non_positive_learning_rate() {
        assert!(Adam::new(0.0).is_err());
        let mut adam = Adam::new(1e-3).unwrap();
        assert!(adam.set_learning_rate(-1.0).is_err());
        adam.set_learning_rate(5e-4).unwrap();
        assert_eq!(adam.learning_rate(), 5e-4);
    }
}
