// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor, TensorError};
use std::collections::HashMap;
use std::sync::RwLock;

/// Named collection of tensors describing a module's persistent state.
pub type StateDict = HashMap<String, Tensor>;

/// Trainable parameter with a Euclidean gradient accumulator.
pub struct Parameter {
    name: String,
    value: Tensor,
    gradient: Option<Tensor>,
}

impl core::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (rows, cols) = self.value.shape();
        write!(
            f,
            "Parameter(name={},shape=({},{}),has_grad={})",
            self.name,
            rows,
            cols,
            self.gradient.is_some()
        )
    }
}

impl Parameter {
    /// Creates a new parameter with the provided tensor value.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value,
            gradient: None,
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provides an immutable view into the underlying tensor value.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Provides a mutable view into the underlying tensor value.
    pub fn value_mut(&mut self) -> &mut Tensor {
        &mut self.value
    }

    /// Returns the accumulated gradient, if any backward pass reached this parameter.
    pub fn gradient(&self) -> Option<&Tensor> {
        self.gradient.as_ref()
    }

    fn assert_shape(&self, tensor: &Tensor) -> PureResult<()> {
        if self.value.shape() != tensor.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.value.shape(),
                right: tensor.shape(),
            });
        }
        Ok(())
    }

    /// Accumulates a gradient update into the local buffer.
    pub fn accumulate(&mut self, update: &Tensor) -> PureResult<()> {
        self.assert_shape(update)?;
        match self.gradient.as_mut() {
            Some(existing) => existing.add_scaled(update, 1.0)?,
            None => self.gradient = Some(update.clone()),
        }
        Ok(())
    }

    /// Drops the accumulated gradient.
    pub fn zero_gradient(&mut self) {
        self.gradient = None;
    }

    /// Replaces the parameter value, keeping the original shape.
    pub fn load_value(&mut self, value: &Tensor) -> PureResult<()> {
        self.assert_shape(value)?;
        self.value = value.clone();
        Ok(())
    }
}

/// Non-trainable state (batch-norm running statistics) that must survive a
/// checkpoint round trip. Interior mutability lets `forward(&self)` refresh
/// the statistics while keeping modules shareable across threads.
#[derive(Debug)]
pub struct Buffer {
    name: String,
    value: RwLock<Tensor>,
}

impl Buffer {
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> PureResult<Tensor> {
        self.value
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| TensorError::InvalidValue {
                label: "buffer_lock_poisoned",
            })
    }

    /// Applies `update` to the stored tensor in place.
    pub fn update(&self, update: impl FnOnce(&mut Tensor)) -> PureResult<()> {
        let mut guard = self.value.write().map_err(|_| TensorError::InvalidValue {
            label: "buffer_lock_poisoned",
        })?;
        update(&mut guard);
        Ok(())
    }

    /// Replaces the stored tensor, keeping the original shape.
    pub fn set(&self, value: &Tensor) -> PureResult<()> {
        let mut guard = self.value.write().map_err(|_| TensorError::InvalidValue {
            label: "buffer_lock_poisoned",
        })?;
        if guard.shape() != value.shape() {
            return Err(TensorError::ShapeMismatch {
                left: guard.shape(),
                right: value.shape(),
            });
        }
        *guard = value.clone();
        Ok(())
    }
}

/// Base trait implemented by every layer.
///
/// Activations are `(batch, features)` tensors. Loss gradients already carry
/// the batch averaging, so layers accumulate plain sums into their parameters.
pub trait Module: Send + Sync {
    /// Runs a forward pass.
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;

    /// Forward pass with evaluation semantics whatever the training flag
    /// says. Running statistics and dropout state are left alone.
    fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        self.forward(input)
    }

    /// Propagates a gradient backwards. Implementations populate the relevant
    /// parameter accumulators before returning the gradient with respect to
    /// `input`. Must follow the `forward` call that produced the activations.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor>;

    /// Gradient with respect to `input` under evaluation-mode semantics. No
    /// accumulator is touched, which keeps explanation passes read-only.
    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor>;

    /// Visits immutable parameters.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits mutable parameters.
    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits non-trainable buffers.
    fn visit_buffers(&self, _visitor: &mut dyn FnMut(&Buffer) -> PureResult<()>) -> PureResult<()> {
        Ok(())
    }

    /// Switches stochastic and batch-statistics layers between training and
    /// evaluation behaviour.
    fn set_training(&self, _training: bool) {}

    /// Clears accumulators across every parameter.
    fn zero_accumulators(&mut self) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            param.zero_gradient();
            Ok(())
        })
    }

    /// Total number of scalar parameters.
    fn parameter_count(&self) -> PureResult<usize> {
        let mut count = 0usize;
        self.visit_parameters(&mut |param| {
            count += param.value().len();
            Ok(())
        })?;
        Ok(count)
    }

    /// Captures a copy of every parameter and buffer keyed by its canonical name.
    fn state_dict(&self) -> PureResult<StateDict> {
        let mut state = HashMap::new();
        self.visit_parameters(&mut |param| {
            state.insert(param.name().to_string(), param.value().clone());
            Ok(())
        })?;
        self.visit_buffers(&mut |buffer| {
            state.insert(buffer.name().to_string(), buffer.get()?);
            Ok(())
        })?;
        Ok(state)
    }

    /// Restores parameters and buffers from a state dictionary produced by
    /// [`Module::state_dict`].
    fn load_state_dict(&mut self, state: &StateDict) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            let Some(value) = state.get(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            param.load_value(value)
        })?;
        self.visit_buffers(&mut |buffer| {
            let Some(value) = state.get(buffer.name()) else {
                return Err(TensorError::MissingParameter {
                    name: buffer.name().to_string(),
                });
            };
            buffer.set(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_accumulates_and_clears() {
        let mut param = Parameter::new("w", Tensor::zeros(1, 2).unwrap());
        let update = Tensor::from_vec(1, 2, vec![0.5, -1.0]).unwrap();
        param.accumulate(&update).unwrap();
        param.accumulate(&update).unwrap();
        assert_eq!(param.gradient().unwrap().data(), &[1.0, -2.0]);
        param.zero_gradient();
        assert!(param.gradient().is_none());
        assert!(param.accumulate(&Tensor::zeros(2, 2).unwrap()).is_err());
    }

    #[test]
    fn buffer_rejects_shape_changes() {
        let buffer = Buffer::new("running_mean", Tensor::zeros(1, 3).unwrap());
        assert!(buffer.set(&Tensor::zeros(1, 4).unwrap()).is_err());
        buffer
            .update(|tensor| tensor.data_mut()[0] = 2.0)
            .unwrap();
        assert_eq!(buffer.get().unwrap().data(), &[2.0, 0.0, 0.0]);
    }
}
