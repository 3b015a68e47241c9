// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Buffer, Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Activations recorded by [`Sequential::trace`]. Entry `0` is the input and
/// entry `i + 1` is the output of layer `i`.
#[derive(Debug, Clone)]
pub struct Trace {
    activations: Vec<Tensor>,
}

impl Trace {
    /// Final output of the traced pass.
    pub fn output(&self) -> &Tensor {
        // A trace always holds at least the input.
        &self.activations[self.activations.len() - 1]
    }

    /// Output of the layer at `index`.
    pub fn layer_output(&self, index: usize) -> Option<&Tensor> {
        self.activations.get(index + 1)
    }

    pub fn into_output(mut self) -> Tensor {
        self.activations.swap_remove(self.activations.len() - 1)
    }
}

/// Ordered container of named layers.
#[derive(Default)]
pub struct Sequential {
    names: Vec<String>,
    layers: Vec<Box<dyn Module>>,
}

impl core::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sequential(layers={:?})", self.names)
    }
}

impl Sequential {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Appends a named layer.
    pub fn push<M>(&mut self, name: impl Into<String>, layer: M)
    where
        M: Module + 'static,
    {
        self.push_boxed(name, Box::new(layer));
    }

    /// Appends a pre-boxed module.
    pub fn push_boxed(&mut self, name: impl Into<String>, layer: Box<dyn Module>) {
        self.names.push(name.into());
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of the layer registered under `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Forward pass that keeps every intermediate activation.
    pub fn trace(&self, input: &Tensor) -> PureResult<Trace> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward(&activations[activations.len() - 1])?;
            activations.push(next);
        }
        Ok(Trace { activations })
    }

    /// Like [`Sequential::trace`] but every layer runs [`Module::infer`], so
    /// the pass leaves no state behind.
    pub fn trace_inference(&self, input: &Tensor) -> PureResult<Trace> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for layer in &self.layers {
            let next = layer.infer(&activations[activations.len() - 1])?;
            activations.push(next);
        }
        Ok(Trace { activations })
    }

    /// Backward pass over the activations of an earlier [`Sequential::trace`].
    /// Stochastic layers reuse the masks sampled during that trace.
    pub fn backward_with_trace(
        &mut self,
        trace: &Trace,
        grad_output: &Tensor,
    ) -> PureResult<Tensor> {
        if trace.activations.len() != self.layers.len() + 1 {
            return Err(TensorError::InvalidValue {
                label: "sequential_trace_length",
            });
        }
        let mut grad = grad_output.clone();
        for (idx, layer) in self.layers.iter_mut().enumerate().rev() {
            grad = layer.backward(&trace.activations[idx], &grad)?;
        }
        Ok(grad)
    }

    /// Gradient with respect to the output of layer `tap`, obtained by chaining
    /// evaluation-mode input gradients from the end of the stack. Nothing is
    /// accumulated.
    pub fn gradient_at(
        &self,
        trace: &Trace,
        tap: usize,
        grad_output: &Tensor,
    ) -> PureResult<Tensor> {
        if tap >= self.layers.len() || trace.activations.len() != self.layers.len() + 1 {
            return Err(TensorError::InvalidValue {
                label: "sequential_tap_index",
            });
        }
        let mut grad = grad_output.clone();
        for idx in (tap + 1..self.layers.len()).rev() {
            grad = self.layers[idx].input_gradient(&trace.activations[idx], &grad)?;
        }
        Ok(grad)
    }

    /// Evaluation-mode input gradient over a stored trace. Nothing is
    /// accumulated.
    pub fn input_gradient_with_trace(
        &self,
        trace: &Trace,
        grad_output: &Tensor,
    ) -> PureResult<Tensor> {
        if trace.activations.len() != self.layers.len() + 1 {
            return Err(TensorError::InvalidValue {
                label: "sequential_trace_length",
            });
        }
        let mut grad = grad_output.clone();
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            grad = layer.input_gradient(&trace.activations[idx], &grad)?;
        }
        Ok(grad)
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut activ = input.clone();
        for layer in &self.layers {
            activ = layer.forward(&activ)?;
        }
        Ok(activ)
    }

    fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut activ = input.clone();
        for layer in &self.layers {
            activ = layer.infer(&activ)?;
        }
        Ok(activ)
    }

    /// Re-runs the forward pass to recover intermediate activations. Callers
    /// that already hold a [`Trace`] should use
    /// [`Sequential::backward_with_trace`] instead.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        self.backward_with_trace(&trace, grad_output)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        self.input_gradient_with_trace(&trace, grad_output)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &self.layers {
            layer.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &mut self.layers {
            layer.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }

    fn visit_buffers(&self, visitor: &mut dyn FnMut(&Buffer) -> PureResult<()>) -> PureResult<()> {
        for layer in &self.layers {
            layer.visit_buffers(visitor)?;
        }
        Ok(())
    }

    fn set_training(&self, training: bool) {
        for layer in &self.layers {
            layer.set_training(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::dropout::Dropout;
    use crate::layers::linear::Linear;
    use crate::layers::Swish;

    fn stack() -> Sequential {
        let mut seq = Sequential::new();
        seq.push("fc1", Linear::with_seed("fc1", 2, 3, Some(1)).unwrap());
        seq.push("act", Swish::new());
        seq.push("fc2", Linear::with_seed("fc2", 3, 1, Some(2)).unwrap());
        seq
    }

    #[test]
    fn trace_matches_forward_and_names_resolve() {
        let seq = stack();
        let input = Tensor::from_vec(2, 2, vec![0.5, -0.1, 1.0, 2.0]).unwrap();
        let trace = seq.trace(&input).unwrap();
        assert_eq!(trace.output(), &seq.forward(&input).unwrap());
        assert_eq!(seq.position("act"), Some(1));
        assert_eq!(seq.position("missing"), None);
        assert_eq!(trace.layer_output(0).unwrap().shape(), (2, 3));
    }

    #[test]
    fn backward_with_trace_accumulates_every_parameter() {
        let mut seq = stack();
        let input = Tensor::from_vec(1, 2, vec![0.5, -0.1]).unwrap();
        let trace = seq.trace(&input).unwrap();
        let grad = Tensor::from_vec(1, 1, vec![1.0]).unwrap();
        let grad_input = seq.backward_with_trace(&trace, &grad).unwrap();
        assert_eq!(grad_input, seq.input_gradient(&input, &grad).unwrap());
        let mut with_grad = 0;
        seq.visit_parameters(&mut |param| {
            if param.gradient().is_some() {
                with_grad += 1;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(with_grad, 4);
    }

    #[test]
    fn gradient_at_output_layer_is_the_seed() {
        let seq = stack();
        let input = Tensor::from_vec(1, 2, vec![0.5, -0.1]).unwrap();
        let trace = seq.trace(&input).unwrap();
        let seed = Tensor::from_vec(1, 1, vec![1.0]).unwrap();
        assert_eq!(seq.gradient_at(&trace, 2, &seed).unwrap(), seed);
        assert_eq!(seq.gradient_at(&trace, 0, &seed).unwrap().shape(), (1, 3));
        assert!(seq.gradient_at(&trace, 3, &seed).is_err());
    }

    #[test]
    fn set_training_reaches_nested_dropout() {
        let mut seq = Sequential::new();
        seq.push("drop", Dropout::with_seed(0.5, Some(3)).unwrap());
        seq.set_training(false);
        let input = Tensor::full(1, 8, 1.0).unwrap();
        assert_eq!(seq.forward(&input).unwrap(), input);
    }

    #[test]
    fn trace_inference_ignores_the_training_flag() {
        let mut seq = Sequential::new();
        seq.push("drop", Dropout::with_seed(0.5, Some(3)).unwrap());
        seq.push("fc", Linear::with_seed("fc", 8, 1, Some(4)).unwrap());
        seq.set_training(true);
        let input = Tensor::full(1, 8, 1.0).unwrap();
        let trace = seq.trace_inference(&input).unwrap();
        assert_eq!(trace.layer_output(0).unwrap(), &input);
        assert_eq!(seq.infer(&input).unwrap(), *trace.output());
    }
}
