// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn elementwise_grad(
    input: &Tensor,
    grad_output: &Tensor,
    derivative: impl Fn(f32) -> f32,
) -> PureResult<Tensor> {
    if input.shape() != grad_output.shape() {
        return Err(TensorError::ShapeMismatch {
            left: input.shape(),
            right: grad_output.shape(),
        });
    }
    let data = input
        .data()
        .iter()
        .zip(grad_output.data())
        .map(|(&x, &g)| derivative(x) * g)
        .collect();
    let (rows, cols) = input.shape();
    Tensor::from_vec(rows, cols, data)
}

/// `x * sigmoid(x)`, the activation used throughout the EfficientNet family.
#[derive(Debug, Default, Clone, Copy)]
pub struct Swish;

impl Swish {
    pub fn new() -> Self {
        Self
    }
}

impl Module for Swish {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        input.map(|x| x * sigmoid(x))
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.input_gradient(input, grad_output)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        elementwise_grad(input, grad_output, |x| {
            let s = sigmoid(x);
            s * (1.0 + x * (1.0 - s))
        })
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

/// Logistic output squashing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn new() -> Self {
        Self
    }
}

impl Module for Sigmoid {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        input.map(sigmoid)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.input_gradient(input, grad_output)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        elementwise_grad(input, grad_output, |x| {
            let s = sigmoid(x);
            s * (1.0 - s)
        })
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        let input = Tensor::from_vec(1, 3, vec![-100.0, 0.0, 100.0]).unwrap();
        let out = Sigmoid::new().forward(&input).unwrap();
        assert!(out.data()[0] >= 0.0 && out.data()[0] < 1e-30);
        assert_eq!(out.data()[1], 0.5);
        assert_eq!(out.data()[2], 1.0);
    }

    #[test]
    fn swish_gradient_matches_finite_difference() {
        let swish = Swish::new();
        let eps = 1e-3;
        for x in [-3.0f32, -0.5, 0.0, 0.7, 2.5] {
            let input = Tensor::from_vec(1, 1, vec![x]).unwrap();
            let grad = swish
                .input_gradient(&input, &Tensor::from_vec(1, 1, vec![1.0]).unwrap())
                .unwrap();
            let f = |v: f32| v * sigmoid(v);
            let numeric = (f(x + eps) - f(x - eps)) / (2.0 * eps);
            assert!((numeric - grad.data()[0]).abs() < 1e-3);
        }
    }
}
