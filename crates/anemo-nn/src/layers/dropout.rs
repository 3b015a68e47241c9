// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Inverted Bernoulli dropout. Kept activations are scaled by `1 / (1 - p)`
/// so evaluation mode is a plain pass-through.
pub struct Dropout {
    probability: f32,
    keep_scale: f32,
    train: AtomicBool,
    rng: Mutex<StdRng>,
    last_mask: Mutex<Option<Tensor>>,
}

impl core::fmt::Debug for Dropout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability)
            .field("training", &self.is_training())
            .finish()
    }
}

fn poisoned<T>(_: T) -> TensorError {
    TensorError::InvalidValue {
        label: "dropout_lock_poisoned",
    }
}

impl Dropout {
    /// Builds a new dropout layer using entropy from the host.
    pub fn new(probability: f32) -> PureResult<Self> {
        Self::with_seed(probability, None)
    }

    /// Builds a new dropout layer with a deterministic RNG seed.
    pub fn with_seed(probability: f32, seed: Option<u64>) -> PureResult<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(TensorError::InvalidValue {
                label: "dropout_probability",
            });
        }
        let rng = match seed {
            Some(value) => StdRng::seed_from_u64(value),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            probability,
            keep_scale: 1.0 / (1.0 - probability),
            train: AtomicBool::new(true),
            rng: Mutex::new(rng),
            last_mask: Mutex::new(None),
        })
    }

    /// Returns the probability assigned to zeroing activations.
    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Returns whether the layer currently runs in training mode.
    pub fn is_training(&self) -> bool {
        self.train.load(Ordering::Relaxed)
    }

    fn sample_mask(&self, rows: usize, cols: usize) -> PureResult<Tensor> {
        let mut rng = self.rng.lock().map_err(poisoned)?;
        let mut mask = Vec::with_capacity(rows * cols);
        for _ in 0..rows * cols {
            let keep = rng.gen::<f32>() >= self.probability;
            mask.push(if keep { self.keep_scale } else { 0.0 });
        }
        Tensor::from_vec(rows, cols, mask)
    }
}

impl Module for Dropout {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if !self.is_training() || self.probability == 0.0 {
            self.last_mask.lock().map_err(poisoned)?.take();
            return Ok(input.clone());
        }
        let (rows, cols) = input.shape();
        let mask = self.sample_mask(rows, cols)?;
        let output = input.hadamard(&mask)?;
        self.last_mask.lock().map_err(poisoned)?.replace(mask);
        Ok(output)
    }

    fn backward(&mut self, _input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if !self.is_training() || self.probability == 0.0 {
            return Ok(grad_output.clone());
        }
        let mask = self.last_mask.lock().map_err(poisoned)?.take();
        let Some(mask) = mask else {
            return Err(TensorError::InvalidValue {
                label: "dropout_mask",
            });
        };
        grad_output.hadamard(&mask)
    }

    fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        Ok(input.clone())
    }

    fn input_gradient(&self, _input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        Ok(grad_output.clone())
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

    fn set_training(&self, training: bool) {
        self.train.store(training, Ordering::Relaxed);
        if !training {
            if let Ok(mut mask) = self.last_mask.lock() {
                mask.take();
            }
        }
    }
}
