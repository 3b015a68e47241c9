// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-phase optimisation state.

use crate::batching::Batch;
use anemo_nn::{Adam, BinaryCrossEntropy, Loss, Module, PureResult};
use anemo_vision::{BackboneHandle, ClassifierModel};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Warmup,
    FineTune,
}

impl Phase {
    pub fn number(self) -> usize {
        match self {
            Self::Warmup => 1,
            Self::FineTune => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warmup => f.write_str("phase 1 (warm-up)"),
            Self::FineTune => f.write_str("phase 2 (fine-tune)"),
        }
    }
}

/// Which parameters an optimizer may update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainableScope {
    HeadOnly,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseConfig {
    pub phase: Phase,
    pub learning_rate: f32,
    pub max_epochs: usize,
    pub scope: TrainableScope,
}

impl PhaseConfig {
    /// Head-only training with the backbone frozen.
    pub fn warmup(learning_rate: f32, max_epochs: usize) -> Self {
        Self {
            phase: Phase::Warmup,
            learning_rate,
            max_epochs,
            scope: TrainableScope::HeadOnly,
        }
    }

    /// Whole-network training, typically at a much lower rate.
    pub fn fine_tune(learning_rate: f32, max_epochs: usize) -> Self {
        Self {
            phase: Phase::FineTune,
            learning_rate,
            max_epochs,
            scope: TrainableScope::Full,
        }
    }
}

/// Outcome of one optimisation step.
#[derive(Debug, Clone)]
pub struct BatchStep {
    pub loss: f32,
    pub predictions: Vec<f32>,
    /// False when the loss was not finite and no update was made.
    pub applied: bool,
}

/// A fresh optimizer bound to one phase's trainable scope, together with the
/// (optionally class-weighted) loss.
#[derive(Debug)]
pub struct CompiledModel {
    config: PhaseConfig,
    optimizer: Adam,
    loss: BinaryCrossEntropy,
    backbone_prefix: String,
}

/// Prepares a model for a training phase. The optimizer state starts empty.
pub fn compile(handle: &BackboneHandle, config: &PhaseConfig) -> PureResult<CompiledModel> {
    Ok(CompiledModel {
        config: *config,
        optimizer: Adam::new(config.learning_rate)?,
        loss: BinaryCrossEntropy::new(),
        backbone_prefix: handle.parameter_prefix().to_string(),
    })
}

impl CompiledModel {
    pub fn with_class_weights(mut self, weights: [f32; 2]) -> Self {
        self.loss = self.loss.with_class_weights(weights);
        self
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) -> PureResult<()> {
        self.optimizer.set_learning_rate(learning_rate)
    }

    /// Whether the named parameter is updated in this phase.
    pub fn trains(&self, parameter: &str) -> bool {
        scope_allows(self.config.scope, &self.backbone_prefix, parameter)
    }

    /// Forward, loss, backward and one optimizer update in training mode.
    ///
    /// A non-finite loss is reported without touching any weight.
    pub fn train_batch(
        &mut self,
        model: &mut ClassifierModel,
        batch: &Batch,
    ) -> PureResult<BatchStep> {
        model.set_training(true);
        let trace = model.trace(&batch.inputs)?;
        let loss = self.loss.forward(trace.output(), &batch.labels)?.data()[0];
        let predictions = trace.output().data().to_vec();
        if !loss.is_finite() {
            return Ok(BatchStep {
                loss,
                predictions,
                applied: false,
            });
        }
        let grad = self.loss.backward(trace.output(), &batch.labels)?;
        let through_backbone = self.config.scope == TrainableScope::Full;
        model.backward_with_trace(&trace, &grad, through_backbone)?;
        let scope = self.config.scope;
        let prefix = self.backbone_prefix.as_str();
        self.optimizer
            .step(model, &|name| scope_allows(scope, prefix, name))?;
        model.zero_accumulators()?;
        Ok(BatchStep {
            loss,
            predictions,
            applied: true,
        })
    }
}

fn scope_allows(scope: TrainableScope, backbone_prefix: &str, parameter: &str) -> bool {
    match scope {
        TrainableScope::Full => true,
        TrainableScope::HeadOnly => !parameter.starts_with(backbone_prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anemo_nn::{Parameter, Tensor};
    use anemo_vision::{create_model, BackboneConfig, ModelConfig};
    use std::collections::HashMap;

    fn model() -> (ClassifierModel, BackboneHandle) {
        create_model(&ModelConfig {
            backbone: BackboneConfig::compact((8, 8)),
            ..ModelConfig::default()
        })
        .unwrap()
    }

    fn snapshot(model: &ClassifierModel) -> HashMap<String, Vec<f32>> {
        let mut values = HashMap::new();
        model
            .visit_parameters(&mut |param: &Parameter| {
                values.insert(param.name().to_string(), param.value().data().to_vec());
                Ok(())
            })
            .unwrap();
        values
    }

    fn batch(label: f32) -> Batch {
        let inputs =
            Tensor::from_fn(4, 3 * 64, |r, c| ((r * 5 + c) % 9) as f32 / 9.0 - 0.4).unwrap();
        Batch {
            inputs,
            labels: Tensor::from_vec(4, 1, vec![0.0, 1.0, label, 1.0]).unwrap(),
            skipped: 0,
        }
    }

    #[test]
    fn warmup_updates_only_the_head() {
        let (mut model, handle) = model();
        let before = snapshot(&model);
        let mut compiled = compile(&handle, &PhaseConfig::warmup(1e-3, 1)).unwrap();
        let step = compiled.train_batch(&mut model, &batch(0.0)).unwrap();
        assert!(step.applied && step.loss.is_finite());
        assert_eq!(step.predictions.len(), 4);
        for (name, values) in snapshot(&model) {
            let changed = values != before[&name];
            if handle.owns(&name) {
                assert!(!changed, "{name} moved during warm-up");
            } else if name.contains("dense") || name.ends_with("output::weight") {
                assert!(changed, "{name} did not move");
            }
        }
    }

    #[test]
    fn fine_tune_reaches_the_backbone() {
        let (mut model, handle) = model();
        let before = snapshot(&model);
        let mut compiled = compile(&handle, &PhaseConfig::fine_tune(1e-3, 1)).unwrap();
        assert!(compiled.trains("backbone.stem_conv::weight"));
        compiled.train_batch(&mut model, &batch(0.0)).unwrap();
        let after = snapshot(&model);
        assert_ne!(after["backbone.stem_conv::weight"], before["backbone.stem_conv::weight"]);
    }

    #[test]
    fn non_finite_loss_skips_the_update() {
        let (mut model, handle) = model();
        let before = snapshot(&model);
        let mut compiled = compile(&handle, &PhaseConfig::warmup(1e-3, 1))
            .unwrap()
            .with_class_weights([0.5, 2.0]);
        let step = compiled.train_batch(&mut model, &batch(f32::NAN)).unwrap();
        assert!(!step.applied);
        assert!(step.loss.is_nan());
        assert_eq!(snapshot(&model), before);
    }
}
