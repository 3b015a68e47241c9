// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Backbone + shallow head binary classifier.

use super::backbone::{validate, Backbone, BackboneConfig, BACKBONE_PREFIX};
use crate::error::{VisionError, VisionResult};
use crate::preprocess::Preprocessor;
use anemo_nn::{
    BatchNorm, Buffer, Dropout, GlobalAvgPool2d, Linear, Module, Parameter, PureResult,
    Sequential, Sigmoid, Swish, Tensor, Trace,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Namespace of the head parameters.
pub const HEAD_PREFIX: &str = "head.";

/// Layer whose activation Grad-CAM reads by default.
pub const DEFAULT_TAP_LAYER: &str = "top_activation";

/// Everything needed to rebuild a model for inference. Serialised next to
/// each checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub backbone: BackboneConfig,
    pub head_seed: Option<u64>,
    pub tap_layer: String,
    pub preprocessor: Preprocessor,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backbone: BackboneConfig::default(),
            head_seed: Some(1),
            tap_layer: DEFAULT_TAP_LAYER.to_string(),
            preprocessor: Preprocessor::default(),
        }
    }
}

impl ModelConfig {
    pub fn input_hw(&self) -> (usize, usize) {
        self.backbone.input_hw
    }
}

/// Identifies the backbone inside a built model so callers can scope
/// optimizers and pick tap layers without touching the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackboneHandle {
    parameter_prefix: String,
    tap_layer: String,
    layer_names: Vec<String>,
}

impl BackboneHandle {
    pub fn parameter_prefix(&self) -> &str {
        &self.parameter_prefix
    }

    pub fn tap_layer(&self) -> &str {
        &self.tap_layer
    }

    pub fn layer_names(&self) -> &[String] {
        &self.layer_names
    }

    /// Whether the named parameter belongs to the backbone.
    pub fn owns(&self, parameter: &str) -> bool {
        parameter.starts_with(&self.parameter_prefix)
    }
}

/// Activations of both halves of a traced forward pass.
#[derive(Debug, Clone)]
pub struct ModelTrace {
    pub(crate) backbone: Trace,
    pub(crate) head: Trace,
}

impl ModelTrace {
    /// Sigmoid output, `(batch, 1)`.
    pub fn output(&self) -> &Tensor {
        self.head.output()
    }
}

#[derive(Debug)]
pub struct ClassifierModel {
    config: ModelConfig,
    backbone: Backbone,
    head: Sequential,
}

fn seed_offset(seed: Option<u64>, offset: u64) -> Option<u64> {
    seed.map(|s| s.wrapping_add(offset))
}

fn build_head(backbone: &Backbone, seed: Option<u64>) -> PureResult<Sequential> {
    let features = backbone.output_shape();
    let mut head = Sequential::new();
    head.push(
        "global_pool",
        GlobalAvgPool2d::new(features.channels, features.hw)?,
    );
    head.push(
        "batch_norm",
        BatchNorm::new_1d(format!("{HEAD_PREFIX}batch_norm"), features.channels)?,
    );
    head.push(
        "dense_1",
        Linear::with_seed(
            format!("{HEAD_PREFIX}dense_1"),
            features.channels,
            512,
            seed_offset(seed, 0),
        )?,
    );
    head.push("swish_1", Swish::new());
    head.push("dropout_1", Dropout::with_seed(0.5, seed_offset(seed, 1))?);
    head.push(
        "dense_2",
        Linear::with_seed(format!("{HEAD_PREFIX}dense_2"), 512, 256, seed_offset(seed, 2))?,
    );
    head.push("swish_2", Swish::new());
    head.push("dropout_2", Dropout::with_seed(0.3, seed_offset(seed, 3))?);
    head.push(
        "output",
        Linear::with_seed(format!("{HEAD_PREFIX}output"), 256, 1, seed_offset(seed, 4))?,
    );
    head.push("sigmoid", Sigmoid::new());
    Ok(head)
}

/// Builds the classifier described by `config` and a handle to its backbone.
///
/// Pretrained backbone weights are loaded when `config.backbone.weights` is
/// set; otherwise the backbone keeps its seeded initialisation.
pub fn create_model(config: &ModelConfig) -> VisionResult<(ClassifierModel, BackboneHandle)> {
    let (mut model, handle) = ClassifierModel::build(config)?;
    match &config.backbone.weights {
        Some(path) => {
            model.backbone.load_pretrained(path)?;
            info!(path = %path.display(), "loaded pretrained backbone weights");
        }
        None => warn!(
            seed = ?config.backbone.seed,
            "no pretrained backbone weights configured; using seeded initialisation"
        ),
    }
    Ok((model, handle))
}

impl ClassifierModel {
    /// Assembles the graph with seeded weights only. Callers restoring a full
    /// checkpoint use this to skip the pretrained backbone load.
    pub fn build(config: &ModelConfig) -> VisionResult<(Self, BackboneHandle)> {
        validate(&config.backbone)?;
        let backbone = Backbone::new(&config.backbone)?;
        if backbone.feature_shape(&config.tap_layer).is_none() {
            return Err(VisionError::UnknownLayer {
                name: config.tap_layer.clone(),
            });
        }
        let head = build_head(&backbone, config.head_seed)?;
        let handle = BackboneHandle {
            parameter_prefix: BACKBONE_PREFIX.to_string(),
            tap_layer: config.tap_layer.clone(),
            layer_names: backbone.layer_names().to_vec(),
        };
        let model = Self {
            config: config.clone(),
            backbone,
            head,
        };
        Ok((model, handle))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.config.preprocessor
    }

    pub fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    pub fn head(&self) -> &Sequential {
        &self.head
    }

    /// Forward pass that records every activation.
    pub fn trace(&self, input: &Tensor) -> PureResult<ModelTrace> {
        let backbone = self.backbone.stack().trace(input)?;
        let head = self.head.trace(backbone.output())?;
        Ok(ModelTrace { backbone, head })
    }

    /// Evaluation-mode trace that leaves the training flag and every running
    /// statistic untouched. Safe to call while other holders train.
    pub fn trace_inference(&self, input: &Tensor) -> PureResult<ModelTrace> {
        let backbone = self.backbone.stack().trace_inference(input)?;
        let head = self.head.trace_inference(backbone.output())?;
        Ok(ModelTrace { backbone, head })
    }

    /// Accumulates parameter gradients for a traced pass. The backbone is
    /// skipped unless `through_backbone` is set, which leaves its parameters
    /// without gradients. Returns the gradient at the deepest point reached.
    pub fn backward_with_trace(
        &mut self,
        trace: &ModelTrace,
        grad_output: &Tensor,
        through_backbone: bool,
    ) -> PureResult<Tensor> {
        let grad_features = self.head.backward_with_trace(&trace.head, grad_output)?;
        if !through_backbone {
            return Ok(grad_features);
        }
        self.backbone
            .stack_mut()
            .backward_with_trace(&trace.backbone, &grad_features)
    }
}

impl Module for ClassifierModel {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let features = self.backbone.forward(input)?;
        self.head.forward(&features)
    }

    fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        let features = self.backbone.infer(input)?;
        self.head.infer(&features)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        self.backward_with_trace(&trace, grad_output, true)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        let grad = self
            .head
            .input_gradient_with_trace(&trace.head, grad_output)?;
        self.backbone
            .stack()
            .input_gradient_with_trace(&trace.backbone, &grad)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.backbone.visit_parameters(visitor)?;
        self.head.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.backbone.visit_parameters_mut(visitor)?;
        self.head.visit_parameters_mut(visitor)
    }

    fn visit_buffers(&self, visitor: &mut dyn FnMut(&Buffer) -> PureResult<()>) -> PureResult<()> {
        self.backbone.visit_buffers(visitor)?;
        self.head.visit_buffers(visitor)
    }

    fn set_training(&self, training: bool) {
        self.backbone.set_training(training);
        self.head.set_training(training);
    }
}
