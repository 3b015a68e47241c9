// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use anemo_nn::io::{load_state_dict, SnapshotFormat};
use anemo_nn::{BatchNorm, Conv2d, Module, PureResult, Sequential, Swish, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Namespace shared by every backbone parameter and buffer.
pub const BACKBONE_PREFIX: &str = "backbone.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub channels: usize,
    pub stride: usize,
}

impl StageConfig {
    pub const fn new(channels: usize, stride: usize) -> Self {
        Self { channels, stride }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Family tag used in checkpoint names.
    pub name: String,
    pub input_hw: (usize, usize),
    pub stem_channels: usize,
    pub stem_stride: usize,
    pub stages: Vec<StageConfig>,
    pub top_channels: usize,
    /// Initialisation seed used when no pretrained weights are configured.
    pub seed: Option<u64>,
    /// State dictionary holding pretrained `backbone.*` tensors.
    pub weights: Option<PathBuf>,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            name: "efficientnet".to_string(),
            input_hw: (224, 224),
            stem_channels: 32,
            stem_stride: 2,
            stages: vec![
                StageConfig::new(16, 2),
                StageConfig::new(24, 2),
                StageConfig::new(40, 2),
                StageConfig::new(80, 2),
                StageConfig::new(112, 1),
            ],
            top_channels: 1280,
            seed: Some(0),
            weights: None,
        }
    }
}

impl BackboneConfig {
    /// Narrow two-stage stack for small inputs.
    pub fn compact(input_hw: (usize, usize)) -> Self {
        Self {
            name: "efficientnet".to_string(),
            input_hw,
            stem_channels: 8,
            stem_stride: 2,
            stages: vec![StageConfig::new(12, 1), StageConfig::new(16, 2)],
            top_channels: 24,
            seed: Some(0),
            weights: None,
        }
    }
}

/// Channel count and spatial size of one layer's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureShape {
    pub channels: usize,
    pub hw: (usize, usize),
}

impl FeatureShape {
    pub fn len(&self) -> usize {
        self.channels * self.hw.0 * self.hw.1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convolutional feature extractor. Every stage is conv, batch norm (always
/// on stored statistics) and swish, each registered under its own name so
/// any activation can be tapped.
#[derive(Debug)]
pub struct Backbone {
    stack: Sequential,
    shapes: Vec<FeatureShape>,
}

fn seed_offset(seed: Option<u64>, offset: u64) -> Option<u64> {
    seed.map(|s| s.wrapping_add(offset))
}

impl Backbone {
    pub fn new(config: &BackboneConfig) -> PureResult<Self> {
        let mut backbone = Self {
            stack: Sequential::new(),
            shapes: Vec::new(),
        };
        let input = FeatureShape {
            channels: 3,
            hw: config.input_hw,
        };
        let mut shape = backbone.push_stage(
            "stem",
            input,
            config.stem_channels,
            (3, 3),
            config.stem_stride,
            seed_offset(config.seed, 0),
        )?;
        for (idx, stage) in config.stages.iter().enumerate() {
            shape = backbone.push_stage(
                &format!("block{}", idx + 1),
                shape,
                stage.channels,
                (3, 3),
                stage.stride,
                seed_offset(config.seed, idx as u64 + 1),
            )?;
        }
        backbone.push_stage(
            "top",
            shape,
            config.top_channels,
            (1, 1),
            1,
            seed_offset(config.seed, config.stages.len() as u64 + 1),
        )?;
        Ok(backbone)
    }

    fn push_stage(
        &mut self,
        stage: &str,
        input: FeatureShape,
        channels: usize,
        kernel: (usize, usize),
        stride: usize,
        seed: Option<u64>,
    ) -> PureResult<FeatureShape> {
        let padding = (kernel.0 / 2, kernel.1 / 2);
        let conv_name = format!("{stage}_conv");
        let conv = Conv2d::new(
            format!("{BACKBONE_PREFIX}{conv_name}"),
            input.channels,
            channels,
            kernel,
            (stride, stride),
            padding,
            input.hw,
            seed,
        )?;
        let output = FeatureShape {
            channels,
            hw: conv.output_hw()?,
        };
        let bn_name = format!("{stage}_bn");
        let bn = BatchNorm::new_2d(format!("{BACKBONE_PREFIX}{bn_name}"), channels, output.hw)?
            .with_stored_statistics();
        self.stack.push(conv_name, conv);
        self.stack.push(bn_name, bn);
        self.stack.push(format!("{stage}_activation"), Swish::new());
        self.shapes.extend([output; 3]);
        Ok(output)
    }

    pub fn stack(&self) -> &Sequential {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Sequential {
        &mut self.stack
    }

    pub fn layer_names(&self) -> &[String] {
        self.stack.names()
    }

    /// Output shape of the layer registered under `name`.
    pub fn feature_shape(&self, name: &str) -> Option<FeatureShape> {
        self.stack.position(name).map(|idx| self.shapes[idx])
    }

    /// Shape of the final activation fed to the head.
    pub fn output_shape(&self) -> FeatureShape {
        // The stack always ends with the top stage.
        self.shapes[self.shapes.len() - 1]
    }

    /// Loads `backbone.*` tensors from a snapshot. The format follows the
    /// file extension.
    pub fn load_pretrained(&mut self, path: &std::path::Path) -> PureResult<()> {
        let state = load_state_dict(path, SnapshotFormat::from_path(path))?;
        self.stack.load_state_dict(&state)
    }
}

impl Module for Backbone {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.stack.forward(input)
    }

    fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        self.stack.infer(input)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.stack.backward(input, grad_output)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.stack.input_gradient(input, grad_output)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&anemo_nn::Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stack.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut anemo_nn::Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stack.visit_parameters_mut(visitor)
    }

    fn visit_buffers(
        &self,
        visitor: &mut dyn FnMut(&anemo_nn::Buffer) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stack.visit_buffers(visitor)
    }

    fn set_training(&self, training: bool) {
        self.stack.set_training(training);
    }
}

/// Rejects configurations that cannot produce a feature map.
pub(crate) fn validate(config: &BackboneConfig) -> PureResult<()> {
    if config.input_hw.0 == 0 || config.input_hw.1 == 0 {
        return Err(TensorError::InvalidDimensions {
            rows: config.input_hw.0,
            cols: config.input_hw.1,
        });
    }
    if config.stem_stride == 0 || config.stages.iter().any(|stage| stage.stride == 0) {
        return Err(TensorError::InvalidValue {
            label: "backbone_stride",
        });
    }
    Ok(())
}
