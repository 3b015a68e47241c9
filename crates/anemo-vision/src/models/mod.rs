// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Model factory: an EfficientNet-style convolutional backbone topped by a
//! pooled dense head with a single sigmoid output.
//!
//! Both halves implement [`anemo_nn::Module`], so optimizers, checkpoints and
//! callbacks work on the assembled [`ClassifierModel`] directly.

pub mod backbone;
pub mod classifier;

pub use self::backbone::{Backbone, BackboneConfig, FeatureShape, StageConfig, BACKBONE_PREFIX};
pub use self::classifier::{
    create_model, BackboneHandle, ClassifierModel, ModelConfig, ModelTrace, DEFAULT_TAP_LAYER,
    HEAD_PREFIX,
};
