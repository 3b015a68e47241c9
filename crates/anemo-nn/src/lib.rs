// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod callbacks;
pub mod io;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod module;
pub mod optim;

pub use callbacks::{
    EarlyStopping, ModelCheckpoint, MonitorMode, ReduceLrOnPlateau, TerminateOnNan,
};
pub use io::{
    load_bincode, load_json, load_state_dict, save_bincode, save_json, save_state_dict,
    SnapshotFormat,
};
pub use layers::conv::{Conv2d, GlobalAvgPool2d};
pub use layers::dropout::Dropout;
pub use layers::linear::Linear;
pub use layers::normalization::BatchNorm;
pub use layers::sequential::{Sequential, Trace};
pub use layers::{Sigmoid, Swish};
pub use loss::{BinaryCrossEntropy, Loss};
pub use metrics::{binary_accuracy, roc_auc, MeanTracker};
pub use module::{Buffer, Module, Parameter, StateDict};
pub use optim::Adam;

pub use anemo_tensor::{PureResult, Tensor, TensorError};
