// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Training pipeline for the anemia screening classifiers: folder datasets,
//! parallel batch preparation, two-phase transfer learning with Keras-style
//! callbacks, checkpoints and Grad-CAM reports.

pub mod batching;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod runner;
pub mod selection;
pub mod visualize;

pub use batching::{prepare_batch, shuffled_order, Batch};
pub use checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint, sidecar_path};
pub use dataset::{
    class_weights, list_images, scan_variant, Partition, PartitionKind, Sample, SampleSource,
    VariantDataset,
};
pub use error::{TrainError, TrainResult};
pub use orchestrator::{
    model_config_for, EpochMetrics, Evaluation, PhaseReport, StopReason, TrainedModel, Trainer,
    TrainerSettings, TrainingSession,
};
pub use phase::{compile, BatchStep, CompiledModel, Phase, PhaseConfig, TrainableScope};
pub use runner::{run_variants, VariantOutcome, VariantSummary};
pub use selection::{FixedSelector, SampleSelector, SeededSelector};
pub use visualize::{result_title, visualize_variant, VisualizationOutcome, VisualizationReport};
