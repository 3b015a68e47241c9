// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Two-phase transfer learning.
//!
//! Phase 1 trains the head on a frozen backbone; phase 2 unfreezes the
//! backbone at a low learning rate. Each phase owns its early-stopping and
//! plateau schedules, while the validation-AUC checkpoint spans both phases.
//! The best checkpoint is restored after each phase, so the returned model is
//! the best one observed overall.

use crate::batching::{prepare_batch, shuffled_order};
use crate::checkpoint::{checkpoint_path, save_checkpoint};
use crate::dataset::{class_weights, Partition, VariantDataset};
use crate::error::{TrainError, TrainResult};
use crate::phase::{compile, Phase, PhaseConfig};
use anemo_config::{CallbackSettings, Seeds, TrainingConfig};
use anemo_nn::{
    binary_accuracy, roc_auc, BinaryCrossEntropy, EarlyStopping, Loss, MeanTracker, Module,
    ModelCheckpoint, MonitorMode, ReduceLrOnPlateau, StateDict, TerminateOnNan,
};
use anemo_vision::{
    create_model, AugmentConfig, BackboneConfig, BackboneHandle, ClassifierModel, ModelConfig,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Knobs shared by every phase of a run.
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub batch_size: usize,
    /// `None` disables augmentation of the training partition.
    pub augment: Option<AugmentConfig>,
    pub callbacks: CallbackSettings,
    pub warmup: PhaseConfig,
    pub fine_tune: PhaseConfig,
    pub checkpoint_dir: PathBuf,
    pub seeds: Seeds,
}

impl TrainerSettings {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            augment: config.augment.then(AugmentConfig::default),
            callbacks: config.callbacks.clone(),
            warmup: PhaseConfig::warmup(config.warmup.learning_rate, config.warmup.epochs),
            fine_tune: PhaseConfig::fine_tune(
                config.fine_tune.learning_rate,
                config.fine_tune.epochs,
            ),
            checkpoint_dir: config.checkpoint_dir.clone(),
            seeds: Seeds::new(config.seed),
        }
    }
}

/// Model description for one variant, seeded from the run's base seed.
pub fn model_config_for(config: &TrainingConfig, variant: &str) -> ModelConfig {
    let seeds = Seeds::new(config.seed);
    ModelConfig {
        backbone: BackboneConfig {
            input_hw: config.image_size,
            seed: Some(seeds.seed_for("backbone")),
            weights: config.pretrained_backbone.clone(),
            ..BackboneConfig::default()
        },
        head_seed: Some(seeds.seed_for((variant, "head"))),
        tap_layer: config.tap_layer.clone(),
        ..ModelConfig::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub auc: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub val_auc: f32,
    pub learning_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    EarlyStopped { epoch: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub epochs: Vec<EpochMetrics>,
    pub stop: StopReason,
}

impl PhaseReport {
    pub fn best_val_accuracy(&self) -> Option<f32> {
        self.epochs
            .iter()
            .map(|metrics| metrics.val_accuracy)
            .filter(|value| value.is_finite())
            .reduce(f32::max)
    }
}

/// Validation-set summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
    pub auc: f32,
}

/// State that outlives a single phase: the AUC checkpoint and the weights it
/// refers to.
#[derive(Debug)]
pub struct TrainingSession {
    class_weights: [f32; 2],
    checkpoint: ModelCheckpoint,
    best_state: Option<StateDict>,
    checkpoint_path: PathBuf,
}

impl TrainingSession {
    pub fn new(class_weights: [f32; 2], checkpoint_path: PathBuf) -> Self {
        Self {
            class_weights,
            checkpoint: ModelCheckpoint::new(MonitorMode::Max),
            best_state: None,
            checkpoint_path,
        }
    }

    pub fn class_weights(&self) -> [f32; 2] {
        self.class_weights
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Best validation AUC recorded so far.
    pub fn best_auc(&self) -> Option<f32> {
        self.checkpoint.best()
    }

    /// Loads the checkpointed weights into `model`. Returns whether anything
    /// was restored.
    pub fn restore_best(&self, model: &mut ClassifierModel) -> TrainResult<bool> {
        match &self.best_state {
            Some(state) => {
                model.load_state_dict(state)?;
                info!(auc = ?self.best_auc(), "restored best checkpoint");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn record(&mut self, model: &ClassifierModel, epoch: usize, val_auc: f32) -> TrainResult<()> {
        if !self.checkpoint.on_epoch_end(epoch, val_auc) {
            return Ok(());
        }
        let state = model.state_dict()?;
        save_checkpoint(&state, model.config(), &self.checkpoint_path)?;
        info!(epoch, val_auc, "validation AUC improved");
        self.best_state = Some(state);
        Ok(())
    }
}

/// A finished two-phase run.
#[derive(Debug)]
pub struct TrainedModel {
    pub model: ClassifierModel,
    pub handle: BackboneHandle,
    pub phases: Vec<PhaseReport>,
    pub best_auc: Option<f32>,
    pub checkpoint: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Trainer {
    settings: TrainerSettings,
}

impl Trainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Runs warm-up then fine-tuning for one variant.
    pub fn train_variant(
        &self,
        data: &VariantDataset,
        model_config: &ModelConfig,
    ) -> TrainResult<TrainedModel> {
        let (mut model, handle) = create_model(model_config)?;
        let weights = class_weights(&data.train.labels())?;
        info!(variant = %data.variant, ?weights, classes = ?data.class_names, "class weights");
        let path = checkpoint_path(
            &self.settings.checkpoint_dir,
            &data.variant,
            &model_config.backbone.name,
        );
        let mut session = TrainingSession::new(weights, path);

        let mut phases = Vec::with_capacity(2);
        for phase in [self.settings.warmup, self.settings.fine_tune] {
            let report = self.run_phase(&mut model, &handle, data, &phase, &mut session)?;
            session.restore_best(&mut model)?;
            phases.push(report);
        }
        model.set_training(false);
        Ok(TrainedModel {
            model,
            handle,
            phases,
            best_auc: session.best_auc(),
            checkpoint: session.checkpoint_path().to_path_buf(),
        })
    }

    /// Trains one phase with the standard callbacks. Aborts with
    /// [`TrainError::Diverged`] on the first non-finite batch loss, before
    /// that batch updates any weight.
    pub fn run_phase(
        &self,
        model: &mut ClassifierModel,
        handle: &BackboneHandle,
        data: &VariantDataset,
        phase: &PhaseConfig,
        session: &mut TrainingSession,
    ) -> TrainResult<PhaseReport> {
        let settings = &self.settings;
        if data.train.is_empty() || data.validation.is_empty() {
            return Err(TrainError::dataset(
                PathBuf::from(&data.variant),
                "training and validation partitions must both be non-empty",
            ));
        }
        let batch_size = settings.batch_size.max(1);
        let image_hw = model.config().input_hw();
        let preprocessor = *model.preprocessor();
        let callbacks = &settings.callbacks;

        let mut compiled = compile(handle, phase)?.with_class_weights(session.class_weights());
        let mut early_stopping =
            EarlyStopping::new(MonitorMode::Min, callbacks.early_stopping_patience, true);
        early_stopping.on_train_begin();
        let mut plateau = ReduceLrOnPlateau::new(
            MonitorMode::Min,
            callbacks.plateau_factor,
            callbacks.plateau_patience,
            callbacks.min_learning_rate,
        )
        .with_min_delta(callbacks.plateau_min_delta);
        plateau.on_train_begin();
        let nan_guard = TerminateOnNan::new();

        let label = (data.variant.as_str(), phase.phase.number());
        let mut shuffle_rng = settings.seeds.rng_for((label, "shuffle"));
        let mut augment_rng = settings.seeds.rng_for((label, "augment"));

        info!(
            variant = %data.variant,
            phase = %phase.phase,
            epochs = phase.max_epochs,
            learning_rate = phase.learning_rate,
            scope = ?phase.scope,
            "starting phase"
        );

        let mut epochs = Vec::with_capacity(phase.max_epochs);
        let mut stop = StopReason::Completed;
        for epoch in 1..=phase.max_epochs {
            let order = shuffled_order(data.train.len(), &mut shuffle_rng);
            let mut loss = MeanTracker::new();
            let mut scores = Vec::with_capacity(order.len());
            let mut labels = Vec::with_capacity(order.len());
            for (batch_idx, chunk) in order.chunks(batch_size).enumerate() {
                let params = settings.augment.as_ref().map(|config| {
                    chunk
                        .iter()
                        .map(|_| config.sample(&mut augment_rng))
                        .collect::<Vec<_>>()
                });
                let Some(batch) =
                    prepare_batch(&data.train, chunk, image_hw, &preprocessor, params.as_deref())?
                else {
                    warn!(epoch, batch = batch_idx + 1, "batch had no readable samples");
                    continue;
                };
                let step = compiled.train_batch(model, &batch)?;
                if nan_guard.should_terminate(step.loss) {
                    error!(
                        variant = %data.variant,
                        phase = %phase.phase,
                        epoch,
                        batch = batch_idx + 1,
                        loss = step.loss,
                        "non-finite loss, aborting"
                    );
                    return Err(TrainError::Diverged {
                        phase: phase.phase,
                        epoch,
                        batch: batch_idx + 1,
                        loss: step.loss,
                    });
                }
                loss.update(step.loss, batch.len());
                scores.extend_from_slice(&step.predictions);
                labels.extend_from_slice(batch.labels.data());
            }

            let validation = self.evaluate(model, &data.validation)?;
            let metrics = EpochMetrics {
                epoch,
                loss: loss.mean(),
                accuracy: binary_accuracy(&scores, &labels),
                auc: roc_auc(&scores, &labels),
                val_loss: validation.loss,
                val_accuracy: validation.accuracy,
                val_auc: validation.auc,
                learning_rate: compiled.learning_rate(),
            };
            info!(
                phase = %phase.phase,
                epoch,
                loss = metrics.loss,
                accuracy = metrics.accuracy,
                auc = metrics.auc,
                val_loss = metrics.val_loss,
                val_accuracy = metrics.val_accuracy,
                val_auc = metrics.val_auc,
                learning_rate = metrics.learning_rate,
                "epoch finished"
            );
            epochs.push(metrics);

            session.record(model, epoch, validation.auc)?;
            let model_ref: &ClassifierModel = model;
            let should_stop =
                early_stopping.on_epoch_end(epoch, validation.loss, || model_ref.state_dict())?;
            if let Some(reduced) = plateau.on_epoch_end(validation.loss, compiled.learning_rate()) {
                info!(epoch, learning_rate = reduced, "reducing learning rate");
                compiled.set_learning_rate(reduced)?;
            }
            if should_stop {
                if let Some(best) = early_stopping.best_state() {
                    model.load_state_dict(best)?;
                }
                info!(
                    epoch,
                    best_epoch = ?early_stopping.best_epoch(),
                    "early stopping"
                );
                stop = StopReason::EarlyStopped { epoch };
                break;
            }
        }
        Ok(PhaseReport {
            phase: phase.phase,
            epochs,
            stop,
        })
    }

    /// Unweighted loss, accuracy and AUC in evaluation mode, without
    /// augmentation.
    pub fn evaluate(
        &self,
        model: &ClassifierModel,
        partition: &Partition,
    ) -> TrainResult<Evaluation> {
        model.set_training(false);
        let image_hw = model.config().input_hw();
        let preprocessor = *model.preprocessor();
        let mut loss_fn = BinaryCrossEntropy::new();
        let mut loss = MeanTracker::new();
        let mut scores = Vec::with_capacity(partition.len());
        let mut labels = Vec::with_capacity(partition.len());
        let order: Vec<usize> = (0..partition.len()).collect();
        for chunk in order.chunks(self.settings.batch_size.max(1)) {
            let Some(batch) = prepare_batch(partition, chunk, image_hw, &preprocessor, None)? else {
                continue;
            };
            let output = model.forward(&batch.inputs)?;
            let value = loss_fn.forward(&output, &batch.labels)?.data()[0];
            loss.update(value, batch.len());
            scores.extend_from_slice(output.data());
            labels.extend_from_slice(batch.labels.data());
        }
        Ok(Evaluation {
            loss: loss.mean(),
            accuracy: binary_accuracy(&scores, &labels),
            auc: roc_auc(&scores, &labels),
        })
    }
}
