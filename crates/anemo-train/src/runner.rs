// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Trains every configured variant in turn. A variant that is missing or
//! diverges is reported and the run moves on to the next one.

use crate::dataset::scan_variant;
use crate::error::TrainError;
use crate::orchestrator::{model_config_for, PhaseReport, Trainer, TrainerSettings};
use crate::selection::SampleSelector;
use crate::visualize::{visualize_variant, VisualizationOutcome};
use anemo_config::TrainingConfig;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum VariantOutcome {
    Skipped {
        variant: String,
        reason: String,
    },
    Diverged {
        variant: String,
        error: TrainError,
    },
    Failed {
        variant: String,
        error: TrainError,
    },
    Completed(VariantSummary),
}

impl VariantOutcome {
    pub fn variant(&self) -> &str {
        match self {
            Self::Skipped { variant, .. }
            | Self::Diverged { variant, .. }
            | Self::Failed { variant, .. } => variant,
            Self::Completed(summary) => &summary.variant,
        }
    }
}

#[derive(Debug)]
pub struct VariantSummary {
    pub variant: String,
    pub checkpoint: PathBuf,
    pub best_auc: Option<f32>,
    pub phases: Vec<PhaseReport>,
    pub visualization: VisualizationOutcome,
}

/// Runs the full pipeline for each variant in `config.variants`.
pub fn run_variants(
    config: &TrainingConfig,
    selector: &mut dyn SampleSelector,
) -> Vec<VariantOutcome> {
    let trainer = Trainer::new(TrainerSettings::from_config(config));
    let mut outcomes = Vec::with_capacity(config.variants.len());
    for variant in &config.variants {
        info!(variant = %variant, "training variant");
        let outcome = run_variant(config, &trainer, variant, selector);
        match &outcome {
            VariantOutcome::Skipped { reason, .. } => {
                warn!(variant = %variant, %reason, "skipped variant")
            }
            VariantOutcome::Diverged { error, .. } => {
                error!(variant = %variant, %error, "variant diverged")
            }
            VariantOutcome::Failed { error, .. } => {
                error!(variant = %variant, %error, "variant failed")
            }
            VariantOutcome::Completed(summary) => {
                info!(
                    variant = %variant,
                    best_auc = ?summary.best_auc,
                    checkpoint = %summary.checkpoint.display(),
                    "variant finished"
                )
            }
        }
        outcomes.push(outcome);
    }
    outcomes
}

fn run_variant(
    config: &TrainingConfig,
    trainer: &Trainer,
    variant: &str,
    selector: &mut dyn SampleSelector,
) -> VariantOutcome {
    let data = match scan_variant(&config.dataset_root, variant, config.validation_split) {
        Ok(data) => data,
        Err(err @ TrainError::MissingVariant { .. }) => {
            return VariantOutcome::Skipped {
                variant: variant.to_string(),
                reason: err.to_string(),
            }
        }
        Err(error) => {
            return VariantOutcome::Failed {
                variant: variant.to_string(),
                error,
            }
        }
    };
    let trained = match trainer.train_variant(&data, &model_config_for(config, variant)) {
        Ok(trained) => trained,
        Err(error @ TrainError::Diverged { .. }) => {
            return VariantOutcome::Diverged {
                variant: variant.to_string(),
                error,
            }
        }
        Err(error) => {
            return VariantOutcome::Failed {
                variant: variant.to_string(),
                error,
            }
        }
    };
    let visualization = match visualize_variant(
        &trained.model,
        variant,
        &data.test_images,
        selector,
        &config.output_dir,
    ) {
        Ok(outcome) => outcome,
        Err(error) => {
            return VariantOutcome::Failed {
                variant: variant.to_string(),
                error,
            }
        }
    };
    VariantOutcome::Completed(VariantSummary {
        variant: variant.to_string(),
        checkpoint: trained.checkpoint,
        best_auc: trained.best_auc,
        phases: trained.phases,
        visualization,
    })
}
