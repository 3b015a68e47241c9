// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use anemo_config::{Seeds, TrainingConfig};
use anemo_nn::{Module, Parameter};
use anemo_train::{
    load_checkpoint, run_variants, scan_variant, FixedSelector, Partition, PartitionKind,
    PhaseConfig, Sample, TrainError, Trainer, TrainerSettings, TrainingSession, VariantDataset,
    VariantOutcome, VisualizationOutcome,
};
use anemo_vision::{create_model, save_image, BackboneConfig, ImageTensor, ModelConfig};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn noisy(level: f32, salt: usize) -> ImageTensor {
    ImageTensor::from_fn(16, 16, |y, x| {
        let jitter = ((y * 31 + x * 17 + salt * 13) % 25) as f32 - 12.0;
        let v = level + jitter;
        [v, v * 0.9, v * 0.8]
    })
    .unwrap()
}

fn write_class(dir: &Path, count: usize, level: f32) {
    fs::create_dir_all(dir).unwrap();
    for idx in 0..count {
        save_image(&noisy(level, idx), dir.join(format!("img_{idx:03}.png"))).unwrap();
    }
}

fn compact_model_config() -> ModelConfig {
    ModelConfig {
        backbone: BackboneConfig::compact((16, 16)),
        ..ModelConfig::default()
    }
}

fn settings(checkpoint_dir: &Path, batch_size: usize, warmup_epochs: usize) -> TrainerSettings {
    let config = TrainingConfig {
        batch_size,
        augment: false,
        checkpoint_dir: checkpoint_dir.to_path_buf(),
        seed: 7,
        ..TrainingConfig::default()
    };
    let mut settings = TrainerSettings::from_config(&config);
    settings.warmup = PhaseConfig::warmup(1e-3, warmup_epochs);
    settings
}

fn parameters(model: &impl Module) -> HashMap<String, Vec<f32>> {
    let mut values = HashMap::new();
    model
        .visit_parameters(&mut |param: &Parameter| {
            values.insert(param.name().to_string(), param.value().data().to_vec());
            Ok(())
        })
        .unwrap();
    values
}

#[test]
fn warmup_separates_dark_from_bright_images() {
    let root = tempfile::tempdir().unwrap();
    let train = root.path().join("skin").join("train");
    write_class(&train.join("anemic"), 50, 55.0);
    write_class(&train.join("healthy"), 50, 190.0);
    let data = scan_variant(root.path(), "skin", 0.2).unwrap();
    assert_eq!((data.train.len(), data.validation.len()), (80, 20));

    let checkpoints = root.path().join("checkpoints");
    let trainer = Trainer::new(settings(&checkpoints, 4, 12));
    let (mut model, handle) = create_model(&compact_model_config()).unwrap();
    let weights = anemo_train::class_weights(&data.train.labels()).unwrap();
    assert_eq!(weights, [1.0, 1.0]);
    let path = checkpoints.join("anemia_skin_compact.bin");
    let mut session = TrainingSession::new(weights, path.clone());

    let warmup = trainer.settings().warmup;
    let report = trainer
        .run_phase(&mut model, &handle, &data, &warmup, &mut session)
        .unwrap();
    assert!(!report.epochs.is_empty());
    let best = report.best_val_accuracy().unwrap();
    assert!(best >= 0.75, "best validation accuracy {best}");
    assert!(session.best_auc().is_some());

    assert!(path.exists());
    let (restored, _) = load_checkpoint(&path).unwrap();
    assert_eq!(restored.config(), model.config());
}

#[test]
fn non_finite_loss_aborts_before_the_update() {
    let labels = [0.0, 1.0, 0.0, 1.0, f32::NAN, 1.0, 0.0, 1.0];
    let train = labels
        .iter()
        .enumerate()
        .map(|(idx, &label)| Sample::in_memory(noisy(40.0 + 20.0 * idx as f32, idx), label))
        .collect();
    let validation = vec![
        Sample::in_memory(noisy(50.0, 1), 0.0),
        Sample::in_memory(noisy(200.0, 2), 1.0),
    ];
    let data = VariantDataset::from_partitions(
        "nails",
        ["anemic".to_string(), "healthy".to_string()],
        Partition::new(PartitionKind::Train, train),
        Partition::new(PartitionKind::Validation, validation),
    );

    let dir = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(settings(dir.path(), 8, 3));
    let (mut model, handle) = create_model(&compact_model_config()).unwrap();
    let before = parameters(&model);
    let mut session = TrainingSession::new([1.0, 1.0], dir.path().join("nails.bin"));
    let warmup = trainer.settings().warmup;
    let err = trainer
        .run_phase(&mut model, &handle, &data, &warmup, &mut session)
        .unwrap_err();
    match err {
        TrainError::Diverged { epoch, batch, loss, .. } => {
            assert_eq!((epoch, batch), (1, 1));
            assert!(loss.is_nan());
        }
        other => panic!("expected divergence, got {other}"),
    }
    assert_eq!(parameters(&model), before);
    assert!(session.best_auc().is_none());
}

#[test]
fn runner_skips_missing_variants_and_writes_artefacts() {
    let root = tempfile::tempdir().unwrap();
    let dataset = root.path().join("dataset");
    let skin = dataset.join("skin");
    write_class(&skin.join("train").join("anemic"), 6, 60.0);
    write_class(&skin.join("train").join("healthy"), 6, 180.0);
    write_class(&skin.join("test").join("mixed"), 2, 120.0);

    let config = TrainingConfig {
        dataset_root: dataset,
        variants: vec!["skin".to_string(), "conjunctiva".to_string()],
        checkpoint_dir: root.path().join("checkpoints"),
        output_dir: root.path().join("outputs"),
        image_size: (16, 16),
        batch_size: 4,
        warmup: anemo_config::PhaseSettings {
            epochs: 1,
            learning_rate: 1e-3,
        },
        fine_tune: anemo_config::PhaseSettings {
            epochs: 1,
            learning_rate: 1e-5,
        },
        ..TrainingConfig::default()
    };
    let outcomes = run_variants(&config, &mut FixedSelector::default());
    assert_eq!(outcomes.len(), 2);

    let VariantOutcome::Completed(summary) = &outcomes[0] else {
        panic!("skin should train, got {:?}", outcomes[0]);
    };
    assert_eq!(summary.phases.len(), 2);
    assert!(summary.checkpoint.exists());
    assert!(summary
        .checkpoint
        .ends_with(format!("anemia_skin_{}.bin", BackboneConfig::default().name)));
    match &summary.visualization {
        VisualizationOutcome::Written(report) => {
            assert!(report.overlay.exists());
            assert!(report.title.starts_with("Result: "));
        }
        other => panic!("expected a Grad-CAM report, got {other:?}"),
    }

    assert!(matches!(outcomes[1], VariantOutcome::Skipped { .. }));
    assert_eq!(outcomes[1].variant(), "conjunctiva");
}

#[test]
fn seeds_drive_identical_phase_reports() {
    let labels: Vec<f32> = (0..8).map(|idx| (idx % 2) as f32).collect();
    let train: Vec<Sample> = labels
        .iter()
        .enumerate()
        .map(|(idx, &label)| Sample::in_memory(noisy(60.0 + 120.0 * label, idx), label))
        .collect();
    let validation = vec![
        Sample::in_memory(noisy(60.0, 9), 0.0),
        Sample::in_memory(noisy(180.0, 10), 1.0),
    ];
    let data = VariantDataset::from_partitions(
        "skin",
        ["a".to_string(), "b".to_string()],
        Partition::new(PartitionKind::Train, train),
        Partition::new(PartitionKind::Validation, validation),
    );

    let run = || {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path(), 4, 2);
        settings.seeds = Seeds::new(21);
        settings.augment = Some(Default::default());
        let trainer = Trainer::new(settings);
        let (mut model, handle) = create_model(&compact_model_config()).unwrap();
        let mut session = TrainingSession::new([1.0, 1.0], dir.path().join("skin.bin"));
        let warmup = trainer.settings().warmup;
        trainer
            .run_phase(&mut model, &handle, &data, &warmup, &mut session)
            .unwrap()
            .epochs
    };
    assert_eq!(run(), run());
}
