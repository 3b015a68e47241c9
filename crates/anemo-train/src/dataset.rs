// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Folder-per-class datasets.
//!
//! A variant lives under `<root>/<variant>/` with a `train/` directory holding
//! exactly two class folders and an optional `test/` tree. Class folders are
//! sorted by name and labelled `0.0` and `1.0` in that order. Within each
//! class the first `floor(split * n)` files (sorted by name) are held out for
//! validation and the rest are used for training.

use crate::error::{TrainError, TrainResult};
use anemo_vision::{has_image_extension, load_image, ImageTensor, VisionError, VisionResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Train,
    Validation,
    Test,
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        };
        f.write_str(label)
    }
}

/// Where a sample's pixels come from.
#[derive(Debug, Clone)]
pub enum SampleSource {
    /// Decoded on every pass.
    File(PathBuf),
    /// Held decoded in memory.
    Memory(Arc<ImageTensor>),
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub source: SampleSource,
    pub label: f32,
}

impl Sample {
    pub fn from_file(path: impl Into<PathBuf>, label: f32) -> Self {
        Self {
            source: SampleSource::File(path.into()),
            label,
        }
    }

    pub fn in_memory(image: ImageTensor, label: f32) -> Self {
        Self {
            source: SampleSource::Memory(Arc::new(image)),
            label,
        }
    }

    /// Returns the pixels at `target_hw`. Files are resized on decode;
    /// in-memory images must already have the target size.
    pub fn load(&self, target_hw: (usize, usize)) -> VisionResult<ImageTensor> {
        match &self.source {
            SampleSource::File(path) => load_image(path, target_hw),
            SampleSource::Memory(image) => {
                if image.hw() != target_hw {
                    return Err(VisionError::InvalidImage {
                        reason: format!(
                            "in-memory sample is {:?}, expected {:?}",
                            image.hw(),
                            target_hw
                        ),
                    });
                }
                Ok(image.as_ref().clone())
            }
        }
    }

    pub fn describe(&self) -> String {
        match &self.source {
            SampleSource::File(path) => path.display().to_string(),
            SampleSource::Memory(image) => {
                format!("<memory {}x{}>", image.height(), image.width())
            }
        }
    }
}

/// A finite, restartable sequence of labelled samples.
#[derive(Debug, Clone)]
pub struct Partition {
    kind: PartitionKind,
    samples: Vec<Sample>,
}

impl Partition {
    pub fn new(kind: PartitionKind, samples: Vec<Sample>) -> Self {
        Self { kind, samples }
    }

    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn labels(&self) -> Vec<f32> {
        self.samples.iter().map(|sample| sample.label).collect()
    }
}

/// Everything a training run needs for one variant.
#[derive(Debug, Clone)]
pub struct VariantDataset {
    pub variant: String,
    /// Class folder names, index equals label.
    pub class_names: [String; 2],
    pub train: Partition,
    pub validation: Partition,
    pub test_images: Vec<PathBuf>,
}

impl VariantDataset {
    /// Builds a dataset from already materialised partitions.
    pub fn from_partitions(
        variant: impl Into<String>,
        class_names: [String; 2],
        train: Partition,
        validation: Partition,
    ) -> Self {
        Self {
            variant: variant.into(),
            class_names,
            train,
            validation,
            test_images: Vec::new(),
        }
    }
}

/// Recursively collects image files under `dir`, sorted by path.
pub fn list_images(dir: &Path) -> TrainResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|err| TrainError::io(&current, err))?;
        for entry in entries {
            let path = entry.map_err(|err| TrainError::io(&current, err))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if has_image_extension(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn class_dirs(train_dir: &Path) -> TrainResult<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(train_dir).map_err(|err| TrainError::io(train_dir, err))?;
    let mut classes = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| TrainError::io(train_dir, err))?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return Err(TrainError::dataset(&path, "class folder name is not UTF-8"));
        };
        classes.push((name.to_string(), path.clone()));
    }
    classes.sort();
    Ok(classes)
}

fn holdout_count(total: usize, validation_split: f32) -> usize {
    // f32 splits such as 0.7 sit just below their decimal value.
    ((total as f64) * f64::from(validation_split) + 1e-6).floor() as usize
}

/// Scans `<root>/<variant>` and splits its training folder.
pub fn scan_variant(
    root: &Path,
    variant: &str,
    validation_split: f32,
) -> TrainResult<VariantDataset> {
    if !(0.0..1.0).contains(&validation_split) {
        return Err(TrainError::dataset(
            root,
            format!("validation split {validation_split} must lie in [0, 1)"),
        ));
    }
    let variant_dir = root.join(variant);
    let train_dir = variant_dir.join("train");
    if !train_dir.is_dir() {
        return Err(TrainError::MissingVariant {
            variant: variant.to_string(),
            path: variant_dir,
        });
    }

    let classes = class_dirs(&train_dir)?;
    let [(negative, negative_dir), (positive, positive_dir)] = <[_; 2]>::try_from(classes)
        .map_err(|found: Vec<_>| {
            TrainError::dataset(
                &train_dir,
                format!("expected exactly two class folders, found {}", found.len()),
            )
        })?;

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for (label, dir) in [(0.0f32, &negative_dir), (1.0f32, &positive_dir)] {
        let files = list_images(dir)?;
        let held_out = holdout_count(files.len(), validation_split);
        debug!(class = %dir.display(), total = files.len(), held_out, "split class folder");
        for (idx, path) in files.into_iter().enumerate() {
            let sample = Sample::from_file(path, label);
            if idx < held_out {
                validation.push(sample);
            } else {
                train.push(sample);
            }
        }
    }

    let test_dir = variant_dir.join("test");
    let test_images = if test_dir.is_dir() {
        list_images(&test_dir)?
    } else {
        Vec::new()
    };

    info!(
        variant,
        classes = ?[&negative, &positive],
        train = train.len(),
        validation = validation.len(),
        test = test_images.len(),
        "scanned variant"
    );
    Ok(VariantDataset {
        variant: variant.to_string(),
        class_names: [negative, positive],
        train: Partition::new(PartitionKind::Train, train),
        validation: Partition::new(PartitionKind::Validation, validation),
        test_images,
    })
}

/// Balanced class weights `n / (2 * count_c)` for labels `0.0` and `1.0`.
pub fn class_weights(labels: &[f32]) -> TrainResult<[f32; 2]> {
    let positives = labels.iter().filter(|label| **label >= 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(TrainError::dataset(
            PathBuf::new(),
            format!("class weights need both classes, got {negatives}/{positives} (neg/pos)"),
        ));
    }
    let total = labels.len() as f32;
    Ok([
        total / (2.0 * negatives as f32),
        total / (2.0 * positives as f32),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use anemo_vision::save_image;
    use std::collections::HashSet;

    fn write_images(dir: &Path, count: usize, level: f32) {
        fs::create_dir_all(dir).unwrap();
        let image = ImageTensor::solid(4, 4, [level, level, level]).unwrap();
        for idx in 0..count {
            save_image(&image, dir.join(format!("img_{idx:03}.png"))).unwrap();
        }
    }

    #[test]
    fn weights_follow_class_frequencies() {
        let mut labels = vec![0.0f32; 80];
        labels.extend(std::iter::repeat(1.0).take(20));
        let [negative, positive] = class_weights(&labels).unwrap();
        assert!((negative - 0.625).abs() < 1e-6);
        assert!((positive - 2.5).abs() < 1e-6);
    }

    #[test]
    fn weights_need_both_classes() {
        assert!(class_weights(&[1.0, 1.0]).is_err());
        assert!(class_weights(&[]).is_err());
    }

    #[test]
    fn split_is_disjoint_and_ordered_per_class() {
        let root = tempfile::tempdir().unwrap();
        let train = root.path().join("skin").join("train");
        write_images(&train.join("anemic"), 10, 40.0);
        write_images(&train.join("healthy"), 5, 200.0);
        fs::write(train.join("healthy").join("notes.txt"), "ignored").unwrap();

        let dataset = scan_variant(root.path(), "skin", 0.2).unwrap();
        assert_eq!(dataset.class_names, ["anemic".to_string(), "healthy".to_string()]);
        assert_eq!(dataset.validation.len(), 3);
        assert_eq!(dataset.train.len(), 12);
        assert!(dataset.test_images.is_empty());

        let describe = |partition: &Partition| {
            partition
                .samples()
                .iter()
                .map(Sample::describe)
                .collect::<HashSet<_>>()
        };
        assert!(describe(&dataset.train).is_disjoint(&describe(&dataset.validation)));
        let held_out = dataset.validation.samples()[0].describe();
        assert!(held_out.ends_with("img_000.png"), "{held_out}");
        assert_eq!(dataset.validation.labels(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_images_are_found_recursively() {
        let root = tempfile::tempdir().unwrap();
        let variant = root.path().join("nails");
        write_images(&variant.join("train").join("a"), 2, 10.0);
        write_images(&variant.join("train").join("b"), 2, 90.0);
        write_images(&variant.join("test").join("nested"), 3, 50.0);
        let dataset = scan_variant(root.path(), "nails", 0.0).unwrap();
        assert_eq!(dataset.test_images.len(), 3);
        assert_eq!(dataset.validation.len(), 0);
    }

    #[test]
    fn missing_variant_and_wrong_class_count_are_reported() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_variant(root.path(), "conjunctiva", 0.2),
            Err(TrainError::MissingVariant { .. })
        ));
        write_images(&root.path().join("skin").join("train").join("only"), 2, 10.0);
        assert!(matches!(
            scan_variant(root.path(), "skin", 0.2),
            Err(TrainError::Dataset { .. })
        ));
    }

    #[test]
    fn memory_samples_check_their_size() {
        let sample = Sample::in_memory(ImageTensor::solid(4, 4, [1.0, 2.0, 3.0]).unwrap(), 1.0);
        assert_eq!(sample.load((4, 4)).unwrap().hw(), (4, 4));
        assert!(sample.load((8, 8)).is_err());
    }
}
