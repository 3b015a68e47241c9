// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::dataset::Partition;
use crate::error::TrainResult;
use anemo_tensor::Tensor;
use anemo_vision::{augment, AugmentParams, Preprocessor, VisionResult};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use tracing::warn;

/// Network-ready rows and their labels.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(batch, 3 * H * W)` preprocessed images.
    pub inputs: Tensor,
    /// `(batch, 1)` labels.
    pub labels: Tensor,
    /// Samples dropped because they could not be decoded or transformed.
    pub skipped: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.inputs.shape().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fresh permutation of `0..len`.
pub fn shuffled_order<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
}

/// Loads, optionally augments, and preprocesses the samples at `indices`.
///
/// Work is spread over the rayon pool; row order always follows `indices`.
/// `augmentation` must hold one parameter set per index when given. Samples
/// that fail are logged and skipped; `None` is returned when none survive.
pub fn prepare_batch(
    partition: &Partition,
    indices: &[usize],
    image_hw: (usize, usize),
    preprocessor: &Preprocessor,
    augmentation: Option<&[AugmentParams]>,
) -> TrainResult<Option<Batch>> {
    let samples = partition.samples();
    let rows: Vec<(usize, VisionResult<Tensor>)> = indices
        .par_iter()
        .enumerate()
        .map(|(slot, &idx)| {
            let row = samples[idx].load(image_hw).and_then(|image| {
                let image = match augmentation.and_then(|params| params.get(slot)) {
                    Some(params) => augment(&image, params)?,
                    None => image,
                };
                preprocessor.to_input_row(&image)
            });
            (idx, row)
        })
        .collect();

    let mut inputs = Vec::with_capacity(rows.len());
    let mut labels = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for (idx, row) in rows {
        let sample = &samples[idx];
        match row {
            Ok(row) => {
                inputs.push(row);
                labels.push(sample.label);
            }
            Err(err) => {
                skipped += 1;
                warn!(
                    partition = %partition.kind(),
                    sample = %sample.describe(),
                    error = %err,
                    "skipping unreadable sample"
                );
            }
        }
    }
    if inputs.is_empty() {
        return Ok(None);
    }
    let count = labels.len();
    Ok(Some(Batch {
        inputs: Tensor::cat_rows(&inputs)?,
        labels: Tensor::from_vec(count, 1, labels)?,
        skipped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{PartitionKind, Sample};
    use anemo_vision::ImageTensor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn partition() -> Partition {
        let samples = (0..5)
            .map(|idx| {
                let level = 40.0 * idx as f32;
                let image = ImageTensor::solid(4, 4, [level, level, level]).unwrap();
                Sample::in_memory(image, (idx % 2) as f32)
            })
            .collect();
        Partition::new(PartitionKind::Train, samples)
    }

    #[test]
    fn shuffles_are_seeded_permutations() {
        let first = shuffled_order(20, &mut StdRng::seed_from_u64(3));
        let second = shuffled_order(20, &mut StdRng::seed_from_u64(3));
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn rows_follow_the_requested_order() {
        let partition = partition();
        let batch = prepare_batch(&partition, &[4, 1, 2], (4, 4), &Preprocessor::default(), None)
            .unwrap()
            .unwrap();
        assert_eq!(batch.inputs.shape(), (3, 48));
        assert_eq!(batch.labels.data(), &[0.0, 1.0, 0.0]);
        assert_eq!(batch.skipped, 0);
        let first = batch.inputs.row(0).unwrap();
        let second = batch.inputs.row(1).unwrap();
        assert!(first[0] > second[0]);
    }

    #[test]
    fn broken_samples_are_skipped() {
        let mut samples = partition().samples().to_vec();
        samples.push(Sample::from_file("/nonexistent/missing.png", 1.0));
        let partition = Partition::new(PartitionKind::Validation, samples);
        let batch = prepare_batch(&partition, &[5, 0], (4, 4), &Preprocessor::default(), None)
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.skipped, 1);
        assert!(prepare_batch(&partition, &[5], (4, 4), &Preprocessor::default(), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn identity_augmentation_matches_plain_loading() {
        let partition = partition();
        let params = vec![AugmentParams::identity(); 2];
        let plain = prepare_batch(&partition, &[1, 3], (4, 4), &Preprocessor::default(), None)
            .unwrap()
            .unwrap();
        let augmented = prepare_batch(
            &partition,
            &[1, 3],
            (4, 4),
            &Preprocessor::default(),
            Some(params.as_slice()),
        )
        .unwrap()
        .unwrap();
        for (a, b) in plain.inputs.data().iter().zip(augmented.inputs.data()) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
