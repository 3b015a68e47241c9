// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Epoch-level classification metrics.

use std::cmp::Ordering;

/// Fraction of samples whose thresholded score (`score > 0.5`) equals the
/// label. Returns `0.0` for empty input.
pub fn binary_accuracy(scores: &[f32], labels: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let correct = scores
        .iter()
        .zip(labels.iter())
        .filter(|(&score, &label)| {
            let predicted = if score > 0.5 { 1.0 } else { 0.0 };
            let truth = if label >= 0.5 { 1.0 } else { 0.0 };
            predicted == truth
        })
        .count();
    correct as f32 / scores.len().min(labels.len()) as f32
}

/// Area under the ROC curve via the Mann–Whitney statistic. Tied scores share
/// their average rank. Returns `0.0` when either class is absent.
pub fn roc_auc(scores: &[f32], labels: &[f32]) -> f32 {
    let n = scores.len().min(labels.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(Ordering::Equal)
    });

    let mut ranks = vec![0.0f64; n];
    let mut start = 0usize;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; the tie group spans start+1..=end.
        let average = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = average;
        }
        start = end;
    }

    let mut positives = 0usize;
    let mut positive_rank_sum = 0.0f64;
    for idx in 0..n {
        if labels[idx] >= 0.5 {
            positives += 1;
            positive_rank_sum += ranks[idx];
        }
    }
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return 0.0;
    }
    let p = positives as f64;
    let u = positive_rank_sum - p * (p + 1.0) / 2.0;
    (u / (p * negatives as f64)) as f32
}

/// Running weighted mean, used to average per-batch losses over an epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanTracker {
    sum: f64,
    weight: f64,
}

impl MeanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f32, weight: usize) {
        self.sum += value as f64 * weight as f64;
        self.weight += weight as f64;
    }

    pub fn mean(&self) -> f32 {
        if self.weight == 0.0 {
            0.0
        } else {
            (self.sum / self.weight) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_and_inverted_rankings() {
        let labels = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels), 1.0);
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels), 0.0);
    }

    #[test]
    fn ties_count_half() {
        let labels = [0.0, 1.0];
        assert_eq!(roc_auc(&[0.5, 0.5], &labels), 0.5);
        let labels = [0.0, 0.0, 1.0, 1.0];
        assert!((roc_auc(&[0.1, 0.4, 0.4, 0.9], &labels) - 0.875).abs() < 1e-6);
    }

    #[test]
    fn single_class_auc_is_zero() {
        assert_eq!(roc_auc(&[0.2, 0.7], &[1.0, 1.0]), 0.0);
        assert_eq!(roc_auc(&[], &[]), 0.0);
    }

    #[test]
    fn accuracy_thresholds_strictly_above_half() {
        let scores = [0.5, 0.51, 0.2, 0.9];
        let labels = [0.0, 1.0, 1.0, 1.0];
        assert_eq!(binary_accuracy(&scores, &labels), 0.75);
    }

    #[test]
    fn mean_tracker_weights_by_batch_size() {
        let mut tracker = MeanTracker::new();
        tracker.update(1.0, 3);
        tracker.update(3.0, 1);
        assert_eq!(tracker.mean(), 1.5);
    }
}
