// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

/// Picks which test image gets explained.
pub trait SampleSelector {
    /// Index into `candidates`, or `None` when there is nothing to pick.
    fn select(&mut self, candidates: &[PathBuf]) -> Option<usize>;
}

/// Uniform pick driven by a seeded generator.
#[derive(Debug, Clone)]
pub struct SeededSelector {
    rng: StdRng,
}

impl SeededSelector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SampleSelector for SeededSelector {
    fn select(&mut self, candidates: &[PathBuf]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(self.rng.gen_range(0..candidates.len()))
        }
    }
}

/// Always the same position, clamped to the last candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSelector {
    pub index: usize,
}

impl SampleSelector for FixedSelector {
    fn select(&mut self, candidates: &[PathBuf]) -> Option<usize> {
        candidates
            .len()
            .checked_sub(1)
            .map(|last| self.index.min(last))
    }
}
