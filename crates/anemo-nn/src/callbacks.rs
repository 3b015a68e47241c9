// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Epoch-end monitors driving checkpoint selection, early stopping,
//! learning-rate decay and divergence detection. Epoch indices are 1-based.

use crate::module::StateDict;
use crate::PureResult;

/// Direction in which a monitored quantity improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Min,
    Max,
}

impl MonitorMode {
    fn initial(self) -> f32 {
        match self {
            MonitorMode::Min => f32::INFINITY,
            MonitorMode::Max => f32::NEG_INFINITY,
        }
    }

    /// `current` beats `best` by more than `min_delta`. NaN never improves.
    fn improves(self, current: f32, best: f32, min_delta: f32) -> bool {
        match self {
            MonitorMode::Min => current < best - min_delta,
            MonitorMode::Max => current > best + min_delta,
        }
    }
}

/// Keeps the best-so-far value of a metric. Not reset between training
/// phases, so a later phase only checkpoints when it beats every earlier one.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    mode: MonitorMode,
    best: f32,
    best_epoch: Option<usize>,
}

impl ModelCheckpoint {
    pub fn new(mode: MonitorMode) -> Self {
        Self {
            mode,
            best: mode.initial(),
            best_epoch: None,
        }
    }

    /// Returns `true` when `value` is a new best and weights should be saved.
    pub fn on_epoch_end(&mut self, epoch: usize, value: f32) -> bool {
        if self.mode.improves(value, self.best, 0.0) {
            self.best = value;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> Option<f32> {
        self.best_epoch.map(|_| self.best)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Stops a phase once the monitored value has not improved for `patience`
/// epochs, optionally restoring the weights of the best epoch.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    mode: MonitorMode,
    patience: usize,
    min_delta: f32,
    restore_best: bool,
    best: f32,
    best_epoch: Option<usize>,
    wait: usize,
    stopped_epoch: Option<usize>,
    best_state: Option<StateDict>,
}

impl EarlyStopping {
    pub fn new(mode: MonitorMode, patience: usize, restore_best: bool) -> Self {
        Self {
            mode,
            patience,
            min_delta: 0.0,
            restore_best,
            best: mode.initial(),
            best_epoch: None,
            wait: 0,
            stopped_epoch: None,
            best_state: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    /// Clears all progress. Called at the start of every phase.
    pub fn on_train_begin(&mut self) {
        self.best = self.mode.initial();
        self.best_epoch = None;
        self.wait = 0;
        self.stopped_epoch = None;
        self.best_state = None;
    }

    /// Records an epoch. `snapshot` is invoked when the weights have to be
    /// remembered. Returns `true` when training should stop.
    pub fn on_epoch_end<F>(&mut self, epoch: usize, value: f32, snapshot: F) -> PureResult<bool>
    where
        F: FnOnce() -> PureResult<StateDict>,
    {
        self.wait += 1;
        if self.mode.improves(value, self.best, self.min_delta) {
            self.best = value;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            if self.restore_best {
                self.best_state = Some(snapshot()?);
            }
            return Ok(false);
        }
        if self.restore_best && self.best_state.is_none() {
            self.best_state = Some(snapshot()?);
        }
        if self.wait >= self.patience && epoch > 1 {
            self.stopped_epoch = Some(epoch);
            return Ok(true);
        }
        Ok(false)
    }

    /// Weights to restore after a stop, when restoration is enabled.
    pub fn best_state(&self) -> Option<&StateDict> {
        if self.restore_best {
            self.best_state.as_ref()
        } else {
            None
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

/// Multiplies the learning rate by `factor` once the monitored value has
/// stalled for `patience` epochs, never going below `min_lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    mode: MonitorMode,
    factor: f32,
    patience: usize,
    min_delta: f32,
    min_lr: f32,
    best: f32,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(mode: MonitorMode, factor: f32, patience: usize, min_lr: f32) -> Self {
        Self {
            mode,
            factor: factor.clamp(f32::MIN_POSITIVE, 0.999_999),
            patience,
            min_delta: 1e-4,
            min_lr: min_lr.max(0.0),
            best: mode.initial(),
            wait: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    pub fn on_train_begin(&mut self) {
        self.best = self.mode.initial();
        self.wait = 0;
    }

    /// Returns the reduced learning rate when a reduction fires.
    pub fn on_epoch_end(&mut self, value: f32, learning_rate: f32) -> Option<f32> {
        if self.mode.improves(value, self.best, self.min_delta) {
            self.best = value;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }
        self.wait = 0;
        if learning_rate > self.min_lr {
            Some((learning_rate * self.factor).max(self.min_lr))
        } else {
            None
        }
    }
}

/// Flags batch losses that are NaN or infinite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminateOnNan;

impl TerminateOnNan {
    pub fn new() -> Self {
        Self
    }

    pub fn should_terminate(&self, loss: f32) -> bool {
        !loss.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tensor;

    fn marker(epoch: usize) -> PureResult<StateDict> {
        let mut state = StateDict::new();
        state.insert("epoch".into(), Tensor::full(1, 1, epoch as f32)?);
        Ok(state)
    }

    #[test]
    fn checkpoint_keeps_peak_auc_epoch() {
        let aucs = [0.5, 0.6, 0.55, 0.65, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1];
        let mut checkpoint = ModelCheckpoint::new(MonitorMode::Max);
        let mut saved = Vec::new();
        for (idx, auc) in aucs.iter().enumerate() {
            if checkpoint.on_epoch_end(idx + 1, *auc) {
                saved.push(idx + 1);
            }
        }
        assert_eq!(checkpoint.best_epoch(), Some(4));
        assert_eq!(checkpoint.best(), Some(0.65));
        assert_eq!(saved, vec![1, 2, 4]);
    }

    #[test]
    fn early_stopping_fires_patience_epochs_after_peak() {
        let mut early = EarlyStopping::new(MonitorMode::Min, 10, true);
        early.on_train_begin();
        let losses = [0.9, 0.8, 0.85, 0.7, 0.75, 0.8, 0.9, 1.0, 1.1, 1.2];
        let mut stopped_at = None;
        for epoch in 1..=40 {
            let loss = losses.get(epoch - 1).copied().unwrap_or(1.3);
            if early.on_epoch_end(epoch, loss, || marker(epoch)).unwrap() {
                stopped_at = Some(epoch);
                break;
            }
        }
        assert_eq!(stopped_at, Some(14));
        assert_eq!(early.best_epoch(), Some(4));
        let restored = early.best_state().unwrap();
        assert_eq!(restored["epoch"].data(), &[4.0]);
    }

    #[test]
    fn early_stopping_resets_between_phases() {
        let mut early = EarlyStopping::new(MonitorMode::Min, 2, false);
        early.on_train_begin();
        assert!(!early.on_epoch_end(1, 0.5, || marker(1)).unwrap());
        early.on_train_begin();
        assert!(!early.on_epoch_end(1, 0.9, || marker(1)).unwrap());
        assert_eq!(early.best_epoch(), Some(1));
        assert!(early.best_state().is_none());
    }

    #[test]
    fn plateau_halves_and_respects_floor() {
        let mut plateau = ReduceLrOnPlateau::new(MonitorMode::Min, 0.5, 2, 0.3);
        let mut lr = 1.0f32;
        assert_eq!(plateau.on_epoch_end(1.0, lr), None);
        assert_eq!(plateau.on_epoch_end(1.0, lr), None);
        lr = plateau.on_epoch_end(1.0, lr).unwrap();
        assert_eq!(lr, 0.5);
        assert_eq!(plateau.on_epoch_end(1.0, lr), None);
        lr = plateau.on_epoch_end(1.0, lr).unwrap();
        assert_eq!(lr, 0.3);
        assert_eq!(plateau.on_epoch_end(1.0, lr), None);
        assert_eq!(plateau.on_epoch_end(1.0, lr), None);
    }

    #[test]
    fn plateau_ignores_sub_threshold_improvements() {
        let mut plateau = ReduceLrOnPlateau::new(MonitorMode::Min, 0.5, 1, 1e-8);
        assert_eq!(plateau.on_epoch_end(1.0, 1e-3), None);
        assert_eq!(plateau.on_epoch_end(0.99995, 1e-3), Some(5e-4));
    }

    #[test]
    fn nan_and_inf_terminate() {
        let guard = TerminateOnNan::new();
        assert!(guard.should_terminate(f32::NAN));
        assert!(guard.should_terminate(f32::INFINITY));
        assert!(!guard.should_terminate(0.3));
    }
}
