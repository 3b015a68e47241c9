// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-level configuration for the anemia screening tools.

pub mod determinism;
pub mod training;
pub mod tracing;

pub use self::determinism::Seeds;
pub use self::training::{CallbackSettings, ConfigError, PhaseSettings, TrainingConfig, ENV_PREFIX};
pub use self::tracing::{init_tracing, InitError};
