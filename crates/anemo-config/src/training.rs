// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Training run configuration, merged from built-in defaults, an optional
//! TOML file and `ANEMO_*` environment variables, in that order.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "ANEMO_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    pub epochs: usize,
    pub learning_rate: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    /// Epochs without validation-loss improvement before a phase stops.
    pub early_stopping_patience: usize,
    /// Epochs of validation-loss plateau before the learning rate is cut.
    pub plateau_patience: usize,
    pub plateau_factor: f32,
    pub plateau_min_delta: f32,
    pub min_learning_rate: f32,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            early_stopping_patience: 10,
            plateau_patience: 5,
            plateau_factor: 0.5,
            plateau_min_delta: 1e-4,
            min_learning_rate: 1e-8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory holding `<variant>/train/<class>/…` and `<variant>/test/…`.
    pub dataset_root: PathBuf,
    pub variants: Vec<String>,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    /// `(height, width)` every image is resized to.
    pub image_size: (usize, usize),
    pub batch_size: usize,
    pub validation_split: f32,
    pub warmup: PhaseSettings,
    pub fine_tune: PhaseSettings,
    pub callbacks: CallbackSettings,
    pub augment: bool,
    pub seed: u64,
    pub pretrained_backbone: Option<PathBuf>,
    pub tap_layer: String,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            epochs: 25,
            learning_rate: 1e-3,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("dataset"),
            variants: vec![
                "skin".to_string(),
                "fingernails".to_string(),
                "conjunctiva".to_string(),
            ],
            checkpoint_dir: PathBuf::from("checkpoints"),
            output_dir: PathBuf::from("outputs"),
            image_size: (224, 224),
            batch_size: 16,
            validation_split: 0.2,
            warmup: PhaseSettings::default(),
            fine_tune: PhaseSettings {
                epochs: 40,
                learning_rate: 1e-5,
            },
            callbacks: CallbackSettings::default(),
            augment: true,
            seed: 42,
            pretrained_backbone: None,
            tap_layer: "top_activation".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}: {reason}")]
    Env {
        key: String,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
        reason: err.to_string(),
    })
}

/// Accepts `224` or `224x200` (height x width).
fn parse_image_size(key: &str, value: &str) -> Result<(usize, usize), ConfigError> {
    match value.trim().split_once(['x', 'X']) {
        Some((h, w)) => Ok((parse_env(key, h)?, parse_env(key, w)?)),
        None => {
            let side = parse_env(key, value)?;
            Ok((side, side))
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::Env {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

impl TrainingConfig {
    /// Defaults overlaid with `path` (when given) and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file. Keys that are absent keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        ::tracing::debug!(path = %path.display(), "loaded training configuration file");
        Ok(config)
    }

    /// Applies `ANEMO_*` overrides from `vars`. Unknown keys with the prefix
    /// are ignored with a warning.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "DATASET_ROOT" => self.dataset_root = PathBuf::from(&value),
                "CHECKPOINT_DIR" => self.checkpoint_dir = PathBuf::from(&value),
                "OUTPUT_DIR" => self.output_dir = PathBuf::from(&value),
                "VARIANTS" => {
                    self.variants = value
                        .split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "IMAGE_SIZE" => self.image_size = parse_image_size(&key, &value)?,
                "BATCH_SIZE" => self.batch_size = parse_env(&key, &value)?,
                "VALIDATION_SPLIT" => self.validation_split = parse_env(&key, &value)?,
                "WARMUP_EPOCHS" => self.warmup.epochs = parse_env(&key, &value)?,
                "WARMUP_LR" => self.warmup.learning_rate = parse_env(&key, &value)?,
                "FINE_TUNE_EPOCHS" => self.fine_tune.epochs = parse_env(&key, &value)?,
                "FINE_TUNE_LR" => self.fine_tune.learning_rate = parse_env(&key, &value)?,
                "EARLY_STOPPING_PATIENCE" => {
                    self.callbacks.early_stopping_patience = parse_env(&key, &value)?
                }
                "PLATEAU_PATIENCE" => self.callbacks.plateau_patience = parse_env(&key, &value)?,
                "MIN_LR" => self.callbacks.min_learning_rate = parse_env(&key, &value)?,
                "AUGMENT" => self.augment = parse_bool(&key, &value)?,
                "SEED" => self.seed = parse_env(&key, &value)?,
                "PRETRAINED_BACKBONE" => {
                    self.pretrained_backbone =
                        Some(PathBuf::from(&value)).filter(|p| !p.as_os_str().is_empty())
                }
                "TAP_LAYER" => self.tap_layer = value.trim().to_string(),
                _ => ::tracing::warn!(key = %key, "ignoring unknown configuration variable"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_size.0 == 0 || self.image_size.1 == 0 {
            return Err(ConfigError::Invalid("image_size must be non-zero".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(ConfigError::Invalid(
                "validation_split must lie in [0, 1)".into(),
            ));
        }
        for (label, phase) in [("warmup", &self.warmup), ("fine_tune", &self.fine_tune)] {
            if !(phase.learning_rate.is_finite() && phase.learning_rate > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{label}.learning_rate must be positive"
                )));
            }
        }
        let factor = self.callbacks.plateau_factor;
        if !(factor > 0.0 && factor < 1.0) {
            return Err(ConfigError::Invalid(
                "callbacks.plateau_factor must lie in (0, 1)".into(),
            ));
        }
        if self.variants.is_empty() {
            return Err(ConfigError::Invalid("at least one variant is required".into()));
        }
        Ok(())
    }
}
