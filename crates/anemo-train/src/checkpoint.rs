// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Checkpoints are a bincode state dict plus a JSON sidecar holding the
//! [`ModelConfig`] needed to rebuild the graph.

use crate::error::{TrainError, TrainResult};
use anemo_nn::{load_state_dict, save_state_dict, Module, SnapshotFormat, StateDict};
use anemo_vision::{BackboneHandle, ClassifierModel, ModelConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// `<dir>/anemia_<variant>_<backbone>.bin`
pub fn checkpoint_path(dir: &Path, variant: &str, backbone: &str) -> PathBuf {
    dir.join(format!("anemia_{variant}_{backbone}.bin"))
}

pub fn sidecar_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("json")
}

fn checkpoint_error(path: &Path, reason: impl ToString) -> TrainError {
    TrainError::Checkpoint {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Writes `state` and its model configuration.
pub fn save_checkpoint(state: &StateDict, config: &ModelConfig, path: &Path) -> TrainResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| TrainError::io(parent, err))?;
    }
    save_state_dict(state, path, SnapshotFormat::Bincode)
        .map_err(|err| checkpoint_error(path, err))?;
    let sidecar = sidecar_path(path);
    let json = serde_json::to_string_pretty(config).map_err(|err| checkpoint_error(&sidecar, err))?;
    fs::write(&sidecar, json).map_err(|err| TrainError::io(&sidecar, err))?;
    info!(path = %path.display(), tensors = state.len(), "saved checkpoint");
    Ok(())
}

/// Rebuilds a model from a checkpoint written by [`save_checkpoint`].
pub fn load_checkpoint(path: &Path) -> TrainResult<(ClassifierModel, BackboneHandle)> {
    let sidecar = sidecar_path(path);
    let json = fs::read_to_string(&sidecar).map_err(|err| TrainError::io(&sidecar, err))?;
    let config: ModelConfig =
        serde_json::from_str(&json).map_err(|err| checkpoint_error(&sidecar, err))?;
    let (mut model, handle) = ClassifierModel::build(&config)?;
    let state = load_state_dict(path, SnapshotFormat::Bincode)
        .map_err(|err| checkpoint_error(path, err))?;
    model
        .load_state_dict(&state)
        .map_err(|err| checkpoint_error(path, err))?;
    model.set_training(false);
    info!(path = %path.display(), "loaded checkpoint");
    Ok((model, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anemo_nn::Tensor;
    use anemo_vision::BackboneConfig;

    fn config() -> ModelConfig {
        ModelConfig {
            backbone: BackboneConfig::compact((8, 8)),
            head_seed: Some(9),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn checkpoint_restores_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "skin", "efficientnet");
        assert!(path.ends_with("anemia_skin_efficientnet.bin"));

        let (model, _) = anemo_vision::create_model(&config()).unwrap();
        model.set_training(false);
        save_checkpoint(&model.state_dict().unwrap(), model.config(), &path).unwrap();
        assert!(sidecar_path(&path).exists());

        let (restored, handle) = load_checkpoint(&path).unwrap();
        assert_eq!(restored.config(), model.config());
        assert_eq!(handle.tap_layer(), model.config().tap_layer);
        let input = Tensor::from_fn(2, 3 * 64, |r, c| ((r + c) % 7) as f32 / 7.0 - 0.5).unwrap();
        let expected = model.forward(&input).unwrap();
        let actual = restored.forward(&input).unwrap();
        assert_eq!(expected.data(), actual.data());
    }

    #[test]
    fn missing_sidecar_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        assert!(matches!(load_checkpoint(&path), Err(TrainError::Io { .. })));
    }
}
