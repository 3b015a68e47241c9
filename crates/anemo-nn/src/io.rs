// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Weight persistence. A snapshot stores every parameter and buffer of a
//! module keyed by name; JSON is meant for inspection, bincode for
//! checkpoints.

use crate::module::{Module, StateDict};
use crate::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk encoding of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Bincode,
}

impl SnapshotFormat {
    /// `.json` selects JSON; anything else is bincode.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Bincode,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    // Ordered so that two saves of the same weights are byte-identical.
    tensors: BTreeMap<String, StoredTensor>,
}

impl Snapshot {
    fn from_state(state: &StateDict) -> Self {
        let tensors = state
            .iter()
            .map(|(name, tensor)| {
                let (rows, cols) = tensor.shape();
                (
                    name.clone(),
                    StoredTensor {
                        rows,
                        cols,
                        data: tensor.data().to_vec(),
                    },
                )
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            tensors,
        }
    }

    fn into_state(self) -> PureResult<StateDict> {
        if self.version != SNAPSHOT_VERSION {
            return Err(TensorError::SerializationError {
                message: format!("unsupported snapshot version {}", self.version),
            });
        }
        let mut state = StateDict::new();
        for (name, stored) in self.tensors {
            state.insert(name, Tensor::from_vec(stored.rows, stored.cols, stored.data)?);
        }
        Ok(state)
    }
}

fn io_error(err: std::io::Error) -> TensorError {
    TensorError::IoError {
        message: err.to_string(),
    }
}

fn serde_error(err: impl ToString) -> TensorError {
    TensorError::SerializationError {
        message: err.to_string(),
    }
}

/// Writes a state dictionary in the requested format.
pub fn save_state_dict<P: AsRef<Path>>(
    state: &StateDict,
    path: P,
    format: SnapshotFormat,
) -> PureResult<()> {
    let snapshot = Snapshot::from_state(state);
    tracing::debug!(
        path = %path.as_ref().display(),
        tensors = snapshot.tensors.len(),
        ?format,
        "writing weight snapshot"
    );
    let file = File::create(path.as_ref()).map_err(io_error)?;
    let writer = BufWriter::new(file);
    match format {
        SnapshotFormat::Json => {
            serde_json::to_writer_pretty(writer, &snapshot).map_err(serde_error)
        }
        SnapshotFormat::Bincode => bincode::serialize_into(writer, &snapshot).map_err(serde_error),
    }
}

/// Reads a state dictionary written by [`save_state_dict`].
pub fn load_state_dict<P: AsRef<Path>>(path: P, format: SnapshotFormat) -> PureResult<StateDict> {
    let file = File::open(path.as_ref()).map_err(io_error)?;
    let reader = BufReader::new(file);
    let snapshot: Snapshot = match format {
        SnapshotFormat::Json => serde_json::from_reader(reader).map_err(serde_error)?,
        SnapshotFormat::Bincode => bincode::deserialize_from(reader).map_err(serde_error)?,
    };
    snapshot.into_state()
}

pub fn save_json<M: Module + ?Sized, P: AsRef<Path>>(module: &M, path: P) -> PureResult<()> {
    save_state_dict(&module.state_dict()?, path, SnapshotFormat::Json)
}

pub fn load_json<M: Module + ?Sized, P: AsRef<Path>>(module: &mut M, path: P) -> PureResult<()> {
    let state = load_state_dict(path, SnapshotFormat::Json)?;
    module.load_state_dict(&state)
}

pub fn save_bincode<M: Module + ?Sized, P: AsRef<Path>>(module: &M, path: P) -> PureResult<()> {
    save_state_dict(&module.state_dict()?, path, SnapshotFormat::Bincode)
}

pub fn load_bincode<M: Module + ?Sized, P: AsRef<Path>>(module: &mut M, path: P) -> PureResult<()> {
    let state = load_state_dict(path, SnapshotFormat::Bincode)?;
    module.load_state_dict(&state)
}
