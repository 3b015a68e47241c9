// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense row-major tensors used by the anemia screening networks.
//!
//! Every activation in the workspace is a `(batch, features)` matrix. Image
//! activations flatten their planes channel-major, so a `C x H x W` feature
//! map occupies `C * H * W` columns of a single row.

mod error;
mod tensor;

pub use error::{PureResult, TensorError};
pub use tensor::Tensor;
