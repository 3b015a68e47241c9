// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Saliency explanations for the classifier.
//!
//! [`explain`] preprocesses an image with the model's own [`Preprocessor`],
//! records the activation of a named backbone layer through [`TapGradient`]
//! and reduces activation and gradient to a Grad-CAM map. Everything runs
//! through `&self`, so one finalised model can serve concurrent callers.
//!
//! [`Preprocessor`]: crate::preprocess::Preprocessor

pub mod colormap;
pub mod grad_cam;
pub mod overlay;
pub mod tap;

pub use colormap::{jet, jet_table};
pub use grad_cam::{explain, grad_cam, normalise_by_max, Explanation, GradCam, GradCamConfig};
pub use overlay::{overlay_heatmap, HEATMAP_ALPHA};
pub use tap::{TapForward, TapGradient};
