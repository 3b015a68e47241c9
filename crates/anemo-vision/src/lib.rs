// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Vision side of the anemia screening pipeline: RGB image tensors, CLAHE
//! contrast enhancement, normalization and augmentation, the backbone +
//! head model factory, and Grad-CAM explanations with heatmap overlays.

pub mod color;
pub mod decode;
pub mod error;
pub mod models;
pub mod preprocess;
pub mod rgb;
pub mod transforms;
pub mod xai;

pub use crate::decode::{
    decode_image, has_image_extension, load_image, resize_image, save_image, IMAGE_EXTENSIONS,
};
pub use crate::error::{VisionError, VisionResult};
pub use crate::models::{
    create_model, BackboneConfig, BackboneHandle, ClassifierModel, ModelConfig, ModelTrace,
};
pub use crate::preprocess::{preprocess, Preprocessor};
pub use crate::rgb::ImageTensor;
pub use crate::transforms::{
    augment, clahe, AugmentConfig, AugmentParams, ClaheConfig, Normalization,
};
pub use crate::xai::{explain, overlay_heatmap, Explanation, TapGradient};
