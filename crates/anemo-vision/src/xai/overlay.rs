// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::colormap::jet;
use crate::error::{VisionError, VisionResult};
use crate::rgb::ImageTensor;
use anemo_tensor::Tensor;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Weight of the colourised heatmap when blended onto the photograph.
pub const HEATMAP_ALPHA: f32 = 0.5;

/// Rescales all samples jointly so the minimum maps to 0 and the maximum to
/// 255. A constant buffer only gets shifted to 0.
fn rescale_min_max(values: &mut [f32]) {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    for value in values.iter_mut() {
        *value -= min;
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max > 0.0 {
        for value in values.iter_mut() {
            *value = *value / max * 255.0;
        }
    }
}

fn colourise(heatmap: &Tensor) -> VisionResult<RgbImage> {
    let (rows, cols) = heatmap.shape();
    let mut colours: Vec<f32> = Vec::with_capacity(rows * cols * 3);
    for value in heatmap.data() {
        // Truncating cast; NaN maps to 0.
        let level = (255.0 * value) as u8;
        colours.extend_from_slice(&jet(level));
    }
    rescale_min_max(&mut colours);
    let raw = colours.iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect();
    RgbImage::from_raw(cols as u32, rows as u32, raw)
        .ok_or_else(|| VisionError::invalid("heatmap could not be colourised"))
}

/// Blends a `[0, 1]` heatmap onto `image`: jet colouring, bilinear resize to
/// the image size, `image + 0.5 * colour`, then a joint min-max rescale to
/// `[0, 255]`.
pub fn overlay_heatmap(image: &ImageTensor, heatmap: &Tensor) -> VisionResult<RgbImage> {
    if heatmap.is_empty() {
        return Err(VisionError::invalid("empty heatmap"));
    }
    let (height, width) = image.hw();
    let coloured = colourise(heatmap)?;
    let resized = imageops::resize(&coloured, width as u32, height as u32, FilterType::Triangle);

    let mut blended: Vec<f32> = image
        .data()
        .iter()
        .zip(resized.as_raw().iter())
        .map(|(pixel, colour)| pixel + HEATMAP_ALPHA * f32::from(*colour))
        .collect();
    rescale_min_max(&mut blended);
    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let idx = (y as usize * width + x as usize) * 3;
        Rgb([
            blended[idx].round().clamp(0.0, 255.0) as u8,
            blended[idx + 1].round().clamp(0.0, 255.0) as u8,
            blended[idx + 2].round().clamp(0.0, 255.0) as u8,
        ])
    }))
}
