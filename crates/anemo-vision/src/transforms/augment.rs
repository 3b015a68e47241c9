// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Random geometric and photometric augmentation for training images.
//!
//! Parameters are sampled up front ([`AugmentConfig::sample`]) so a batch can
//! be augmented in parallel while the random stream stays in batch order.

use crate::error::VisionResult;
use crate::rgb::ImageTensor;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Maximum absolute rotation in degrees.
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width.
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height.
    pub height_shift: f32,
    /// Scale factors are drawn from `[1 - zoom, 1 + zoom]` per axis.
    pub zoom: f32,
    pub horizontal_flip: bool,
    pub brightness: (f32, f32),
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 30.0,
            width_shift: 0.2,
            height_shift: 0.2,
            zoom: 0.2,
            horizontal_flip: true,
            brightness: (0.7, 1.3),
        }
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f32, high: f32) -> f32 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

impl AugmentConfig {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AugmentParams {
        let rotation = self.rotation_degrees.abs();
        let zoom = self.zoom.abs();
        AugmentParams {
            rotation_degrees: uniform(rng, -rotation, rotation),
            shift: (
                uniform(rng, -self.height_shift.abs(), self.height_shift.abs()),
                uniform(rng, -self.width_shift.abs(), self.width_shift.abs()),
            ),
            zoom: (
                uniform(rng, 1.0 - zoom, 1.0 + zoom),
                uniform(rng, 1.0 - zoom, 1.0 + zoom),
            ),
            flip: self.horizontal_flip && rng.gen_bool(0.5),
            brightness: uniform(rng, self.brightness.0, self.brightness.1),
        }
    }
}

/// One concrete draw of augmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentParams {
    pub rotation_degrees: f32,
    /// Shift along `(y, x)` as fractions of the image size.
    pub shift: (f32, f32),
    /// Scale along `(y, x)`.
    pub zoom: (f32, f32),
    pub flip: bool,
    pub brightness: f32,
}

impl AugmentParams {
    pub fn identity() -> Self {
        Self {
            rotation_degrees: 0.0,
            shift: (0.0, 0.0),
            zoom: (1.0, 1.0),
            flip: false,
            brightness: 1.0,
        }
    }
}

/// Half-sample symmetric index (`dcba|abcd|dcba`).
fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let folded = index.rem_euclid(2 * len);
    (if folded < len { folded } else { 2 * len - 1 - folded }) as usize
}

fn sample_bilinear(image: &ImageTensor, y: f32, x: f32) -> [f32; 3] {
    let (height, width) = image.hw();
    let y0 = y.floor();
    let x0 = x.floor();
    let wy = y - y0;
    let wx = x - x0;
    let (y0, x0) = (y0 as isize, x0 as isize);
    let rows = [reflect(y0, height), reflect(y0 + 1, height)];
    let cols = [reflect(x0, width), reflect(x0 + 1, width)];
    let mut out = [0.0f32; 3];
    for (ry, row) in rows.iter().enumerate() {
        let fy = if ry == 0 { 1.0 - wy } else { wy };
        for (rx, col) in cols.iter().enumerate() {
            let fx = if rx == 0 { 1.0 - wx } else { wx };
            let pixel = image.pixel(*row, *col);
            for c in 0..3 {
                out[c] += fy * fx * pixel[c];
            }
        }
    }
    out
}

/// Applies `params`: rotation, zoom and shift about the image centre with
/// bilinear reflect-filled resampling, then the flip, then the brightness
/// factor clamped to `[0, 255]`.
pub fn augment(image: &ImageTensor, params: &AugmentParams) -> VisionResult<ImageTensor> {
    let (height, width) = image.hw();
    let cy = (height as f32 - 1.0) / 2.0;
    let cx = (width as f32 - 1.0) / 2.0;
    let (sin, cos) = params.rotation_degrees.to_radians().sin_cos();
    let ty = params.shift.0 * height as f32;
    let tx = params.shift.1 * width as f32;
    let (zy, zx) = params.zoom;

    ImageTensor::from_fn(height, width, |y, x| {
        let x = if params.flip { width - 1 - x } else { x };
        let py = (y as f32 - cy) * zy + ty;
        let px = (x as f32 - cx) * zx + tx;
        let sy = cos * py - sin * px + cy;
        let sx = sin * py + cos * px + cx;
        sample_bilinear(image, sy, sx).map(|v| (v * params.brightness).clamp(0.0, 255.0))
    })
}
