// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Contrast-limited adaptive histogram equalisation on the L* channel.
//!
//! The image is split into a grid of tiles, each tile gets a clipped
//! 256-bin histogram equalisation lookup table, and every pixel blends the
//! tables of its four nearest tile centres bilinearly. Chroma (a*, b*) is left
//! untouched. Images whose size is not a multiple of the grid are extended
//! with reflect-101 borders before the histograms are built.

use crate::color::{lab_to_rgb, rgb_to_lab};
use crate::error::{VisionError, VisionResult};
use crate::rgb::ImageTensor;
use serde::{Deserialize, Serialize};

const BINS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClaheConfig {
    pub clip_limit: f32,
    /// Tiles along `(y, x)`.
    pub tile_grid: (usize, usize),
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tile_grid: (8, 8),
        }
    }
}

/// Reflect-101 index (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(index: usize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let folded = index % period;
    if folded < len {
        folded
    } else {
        period - folded
    }
}

fn level_bin(lightness: f32) -> usize {
    (lightness * 255.0 / 100.0).round().clamp(0.0, 255.0) as usize
}

struct TileGeometry {
    tiles_y: usize,
    tiles_x: usize,
    tile_h: usize,
    tile_w: usize,
}

impl TileGeometry {
    fn new(height: usize, width: usize, grid: (usize, usize)) -> Self {
        let (tiles_y, tiles_x) = grid;
        Self {
            tiles_y,
            tiles_x,
            tile_h: height.div_ceil(tiles_y),
            tile_w: width.div_ceil(tiles_x),
        }
    }
}

fn tile_lut(bins: &[usize], clip_limit: f32, area: usize) -> [f32; BINS] {
    let mut lut = [0.0f32; BINS];
    for (idx, value) in lut.iter_mut().enumerate() {
        *value = idx as f32;
    }
    if bins.iter().filter(|&&count| count > 0).count() <= 1 {
        // Uniform tile: keep the identity mapping.
        return lut;
    }

    let mut hist = bins.to_vec();
    let limit = ((clip_limit * area as f32 / BINS as f32) as usize).max(1);
    let mut clipped = 0usize;
    for count in hist.iter_mut() {
        if *count > limit {
            clipped += *count - limit;
            *count = limit;
        }
    }
    let batch = clipped / BINS;
    let mut residual = clipped - batch * BINS;
    for count in hist.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut idx = 0;
        while idx < BINS && residual > 0 {
            hist[idx] += 1;
            residual -= 1;
            idx += step;
        }
    }

    let scale = (BINS - 1) as f32 / area as f32;
    let mut cdf = 0usize;
    for (value, count) in lut.iter_mut().zip(hist.iter()) {
        cdf += count;
        *value = (cdf as f32 * scale).round().clamp(0.0, 255.0);
    }
    lut
}

/// Neighbouring tile indices and the weight of the second one along an axis.
fn axis_blend(position: usize, tile: usize, tiles: usize) -> (usize, usize, f32) {
    let coord = position as f32 / tile as f32 - 0.5;
    let lower = coord.floor();
    let weight = coord - lower;
    let first = lower.max(0.0) as usize;
    let second = ((lower + 1.0).max(0.0) as usize).min(tiles - 1);
    (first.min(tiles - 1), second, weight)
}

/// Applies CLAHE to the lightness of `image`.
pub fn clahe(image: &ImageTensor, config: &ClaheConfig) -> VisionResult<ImageTensor> {
    image.validate_levels()?;
    if config.tile_grid.0 == 0 || config.tile_grid.1 == 0 {
        return Err(VisionError::invalid("CLAHE tile grid must be non-empty"));
    }
    if !config.clip_limit.is_finite() || config.clip_limit <= 0.0 {
        return Err(VisionError::invalid("CLAHE clip limit must be positive"));
    }
    let (height, width) = image.hw();
    let geometry = TileGeometry::new(height, width, config.tile_grid);

    let mut lab = Vec::with_capacity(height * width);
    for y in 0..height {
        for x in 0..width {
            lab.push(rgb_to_lab(image.pixel(y, x)));
        }
    }

    let area = geometry.tile_h * geometry.tile_w;
    let mut luts = Vec::with_capacity(geometry.tiles_y * geometry.tiles_x);
    for ty in 0..geometry.tiles_y {
        for tx in 0..geometry.tiles_x {
            let mut bins = [0usize; BINS];
            for dy in 0..geometry.tile_h {
                let y = reflect_101(ty * geometry.tile_h + dy, height);
                for dx in 0..geometry.tile_w {
                    let x = reflect_101(tx * geometry.tile_w + dx, width);
                    bins[level_bin(lab[y * width + x][0])] += 1;
                }
            }
            luts.push(tile_lut(&bins, config.clip_limit, area));
        }
    }
    let lut_at = |ty: usize, tx: usize, bin: usize| luts[ty * geometry.tiles_x + tx][bin];

    let mut output = image.clone();
    for y in 0..height {
        let (ty1, ty2, ya) = axis_blend(y, geometry.tile_h, geometry.tiles_y);
        for x in 0..width {
            let (tx1, tx2, xa) = axis_blend(x, geometry.tile_w, geometry.tiles_x);
            let [lightness, a, b] = lab[y * width + x];
            let bin = level_bin(lightness);
            let mapped = (lut_at(ty1, tx1, bin) * (1.0 - xa) + lut_at(ty1, tx2, bin) * xa)
                * (1.0 - ya)
                + (lut_at(ty2, tx1, bin) * (1.0 - xa) + lut_at(ty2, tx2, bin) * xa) * ya;
            let shift = (mapped - bin as f32) * 100.0 / 255.0;
            let enhanced = (lightness + shift).clamp(0.0, 100.0);
            output.set_pixel(y, x, lab_to_rgb([enhanced, a, b]));
        }
    }
    Ok(output)
}
