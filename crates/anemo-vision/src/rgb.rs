// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{VisionError, VisionResult};
use anemo_tensor::Tensor;
use image::{Rgb, RgbImage};

pub const CHANNELS: usize = 3;

/// Decoded RGB photograph stored interleaved (`height x width x 3`) as `f32`
/// levels in `[0, 255]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wraps interleaved RGB samples. The buffer must hold exactly
    /// `height * width * 3` values.
    pub fn new(height: usize, width: usize, data: Vec<f32>) -> VisionResult<Self> {
        if height == 0 || width == 0 {
            return Err(VisionError::invalid(format!(
                "empty image {height}x{width}"
            )));
        }
        if data.len() != height * width * CHANNELS {
            return Err(VisionError::invalid(format!(
                "expected {} samples for a {height}x{width} RGB image, got {}",
                height * width * CHANNELS,
                data.len()
            )));
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// Builds an image by evaluating `f(y, x)` for every pixel.
    pub fn from_fn(
        height: usize,
        width: usize,
        mut f: impl FnMut(usize, usize) -> [f32; 3],
    ) -> VisionResult<Self> {
        let mut data = Vec::with_capacity(height * width * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(y, x));
            }
        }
        Self::new(height, width, data)
    }

    /// Uniformly coloured image.
    pub fn solid(height: usize, width: usize, rgb: [f32; 3]) -> VisionResult<Self> {
        Self::from_fn(height, width, |_, _| rgb)
    }

    pub fn from_rgb8(image: &RgbImage) -> VisionResult<Self> {
        let (width, height) = image.dimensions();
        let data = image.as_raw().iter().map(|&v| v as f32).collect();
        Self::new(height as usize, width as usize, data)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `(height, width)`.
    pub fn hw(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn pixel(&self, y: usize, x: usize) -> [f32; 3] {
        let idx = (y * self.width + x) * CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    pub fn set_pixel(&mut self, y: usize, x: usize, rgb: [f32; 3]) {
        let idx = (y * self.width + x) * CHANNELS;
        self.data[idx..idx + CHANNELS].copy_from_slice(&rgb);
    }

    /// Rejects images with non-finite samples or samples outside `[0, 255]`.
    pub fn validate_levels(&self) -> VisionResult<()> {
        if let Some(value) = self
            .data
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || **v > 255.0)
        {
            return Err(VisionError::invalid(format!(
                "sample {value} outside the [0, 255] range"
            )));
        }
        Ok(())
    }

    /// Planar `(1, 3 * H * W)` row in channel-major order, the layout the
    /// convolution stack consumes.
    pub fn to_planar_row(&self) -> VisionResult<Tensor> {
        let plane = self.height * self.width;
        let mut planar = vec![0.0f32; plane * CHANNELS];
        for (idx, rgb) in self.data.chunks_exact(CHANNELS).enumerate() {
            for (c, value) in rgb.iter().enumerate() {
                planar[c * plane + idx] = *value;
            }
        }
        Ok(Tensor::from_vec(1, plane * CHANNELS, planar)?)
    }

    /// Quantises to 8-bit RGB, rounding and clamping each sample.
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let [r, g, b] = self.pixel(y as usize, x as usize);
            Rgb([quantise(r), quantise(g), quantise(b)])
        })
    }
}

fn quantise(value: f32) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 255.0) as u8
    } else {
        0
    }
}
