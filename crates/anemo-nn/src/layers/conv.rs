// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Convolution and pooling over channel-major image rows.
//!
//! A batch of `C x H x W` feature maps is stored as a `(batch, C * H * W)`
//! tensor where element `(b, c * H * W + y * W + x)` addresses channel `c` at
//! pixel `(y, x)`.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

fn validate_positive(value: usize) -> PureResult<()> {
    if value == 0 {
        return Err(TensorError::InvalidDimensions {
            rows: 1,
            cols: value,
        });
    }
    Ok(())
}

/// Two-dimensional convolution lowered onto a matrix product via im2col.
#[derive(Debug)]
pub struct Conv2d {
    weight: Parameter,
    bias: Parameter,
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    input_hw: (usize, usize),
}

impl Conv2d {
    /// Builds a convolution with He-normal weights. `seed` pins the
    /// initialisation; `None` draws from host entropy.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        input_hw: (usize, usize),
        seed: Option<u64>,
    ) -> PureResult<Self> {
        validate_positive(in_channels)?;
        validate_positive(out_channels)?;
        validate_positive(kernel.0)?;
        validate_positive(kernel.1)?;
        validate_positive(stride.0)?;
        validate_positive(stride.1)?;
        validate_positive(input_hw.0)?;
        validate_positive(input_hw.1)?;
        let name = name.into();
        let span = in_channels * kernel.0 * kernel.1;
        let std = (2.0 / span as f32).sqrt();
        let weight = Tensor::random_normal(out_channels, span, 0.0, std, seed)?;
        let bias = Tensor::zeros(1, out_channels)?;
        let conv = Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            input_hw,
        };
        conv.output_hw()?;
        Ok(conv)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Spatial size of the produced feature maps.
    pub fn output_hw(&self) -> PureResult<(usize, usize)> {
        let (h, w) = self.input_hw;
        let (ph, pw) = self.padding;
        let (sh, sw) = self.stride;
        if h + 2 * ph < self.kernel.0 || w + 2 * pw < self.kernel.1 {
            return Err(TensorError::InvalidDimensions {
                rows: h + 2 * ph,
                cols: self.kernel.0.max(self.kernel.1),
            });
        }
        let oh = (h + 2 * ph - self.kernel.0) / sh + 1;
        let ow = (w + 2 * pw - self.kernel.1) / sw + 1;
        Ok((oh, ow))
    }

    fn guard_input(&self, input: &Tensor) -> PureResult<usize> {
        let (batch, cols) = input.shape();
        let expected_cols = self.in_channels * self.input_hw.0 * self.input_hw.1;
        if cols != expected_cols {
            return Err(TensorError::ShapeMismatch {
                left: (1, cols),
                right: (1, expected_cols),
            });
        }
        Ok(batch)
    }

    fn guard_grad(&self, grad_output: &Tensor, batch: usize, spatial: usize) -> PureResult<()> {
        if grad_output.shape() != (batch, self.out_channels * spatial) {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: (batch, self.out_channels * spatial),
            });
        }
        Ok(())
    }

    /// Source pixel for kernel tap `(kh, kw)` of output position `(oy, ox)`,
    /// or `None` when it falls into the zero padding.
    fn source_pixel(&self, oy: usize, ox: usize, kh: usize, kw: usize) -> Option<(usize, usize)> {
        let (h, w) = self.input_hw;
        let iy = (oy * self.stride.0 + kh) as isize - self.padding.0 as isize;
        let ix = (ox * self.stride.1 + kw) as isize - self.padding.1 as isize;
        if iy < 0 || ix < 0 || iy >= h as isize || ix >= w as isize {
            None
        } else {
            Some((iy as usize, ix as usize))
        }
    }

    fn im2col(&self, input: &Tensor, batch: usize, oh: usize, ow: usize) -> PureResult<Tensor> {
        let span = self.in_channels * self.kernel.0 * self.kernel.1;
        let mut columns = Tensor::zeros(batch * oh * ow, span)?;
        let cols = input.shape().1;
        let (h, w) = self.input_hw;
        {
            let input_data = input.data();
            let column_data = columns.data_mut();
            for b in 0..batch {
                let row = &input_data[b * cols..(b + 1) * cols];
                for oy in 0..oh {
                    for ox in 0..ow {
                        let offset = (b * oh * ow + oy * ow + ox) * span;
                        let mut col_idx = 0;
                        for ic in 0..self.in_channels {
                            let channel_offset = ic * h * w;
                            for kh in 0..self.kernel.0 {
                                for kw in 0..self.kernel.1 {
                                    if let Some((iy, ix)) = self.source_pixel(oy, ox, kh, kw) {
                                        column_data[offset + col_idx] =
                                            row[channel_offset + iy * w + ix];
                                    }
                                    col_idx += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(columns)
    }

    fn col2im(&self, columns: &Tensor, batch: usize, oh: usize, ow: usize) -> PureResult<Tensor> {
        let span = self.in_channels * self.kernel.0 * self.kernel.1;
        if columns.shape() != (batch * oh * ow, span) {
            return Err(TensorError::ShapeMismatch {
                left: columns.shape(),
                right: (batch * oh * ow, span),
            });
        }
        let (h, w) = self.input_hw;
        let output_cols = self.in_channels * h * w;
        let mut output = Tensor::zeros(batch, output_cols)?;
        {
            let column_data = columns.data();
            let output_data = output.data_mut();
            for b in 0..batch {
                let grad_row = &mut output_data[b * output_cols..(b + 1) * output_cols];
                for oy in 0..oh {
                    for ox in 0..ow {
                        let row_index = b * oh * ow + oy * ow + ox;
                        let patch = &column_data[row_index * span..(row_index + 1) * span];
                        let mut col_idx = 0;
                        for ic in 0..self.in_channels {
                            let channel_offset = ic * h * w;
                            for kh in 0..self.kernel.0 {
                                for kw in 0..self.kernel.1 {
                                    if let Some((iy, ix)) = self.source_pixel(oy, ox, kh, kw) {
                                        grad_row[channel_offset + iy * w + ix] += patch[col_idx];
                                    }
                                    col_idx += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(output)
    }

    /// `(batch * spatial, out)` product rows → `(batch, out * spatial)` maps.
    fn matrix_to_maps(&self, matrix: &Tensor, batch: usize, spatial: usize) -> PureResult<Tensor> {
        let mut maps = Tensor::zeros(batch, self.out_channels * spatial)?;
        let cols = self.out_channels * spatial;
        {
            let src = matrix.data();
            let dst = maps.data_mut();
            for b in 0..batch {
                for s in 0..spatial {
                    let src_row = (b * spatial + s) * self.out_channels;
                    for oc in 0..self.out_channels {
                        dst[b * cols + oc * spatial + s] = src[src_row + oc];
                    }
                }
            }
        }
        Ok(maps)
    }

    fn maps_to_matrix(&self, maps: &Tensor, batch: usize, spatial: usize) -> PureResult<Tensor> {
        let mut matrix = Tensor::zeros(batch * spatial, self.out_channels)?;
        let cols = self.out_channels * spatial;
        {
            let src = maps.data();
            let dst = matrix.data_mut();
            for b in 0..batch {
                for s in 0..spatial {
                    let dst_row = (b * spatial + s) * self.out_channels;
                    for oc in 0..self.out_channels {
                        dst[dst_row + oc] = src[b * cols + oc * spatial + s];
                    }
                }
            }
        }
        Ok(matrix)
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        let (oh, ow) = self.output_hw()?;
        let patches = self.im2col(input, batch, oh, ow)?;
        let mut product = patches.matmul(&self.weight.value().transpose())?;
        product.add_row_inplace(self.bias.value().data())?;
        self.matrix_to_maps(&product, batch, oh * ow)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        let (oh, ow) = self.output_hw()?;
        self.guard_grad(grad_output, batch, oh * ow)?;
        let patches = self.im2col(input, batch, oh, ow)?;
        let grad_matrix = self.maps_to_matrix(grad_output, batch, oh * ow)?;

        let grad_weight = grad_matrix.transpose().matmul(&patches)?;
        let bias_sums = grad_matrix.sum_axis0();
        let grad_bias = Tensor::from_vec(1, self.out_channels, bias_sums)?;
        let grad_patches = grad_matrix.matmul(self.weight.value())?;
        let grad_input = self.col2im(&grad_patches, batch, oh, ow)?;

        self.weight.accumulate(&grad_weight)?;
        self.bias.accumulate(&grad_bias)?;
        Ok(grad_input)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        let (oh, ow) = self.output_hw()?;
        self.guard_grad(grad_output, batch, oh * ow)?;
        let grad_matrix = self.maps_to_matrix(grad_output, batch, oh * ow)?;
        let grad_patches = grad_matrix.matmul(self.weight.value())?;
        self.col2im(&grad_patches, batch, oh, ow)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)?;
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)?;
        Ok(())
    }
}

/// Averages every channel over its spatial extent: `(batch, C * S)` →
/// `(batch, C)`.
#[derive(Debug, Clone)]
pub struct GlobalAvgPool2d {
    channels: usize,
    spatial: usize,
}

impl GlobalAvgPool2d {
    pub fn new(channels: usize, input_hw: (usize, usize)) -> PureResult<Self> {
        validate_positive(channels)?;
        validate_positive(input_hw.0)?;
        validate_positive(input_hw.1)?;
        Ok(Self {
            channels,
            spatial: input_hw.0 * input_hw.1,
        })
    }

    fn guard_input(&self, input: &Tensor) -> PureResult<usize> {
        let (batch, cols) = input.shape();
        if cols != self.channels * self.spatial {
            return Err(TensorError::ShapeMismatch {
                left: (batch, cols),
                right: (batch, self.channels * self.spatial),
            });
        }
        Ok(batch)
    }
}

impl Module for GlobalAvgPool2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        let inv = 1.0 / self.spatial as f32;
        let data = input.data();
        let cols = self.channels * self.spatial;
        Tensor::from_fn(batch, self.channels, |b, c| {
            let start = b * cols + c * self.spatial;
            data[start..start + self.spatial].iter().sum::<f32>() * inv
        })
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.input_gradient(input, grad_output)
    }

    fn input_gradient(&self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        if grad_output.shape() != (batch, self.channels) {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: (batch, self.channels),
            });
        }
        let inv = 1.0 / self.spatial as f32;
        let grad = grad_output.data();
        Tensor::from_fn(batch, self.channels * self.spatial, |b, col| {
            grad[b * self.channels + col / self.spatial] * inv
        })
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}
