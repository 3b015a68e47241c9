// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! sRGB <-> CIE L*a*b* conversion under the D65 white point.
//!
//! RGB levels are `[0, 255]`; `L` is `[0, 100]`. The arithmetic runs in `f64`
//! so that a round trip stays well inside one 8-bit level.

const WHITE_X: f64 = 0.950_47;
const WHITE_Y: f64 = 1.0;
const WHITE_Z: f64 = 1.088_83;

const DELTA: f64 = 6.0 / 29.0;

const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412_456_4, 0.357_576_1, 0.180_437_5],
    [0.212_672_9, 0.715_152_2, 0.072_175_0],
    [0.019_333_9, 0.119_192_0, 0.950_304_1],
];

const XYZ_TO_RGB: [[f64; 3]; 3] = [
    [3.240_454_2, -1.537_138_5, -0.498_531_4],
    [-0.969_266_0, 1.876_010_8, 0.041_556_0],
    [0.055_643_4, -0.204_025_9, 1.057_225_2],
];

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f64) -> f64 {
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f64) -> f64 {
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

fn mat_mul(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Converts one `[0, 255]` RGB triple to `[L, a, b]`.
pub fn rgb_to_lab(rgb: [f32; 3]) -> [f32; 3] {
    let linear = rgb.map(|c| srgb_to_linear(f64::from(c) / 255.0));
    let [x, y, z] = mat_mul(&RGB_TO_XYZ, linear);
    let fx = lab_f(x / WHITE_X);
    let fy = lab_f(y / WHITE_Y);
    let fz = lab_f(z / WHITE_Z);
    [
        (116.0 * fy - 16.0) as f32,
        (500.0 * (fx - fy)) as f32,
        (200.0 * (fy - fz)) as f32,
    ]
}

/// Converts `[L, a, b]` back to RGB, clamping out-of-gamut colours into
/// `[0, 255]`.
pub fn lab_to_rgb(lab: [f32; 3]) -> [f32; 3] {
    let fy = (f64::from(lab[0]) + 16.0) / 116.0;
    let fx = fy + f64::from(lab[1]) / 500.0;
    let fz = fy - f64::from(lab[2]) / 200.0;
    let xyz = [
        WHITE_X * lab_f_inv(fx),
        WHITE_Y * lab_f_inv(fy),
        WHITE_Z * lab_f_inv(fz),
    ];
    mat_mul(&XYZ_TO_RGB, xyz).map(|c| (linear_to_srgb(c).clamp(0.0, 1.0) * 255.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_and_black_hit_lightness_extremes() {
        let white = rgb_to_lab([255.0, 255.0, 255.0]);
        assert!((white[0] - 100.0).abs() < 1e-2);
        assert!(white[1].abs() < 1e-2 && white[2].abs() < 1e-2);
        let black = rgb_to_lab([0.0, 0.0, 0.0]);
        assert!(black[0].abs() < 1e-4);
    }

    #[test]
    fn conversion_round_trips() {
        for rgb in [
            [12.0, 200.0, 90.0],
            [255.0, 0.0, 0.0],
            [180.0, 110.0, 100.0],
            [3.0, 3.0, 4.0],
        ] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for (a, b) in rgb.iter().zip(back.iter()) {
                assert!((a - b).abs() < 1e-2, "{rgb:?} -> {back:?}");
            }
        }
    }
}
