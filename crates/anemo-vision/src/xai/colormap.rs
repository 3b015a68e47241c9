// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The matplotlib "jet" colour table.

/// `(x, value)` anchors of one channel, linearly interpolated.
type Segments = &'static [(f32, f32)];

const JET_RED: Segments = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: Segments = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: Segments = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

pub const JET_ENTRIES: usize = 256;

fn interpolate(segments: Segments, x: f32) -> f32 {
    for pair in segments.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    segments[segments.len() - 1].1
}

/// Colour of entry `index` (of 256) as RGB in `[0, 1]`.
pub fn jet(index: u8) -> [f32; 3] {
    let x = f32::from(index) / (JET_ENTRIES - 1) as f32;
    [
        interpolate(JET_RED, x),
        interpolate(JET_GREEN, x),
        interpolate(JET_BLUE, x),
    ]
}

/// The full 256-entry table.
pub fn jet_table() -> Vec<[f32; 3]> {
    (0..JET_ENTRIES).map(|idx| jet(idx as u8)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_match_matplotlib() {
        assert_eq!(jet(0), [0.0, 0.0, 0.5]);
        assert_eq!(jet(255), [0.5, 0.0, 0.0]);
        assert_eq!(jet_table().len(), 256);
    }

    #[test]
    fn middle_is_green_dominant() {
        let [r, g, b] = jet(128);
        assert!(g > 0.9);
        assert!(r > 0.4 && r < 0.6);
        assert!(b > 0.4 && b < 0.6);
    }
}
