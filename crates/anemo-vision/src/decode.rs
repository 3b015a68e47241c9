// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{VisionError, VisionResult};
use crate::rgb::ImageTensor;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// File extensions picked up when scanning image folders.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn read_rgb(path: &Path) -> VisionResult<RgbImage> {
    let bytes = std::fs::read(path).map_err(|source| VisionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = image::load_from_memory(&bytes).map_err(|err| {
        VisionError::invalid(format!("failed to decode {}: {err}", path.display()))
    })?;
    Ok(decoded.to_rgb8())
}

fn resize_rgb(rgb: RgbImage, target_hw: (usize, usize)) -> VisionResult<ImageTensor> {
    let (height, width) = target_hw;
    if height == 0 || width == 0 {
        return Err(VisionError::invalid("target size must be non-empty"));
    }
    let resized = if rgb.dimensions() == (width as u32, height as u32) {
        rgb
    } else {
        imageops::resize(&rgb, width as u32, height as u32, FilterType::Nearest)
    };
    ImageTensor::from_rgb8(&resized)
}

/// Decodes a PNG/JPEG file to RGB at its stored size.
pub fn decode_image(path: impl AsRef<Path>) -> VisionResult<ImageTensor> {
    ImageTensor::from_rgb8(&read_rgb(path.as_ref())?)
}

/// Decodes a PNG/JPEG file to RGB and resizes it to `target_hw` with
/// nearest-neighbour sampling.
pub fn load_image(
    path: impl AsRef<Path>,
    target_hw: (usize, usize),
) -> VisionResult<ImageTensor> {
    resize_rgb(read_rgb(path.as_ref())?, target_hw)
}

/// Nearest-neighbour resize of an already decoded image, matching
/// [`load_image`].
pub fn resize_image(image: &ImageTensor, target_hw: (usize, usize)) -> VisionResult<ImageTensor> {
    resize_rgb(image.to_rgb8(), target_hw)
}

/// Writes an RGB image, choosing the encoder from the extension.
pub fn save_image(image: &ImageTensor, path: impl AsRef<Path>) -> VisionResult<()> {
    let path = path.as_ref();
    image.to_rgb8().save(path).map_err(|err| {
        VisionError::invalid(format!("failed to encode {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_is_decoded_and_resized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.png");
        let image =
            ImageTensor::from_fn(4, 6, |y, x| [(y * 10) as f32, (x * 10) as f32, 90.0]).unwrap();
        save_image(&image, &path).unwrap();

        assert_eq!(load_image(&path, (4, 6)).unwrap(), image);
        assert_eq!(decode_image(&path).unwrap(), image);
        let resized = load_image(&path, (8, 12)).unwrap();
        assert_eq!(resized.hw(), (8, 12));
        assert_eq!(resize_image(&image, (8, 12)).unwrap(), resized);
    }

    #[test]
    fn undecodable_file_is_invalid_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            load_image(&path, (4, 4)),
            Err(VisionError::InvalidImage { .. })
        ));
        assert!(matches!(
            load_image(dir.path().join("absent.png"), (4, 4)),
            Err(VisionError::Io { .. })
        ));
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(has_image_extension(Path::new("a/B.JPEG")));
        assert!(has_image_extension(Path::new("x.png")));
        assert!(!has_image_extension(Path::new("notes.txt")));
        assert!(!has_image_extension(Path::new("README")));
    }
}
