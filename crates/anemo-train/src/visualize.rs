// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Grad-CAM rendering for one held-out image per variant.

use crate::error::{TrainError, TrainResult};
use crate::selection::SampleSelector;
use anemo_vision::{
    decode_image, explain, overlay_heatmap, resize_image, save_image, ClassifierModel, ImageTensor,
    VisionResult,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Predictions above this are reported as anemic.
pub const DECISION_THRESHOLD: f32 = 0.5;

/// `Result: Anemic (87.12%)`. The percentage is always the raw sigmoid
/// output, whichever label is shown.
pub fn result_title(prediction: f32) -> String {
    let label = if prediction > DECISION_THRESHOLD {
        "Anemic"
    } else {
        "Healthy"
    };
    format!("Result: {label} ({:.2}%)", prediction * 100.0)
}

/// Written next to the overlay PNG.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationReport {
    pub variant: String,
    pub image: PathBuf,
    pub overlay: PathBuf,
    pub tap_layer: String,
    pub prediction: f32,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisualizationOutcome {
    Written(VisualizationReport),
    Skipped { reason: String },
    /// The chosen image could not be explained; training results stand.
    Failed { image: PathBuf, reason: String },
}

fn render(
    model: &ClassifierModel,
    image_path: &Path,
    tap: &str,
) -> VisionResult<(f32, ImageTensor)> {
    let original = decode_image(image_path)?;
    let image = resize_image(&original, model.config().input_hw())?;
    let explanation = explain(&image, model, tap)?;
    let overlay = overlay_heatmap(&original, &explanation.heatmap)?;
    Ok((explanation.prediction, ImageTensor::from_rgb8(&overlay)?))
}

/// Explains one test image picked by `selector` and writes
/// `anemia_<variant>_gradcam.png` plus a JSON report into `output_dir`.
pub fn visualize_variant(
    model: &ClassifierModel,
    variant: &str,
    test_images: &[PathBuf],
    selector: &mut dyn SampleSelector,
    output_dir: &Path,
) -> TrainResult<VisualizationOutcome> {
    let Some(index) = selector.select(test_images) else {
        info!(variant, "no test images to visualise");
        return Ok(VisualizationOutcome::Skipped {
            reason: "no test images".to_string(),
        });
    };
    let Some(image_path) = test_images.get(index) else {
        return Ok(VisualizationOutcome::Skipped {
            reason: format!("selector returned out-of-range index {index}"),
        });
    };
    let tap = model.config().tap_layer.clone();
    let (prediction, overlay) = match render(model, image_path, &tap) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(variant, image = %image_path.display(), error = %err, "visualisation failed");
            return Ok(VisualizationOutcome::Failed {
                image: image_path.clone(),
                reason: err.to_string(),
            });
        }
    };

    fs::create_dir_all(output_dir).map_err(|err| TrainError::io(output_dir, err))?;
    let overlay_path = output_dir.join(format!("anemia_{variant}_gradcam.png"));
    save_image(&overlay, &overlay_path)?;
    let report = VisualizationReport {
        variant: variant.to_string(),
        image: image_path.clone(),
        overlay: overlay_path.clone(),
        tap_layer: tap,
        prediction,
        title: result_title(prediction),
    };
    let report_path = overlay_path.with_extension("json");
    let json = serde_json::to_string_pretty(&report).map_err(|err| TrainError::Checkpoint {
        path: report_path.clone(),
        reason: err.to_string(),
    })?;
    fs::write(&report_path, json).map_err(|err| TrainError::io(&report_path, err))?;
    info!(variant, title = %report.title, overlay = %overlay_path.display(), "wrote Grad-CAM");
    Ok(VisualizationOutcome::Written(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::FixedSelector;
    use anemo_vision::{create_model, BackboneConfig, ModelConfig};

    #[test]
    fn titles_use_the_raw_probability() {
        assert_eq!(result_title(0.8712), "Result: Anemic (87.12%)");
        assert_eq!(result_title(0.5), "Result: Healthy (50.00%)");
        assert_eq!(result_title(0.0314), "Result: Healthy (3.14%)");
    }

    #[test]
    fn writes_overlay_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("test").join("sample.png");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        let photo =
            ImageTensor::from_fn(24, 20, |y, x| [(y * 9) as f32, (x * 11) as f32, 90.0]).unwrap();
        save_image(&photo, &source).unwrap();

        let (model, _) = create_model(&ModelConfig {
            backbone: BackboneConfig::compact((16, 16)),
            ..ModelConfig::default()
        })
        .unwrap();
        let out = dir.path().join("outputs");
        let outcome = visualize_variant(
            &model,
            "skin",
            &[source.clone()],
            &mut FixedSelector::default(),
            &out,
        )
        .unwrap();
        let VisualizationOutcome::Written(report) = outcome else {
            panic!("expected a written visualisation, got {outcome:?}");
        };
        assert_eq!(report.image, source);
        assert!(report.title.starts_with("Result: "));
        // Drawn on the photograph as stored, not on the 16x16 model input.
        let written = decode_image(&report.overlay).unwrap();
        assert_eq!(written.hw(), (24, 20));
        assert!(out.join("anemia_skin_gradcam.json").exists());
    }

    #[test]
    fn empty_and_unreadable_inputs_do_not_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = create_model(&ModelConfig {
            backbone: BackboneConfig::compact((8, 8)),
            ..ModelConfig::default()
        })
        .unwrap();
        let mut selector = FixedSelector::default();
        let skipped = visualize_variant(&model, "nails", &[], &mut selector, dir.path()).unwrap();
        assert!(matches!(skipped, VisualizationOutcome::Skipped { .. }));

        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"nope").unwrap();
        let failed = visualize_variant(
            &model,
            "nails",
            &[broken],
            &mut FixedSelector::default(),
            dir.path(),
        )
        .unwrap();
        assert!(matches!(failed, VisualizationOutcome::Failed { .. }));
    }
}
