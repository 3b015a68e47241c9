use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anemo_nn::Module;
use anemo_train::save_checkpoint;
use anemo_vision::{
    create_model, decode_image, save_image, BackboneConfig, ImageTensor, ModelConfig,
};
use tempfile::tempdir;

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_anemo"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn write_checkpoint(path: &Path) {
    let (model, _) = create_model(&ModelConfig {
        backbone: BackboneConfig::compact((16, 16)),
        ..ModelConfig::default()
    })
    .unwrap();
    save_checkpoint(&model.state_dict().unwrap(), model.config(), path).unwrap();
}

#[test]
fn help_lists_both_subcommands() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("train"));
    assert!(stdout.contains("explain"));
}

#[test]
fn explain_writes_full_size_overlay_and_prints_title() {
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("anemia_skin_efficientnet.bin");
    write_checkpoint(&checkpoint);
    let image_path = dir.path().join("photo.png");
    let photo =
        ImageTensor::from_fn(32, 24, |y, x| [150.0 + y as f32, 80.0 + x as f32, 70.0]).unwrap();
    save_image(&photo, &image_path).unwrap();
    let overlay = dir.path().join("out").join("overlay.png");

    let output = run_cli(&[
        "explain",
        "--checkpoint",
        checkpoint.to_str().unwrap(),
        "--image",
        image_path.to_str().unwrap(),
        "--output",
        overlay.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Result: "), "{stdout}");
    assert_eq!(decode_image(&overlay).unwrap().hw(), (32, 24));
}

#[test]
fn explain_without_checkpoint_fails() {
    let dir = tempdir().unwrap();
    let output = run_cli(&[
        "explain",
        "--checkpoint",
        dir.path().join("missing.bin").to_str().unwrap(),
        "--image",
        dir.path().join("missing.png").to_str().unwrap(),
        "--output",
        dir.path().join("overlay.png").to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn train_skips_variants_without_data() {
    let dir = tempdir().unwrap();
    let summary = dir.path().join("summary.json");
    let output = Command::new(env!("CARGO_BIN_EXE_anemo"))
        .args([
            "train",
            "--dataset",
            dir.path().to_str().unwrap(),
            "--variant",
            "skin",
            "--variant",
            "fingernails",
            "--summary",
            summary.to_str().unwrap(),
        ])
        .env("ANEMO_CHECKPOINT_DIR", dir.path().join("ckpt"))
        .env("ANEMO_OUTPUT_DIR", dir.path().join("out"))
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let lines: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    let statuses: Vec<_> = lines
        .as_array()
        .unwrap()
        .iter()
        .map(|line| line["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses, ["skipped", "skipped"]);
}
