// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use anemo_config::{init_tracing, Seeds, TrainingConfig};
use anemo_train::{
    load_checkpoint, result_title, run_variants, SeededSelector, VariantOutcome,
    VisualizationOutcome,
};
use anemo_vision::{
    decode_image, explain, overlay_heatmap, resize_image, save_image, ImageTensor,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing::info;

type DynError = Box<dyn Error>;

type Result<T> = std::result::Result<T, DynError>;

#[derive(Parser)]
#[command(
    name = "anemo",
    author,
    version,
    about = "Train and explain anemia screening classifiers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run two-phase training for every configured variant
    Train(TrainArgs),

    /// Explain one image with a trained checkpoint and write a Grad-CAM overlay
    Explain(ExplainArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// TOML configuration layered over the built-in defaults
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Dataset root holding one folder per variant
    #[arg(long, value_hint = ValueHint::DirPath)]
    dataset: Option<PathBuf>,

    /// Variant to train; repeat to train several (defaults to the configured list)
    #[arg(long = "variant", action = ArgAction::Append)]
    variants: Vec<String>,

    /// Write a JSON summary of every variant to this path
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary: Option<PathBuf>,
}

#[derive(Args)]
struct ExplainArgs {
    /// Checkpoint written by `anemo train` (its JSON sidecar must sit next to it)
    #[arg(long, value_hint = ValueHint::FilePath)]
    checkpoint: PathBuf,

    /// Image to classify and explain
    #[arg(long, value_hint = ValueHint::FilePath)]
    image: PathBuf,

    /// Destination for the overlay PNG
    #[arg(long, value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Backbone layer to tap instead of the one stored with the checkpoint
    #[arg(long)]
    tap: Option<String>,
}

#[derive(Serialize)]
struct VariantLine {
    variant: String,
    status: &'static str,
    detail: Option<String>,
    best_auc: Option<f32>,
    checkpoint: Option<PathBuf>,
    title: Option<String>,
}

impl VariantLine {
    fn from_outcome(outcome: &VariantOutcome) -> Self {
        let mut line = Self {
            variant: outcome.variant().to_string(),
            status: "completed",
            detail: None,
            best_auc: None,
            checkpoint: None,
            title: None,
        };
        match outcome {
            VariantOutcome::Skipped { reason, .. } => {
                line.status = "skipped";
                line.detail = Some(reason.clone());
            }
            VariantOutcome::Diverged { error, .. } => {
                line.status = "diverged";
                line.detail = Some(error.to_string());
            }
            VariantOutcome::Failed { error, .. } => {
                line.status = "failed";
                line.detail = Some(error.to_string());
            }
            VariantOutcome::Completed(summary) => {
                line.best_auc = summary.best_auc;
                line.checkpoint = Some(summary.checkpoint.clone());
                match &summary.visualization {
                    VisualizationOutcome::Written(report) => {
                        line.title = Some(report.title.clone())
                    }
                    VisualizationOutcome::Skipped { reason } => line.detail = Some(reason.clone()),
                    VisualizationOutcome::Failed { reason, .. } => {
                        line.detail = Some(format!("visualisation failed: {reason}"))
                    }
                }
            }
        }
        line
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;
    match &cli.command {
        Command::Train(args) => run_train(args),
        Command::Explain(args) => run_explain(args),
    }
}

fn run_train(args: &TrainArgs) -> Result<()> {
    let mut config = TrainingConfig::load(args.config.as_deref())?;
    if let Some(dataset) = &args.dataset {
        config.dataset_root = dataset.clone();
    }
    if !args.variants.is_empty() {
        config.variants = args.variants.clone();
    }
    config.validate()?;
    info!(
        dataset = %config.dataset_root.display(),
        variants = ?config.variants,
        "starting training run"
    );

    let seeds = Seeds::new(config.seed);
    let mut selector = SeededSelector::new(seeds.seed_for("visualisation"));
    let outcomes = run_variants(&config, &mut selector);
    let lines: Vec<VariantLine> = outcomes.iter().map(VariantLine::from_outcome).collect();
    for line in &lines {
        let detail = line
            .title
            .as_deref()
            .or(line.detail.as_deref())
            .unwrap_or("");
        println!("{:<12} {:<10} {detail}", line.variant, line.status);
    }
    if let Some(path) = &args.summary {
        fs::write(path, serde_json::to_string_pretty(&lines)?)?;
    }

    let unfinished = lines
        .iter()
        .filter(|line| matches!(line.status, "diverged" | "failed"))
        .count();
    if unfinished > 0 {
        return Err(format!("{unfinished} variant(s) did not finish training").into());
    }
    Ok(())
}

fn run_explain(args: &ExplainArgs) -> Result<()> {
    let (model, _) = load_checkpoint(&args.checkpoint)?;
    let tap = args
        .tap
        .clone()
        .unwrap_or_else(|| model.config().tap_layer.clone());
    let original = decode_image(&args.image)?;
    let image = resize_image(&original, model.config().input_hw())?;
    let explanation = explain(&image, &model, &tap)?;
    let overlay = overlay_heatmap(&original, &explanation.heatmap)?;
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    save_image(&ImageTensor::from_rgb8(&overlay)?, &args.output)?;
    info!(output = %args.output.display(), tap = %tap, "wrote overlay");
    println!("{}", result_title(explanation.prediction));
    Ok(())
}
