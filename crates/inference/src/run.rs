use anyhow::Context;
use clap::Parser;
use cli_support::{validate_backend_choice, ModelArgs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::export::{write_merged, write_scratch, ExportTarget};
use crate::factory::build_predictor;
use crate::predictor::RoadPredictor;

#[derive(Parser, Debug)]
#[command(name = "predict", about = "Predict road maps for every PNG in a directory")]
pub struct PredictArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// Directory of input `*.png` images.
    #[arg(long)]
    pub run: PathBuf,
    /// Directory for merged `<stem>.png` outputs; without it, `out-*.png` land in the working directory.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub images: usize,
    pub total_inference: Duration,
    pub outputs: Vec<PathBuf>,
}

impl RunReport {
    pub fn average_ms(&self) -> Option<f64> {
        (self.images > 0).then(|| self.total_inference.as_secs_f64() * 1000.0 / self.images as f64)
    }
}

fn list_pngs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("png") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn run_directory_to(
    predictor: &mut dyn RoadPredictor,
    input_dir: &Path,
    target: &ExportTarget,
) -> anyhow::Result<RunReport> {
    let images = list_pngs(input_dir)?;
    if let ExportTarget::Merged(dir) = target {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let mut report = RunReport::default();
    for path in &images {
        let img = image::open(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .to_rgb8();
        let start = Instant::now();
        let maps = predictor
            .predict(&img)
            .with_context(|| format!("prediction failed for {}", path.display()))?;
        let elapsed = start.elapsed();
        report.total_inference += elapsed;
        report.images += 1;
        tracing::debug!(
            image = %path.display(),
            ms = elapsed.as_secs_f64() * 1000.0,
            "predicted"
        );
        match target {
            ExportTarget::Merged(dir) => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("input file name is not valid UTF-8")?;
                report.outputs.push(write_merged(&maps, dir, stem)?);
            }
            ExportTarget::Scratch(dir) => {
                let written = write_scratch(&maps, dir)?;
                if report.outputs.is_empty() {
                    report.outputs = written;
                }
            }
        }
    }
    match report.average_ms() {
        Some(avg) => tracing::info!(
            model = predictor.name(),
            images = report.images,
            "average infer time (ms): {avg:.3}"
        ),
        None => tracing::warn!(dir = %input_dir.display(), "no png images found"),
    }
    Ok(report)
}

/// Predict every `*.png` under `input_dir` in sorted order. With `output`, write
/// merged maps there; otherwise overwrite `out-*.png` in the working directory.
pub fn run_directory(
    predictor: &mut dyn RoadPredictor,
    input_dir: &Path,
    output: Option<&Path>,
) -> anyhow::Result<RunReport> {
    let target = match output {
        Some(dir) => ExportTarget::Merged(dir.to_path_buf()),
        None => ExportTarget::Scratch(PathBuf::from(".")),
    };
    run_directory_to(predictor, input_dir, &target)
}

pub fn run_predict(args: PredictArgs) -> anyhow::Result<RunReport> {
    validate_backend_choice(args.model.backend())?;
    let checkpoint = args
        .model
        .load
        .as_deref()
        .context("--load <checkpoint> is required for prediction")?;
    let mut predictor = build_predictor(args.model.model, checkpoint)?;
    run_directory(predictor.as_mut(), &args.run, args.output.as_deref())
}
