use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use clap::Parser;
use cli_support::{validate_backend_choice, ModelArgs, ModelKind};
use models::{CasNet, CasNetConfig, RoadNetPyramid, RoadNetPyramidConfig};
use road_dataset::{write_previews, BatchIter, DatasetConfig, Split};
use std::path::{Path, PathBuf};

use crate::checkpoint::{load_into, resolve_checkpoint, step_from_path};
use crate::config::{LogDirAction, TrainConfig};
use crate::trainer::{fit, RoadObjective, TrainSummary};
use crate::TrainBackend;

pub type ADBackend = Autodiff<TrainBackend>;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the cascaded or pyramid road-network model")]
pub struct TrainArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// TOML config (defaults to $ROADNET_CONFIG, then ./roadnet.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset root containing train/{images,segment,skeleton,boundary}.
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    /// Log directory (defaults to train_log/<model>).
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Keep or delete an existing log directory.
    #[arg(long, value_enum)]
    pub log_dir_action: Option<LogDirAction>,
    #[arg(long)]
    pub steps_per_epoch: Option<usize>,
    #[arg(long)]
    pub max_epoch: Option<usize>,
    /// Samples per step. Values above 1 need training images of a single size.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Seed for shuffling and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainArgs {
    /// Resolved config: per-model defaults, then the config file, then flags.
    pub fn resolve_config(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = TrainConfig::load(self.model.model, self.config.as_deref())?;
        if let Some(root) = &self.dataset_root {
            cfg.dataset_root = root.clone();
        }
        if let Some(dir) = &self.log_dir {
            cfg.log_dir = dir.clone();
        }
        if let Some(action) = self.log_dir_action {
            cfg.log_dir_action = action;
        }
        if let Some(v) = self.steps_per_epoch {
            cfg.steps_per_epoch = v;
        }
        if let Some(v) = self.max_epoch {
            cfg.max_epoch = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        cfg.warn_if_invalid();
        Ok(cfg)
    }
}

/// Create the log directory, clearing it first with `LogDirAction::Delete`.
pub fn prepare_log_dir(dir: &Path, action: LogDirAction) -> anyhow::Result<()> {
    if dir.exists() {
        match action {
            LogDirAction::Keep => {
                tracing::info!(dir = %dir.display(), "reusing existing log directory");
            }
            LogDirAction::Delete => {
                tracing::warn!(dir = %dir.display(), "deleting existing log directory");
                std::fs::remove_dir_all(dir)
                    .with_context(|| format!("failed to delete {}", dir.display()))?;
            }
        }
    }
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainSummary> {
    validate_backend_choice(args.model.backend())?;
    let cfg = args.resolve_config()?;
    prepare_log_dir(&cfg.log_dir, cfg.log_dir_action)?;
    tracing::info!(
        model = %cfg.model,
        dataset_root = %cfg.dataset_root.display(),
        log_dir = %cfg.log_dir.display(),
        steps_per_epoch = cfg.steps_per_epoch,
        max_epoch = cfg.max_epoch,
        batch_size = cfg.batch_size,
        "starting training"
    );

    let device = <ADBackend as Backend>::Device::default();
    let load = args.model.load.as_deref();
    let summary = match cfg.model {
        ModelKind::Casnet => {
            let model = CasNet::<ADBackend>::new(CasNetConfig::default(), &device);
            train_model(model, &cfg, load, &device)?
        }
        ModelKind::Pyramid => {
            let model = RoadNetPyramid::<ADBackend>::new(RoadNetPyramidConfig::default(), &device);
            train_model(model, &cfg, load, &device)?
        }
    };
    match &summary.last_checkpoint {
        Some(path) => tracing::info!(
            path = %path.display(),
            global_step = summary.global_step,
            "training finished"
        ),
        None => tracing::info!(global_step = summary.global_step, "training finished without new checkpoints"),
    }
    Ok(summary)
}

/// Optionally restore weights, then fit. A restored `model-<step>` resumes at that step.
pub fn train_model<M>(
    model: M,
    cfg: &TrainConfig,
    load: Option<&Path>,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<TrainSummary>
where
    M: RoadObjective<ADBackend>,
{
    let (model, start_step) = match load {
        Some(path) => {
            let resolved = resolve_checkpoint(path)?;
            let model = load_into(model, &resolved, device)?;
            let step = step_from_path(&resolved).unwrap_or(0);
            tracing::info!(path = %resolved.display(), step, "restored weights");
            (model, step)
        }
        None => (model, 0),
    };
    let dataset = DatasetConfig {
        seed: cfg.seed,
        ..M::dataset_config()
    };
    let mut iter = BatchIter::from_split(&cfg.dataset_root, Split::Train, dataset)
        .with_context(|| format!("failed to open training split under {}", cfg.dataset_root.display()))?;
    if iter.is_empty() {
        anyhow::bail!("no training samples under {}", cfg.dataset_root.display());
    }
    let (_, summary) = fit(model, cfg, &mut iter, start_step, device)?;
    Ok(summary)
}

#[derive(Parser, Debug)]
#[command(name = "view", about = "Write augmented training samples as PNG previews")]
pub struct ViewArgs {
    /// Augmentation preset to preview.
    #[arg(long, value_enum, default_value_t = ModelKind::Casnet)]
    pub model: ModelKind,
    #[arg(long, default_value = "dataset")]
    pub dataset_root: PathBuf,
    #[arg(long, default_value = "preview")]
    pub out_dir: PathBuf,
    /// Number of samples to write.
    #[arg(long, default_value_t = 8)]
    pub count: usize,
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run_view(args: ViewArgs) -> anyhow::Result<Vec<PathBuf>> {
    let preset = match args.model {
        ModelKind::Casnet => <CasNet<ADBackend> as RoadObjective<ADBackend>>::dataset_config(),
        ModelKind::Pyramid => {
            <RoadNetPyramid<ADBackend> as RoadObjective<ADBackend>>::dataset_config()
        }
    };
    let cfg = DatasetConfig {
        seed: args.seed,
        ..preset
    };
    let mut iter = BatchIter::from_split(&args.dataset_root, Split::Train, cfg)?;
    let written = write_previews(&mut iter, &args.out_dir, args.count)?;
    tracing::info!(files = written.len(), out_dir = %args.out_dir.display(), "preview done");
    Ok(written)
}
