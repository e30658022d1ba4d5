//! Training configuration: per-model defaults, an optional TOML file, then CLI overrides.

use anyhow::Context;
use cli_support::ModelKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::schedule::ScheduledLearningRate;

pub const DEFAULT_CONFIG_NAME: &str = "roadnet.toml";
pub const CONFIG_ENV: &str = "ROADNET_CONFIG";

/// What to do with a log directory left by a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogDirAction {
    /// Reuse it; checkpoints and stats are appended.
    #[default]
    Keep,
    /// Remove it before training.
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub model: ModelKind,
    pub dataset_root: PathBuf,
    pub log_dir: PathBuf,
    pub log_dir_action: LogDirAction,
    pub steps_per_epoch: usize,
    pub max_epoch: usize,
    pub batch_size: usize,
    pub seed: Option<u64>,
    pub learning_rate: ScheduledLearningRate,
    /// Adam epsilon.
    pub epsilon: f32,
    /// Softmax class weights for the cascaded network.
    pub class_weights: [f32; 2],
}

impl TrainConfig {
    pub fn defaults(model: ModelKind) -> Self {
        let (steps_per_epoch, max_epoch) = match model {
            ModelKind::Casnet => (400, 160),
            ModelKind::Pyramid => (200, 100),
        };
        Self {
            model,
            dataset_root: PathBuf::from("dataset"),
            log_dir: Path::new("train_log").join(model.as_str()),
            log_dir_action: LogDirAction::Keep,
            steps_per_epoch,
            max_epoch,
            batch_size: 1,
            seed: None,
            learning_rate: ScheduledLearningRate::default(),
            epsilon: 1e-3,
            class_weights: [1.0, 1.0],
        }
    }

    /// Defaults overlaid with `$ROADNET_CONFIG`, else `./roadnet.toml` when present.
    pub fn load(model: ModelKind, explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
        let cfg = match path {
            Some(path) => Self::from_path(model, &path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_NAME);
                if default.exists() {
                    Self::from_path(model, default)?
                } else {
                    Self::defaults(model)
                }
            }
        };
        Ok(cfg)
    }

    pub fn from_path(model: ModelKind, path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let file: TrainConfigFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded training config");
        Ok(Self::from_file(model, file))
    }

    fn from_file(model: ModelKind, file: TrainConfigFile) -> Self {
        let base = Self::defaults(model);
        let section = match model {
            ModelKind::Casnet => file.casnet,
            ModelKind::Pyramid => file.pyramid,
        }
        .unwrap_or_default();
        let lr = file.learning_rate.unwrap_or_default();
        let learning_rate = ScheduledLearningRate::new(
            lr.initial.unwrap_or(base.learning_rate.initial),
            lr.schedule.unwrap_or(base.learning_rate.points),
        );
        Self {
            model,
            dataset_root: file
                .dataset_root
                .map(|v| expand_path(&v))
                .unwrap_or(base.dataset_root),
            log_dir: section
                .log_dir
                .or(file.log_dir.map(|root| format!("{root}/{}", model.as_str())))
                .map(|v| expand_path(&v))
                .unwrap_or(base.log_dir),
            log_dir_action: file.log_dir_action.unwrap_or(base.log_dir_action),
            steps_per_epoch: section.steps_per_epoch.unwrap_or(base.steps_per_epoch),
            max_epoch: section.max_epoch.unwrap_or(base.max_epoch),
            batch_size: section
                .batch_size
                .or(file.batch_size)
                .unwrap_or(base.batch_size),
            seed: file.seed.or(base.seed),
            learning_rate,
            epsilon: file.epsilon.unwrap_or(base.epsilon),
            class_weights: section.class_weights.unwrap_or(base.class_weights),
        }
    }

    /// Settings that will not train as intended.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.steps_per_epoch == 0 {
            out.push("steps_per_epoch is 0; epochs will not train".to_string());
        }
        if self.batch_size == 0 {
            out.push("batch_size is 0; using 1".to_string());
        }
        if self.batch_size > 1 {
            out.push(format!(
                "batch_size {} needs every {} training image to share one size; random crops \
                 to a multiple of {} differ across sizes and the batch will fail to collate",
                self.batch_size,
                self.model,
                match self.model {
                    ModelKind::Casnet => 16,
                    ModelKind::Pyramid => 32,
                }
            ));
        }
        if !self.dataset_root.exists() {
            out.push(format!(
                "dataset_root {} does not exist",
                self.dataset_root.display()
            ));
        }
        if self.learning_rate.initial <= 0.0 {
            out.push("initial learning rate is not positive".to_string());
        }
        out
    }

    pub fn warn_if_invalid(&self) {
        for warning in self.warnings() {
            tracing::warn!("training config: {warning}");
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainConfigFile {
    dataset_root: Option<String>,
    /// Parent of the per-model log directories.
    log_dir: Option<String>,
    log_dir_action: Option<LogDirAction>,
    batch_size: Option<usize>,
    seed: Option<u64>,
    epsilon: Option<f32>,
    learning_rate: Option<LearningRateSection>,
    casnet: Option<ModelSection>,
    pyramid: Option<ModelSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LearningRateSection {
    initial: Option<f64>,
    schedule: Option<Vec<(usize, f64)>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelSection {
    log_dir: Option<String>,
    steps_per_epoch: Option<usize>,
    max_epoch: Option<usize>,
    batch_size: Option<usize>,
    class_weights: Option<[f32; 2]>,
}

/// Expand a leading `~` and `${VAR}` references; unknown variables are left as written.
pub fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
