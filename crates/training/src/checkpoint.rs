//! Per-epoch model snapshots named `model-<global_step>.bin`, tracked by a
//! `checkpoint` pointer file in the log directory.

use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FILE: &str = "checkpoint";
const PREFIX: &str = "model-";
const EXTENSION: &str = "bin";

pub type CheckpointRecorder = BinFileRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone)]
pub struct ModelSaver {
    dir: PathBuf,
    /// Snapshots retained; older ones are removed after each save.
    max_to_keep: usize,
}

impl ModelSaver {
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Self {
        Self {
            dir: dir.into(),
            max_to_keep: max_to_keep.max(1),
        }
    }

    pub fn snapshot_path(&self, global_step: usize) -> PathBuf {
        self.dir.join(format!("{PREFIX}{global_step}.{EXTENSION}"))
    }

    pub fn save<B: Backend, M: Module<B>>(
        &self,
        model: &M,
        global_step: usize,
    ) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.snapshot_path(global_step);
        model
            .clone()
            .save_file(&path, &CheckpointRecorder::new())
            .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
        let name = format!("{PREFIX}{global_step}.{EXTENSION}");
        std::fs::write(self.dir.join(CHECKPOINT_FILE), format!("{name}\n"))
            .with_context(|| format!("failed to update {CHECKPOINT_FILE} in {}", self.dir.display()))?;
        self.prune()?;
        tracing::info!(path = %path.display(), global_step, "saved checkpoint");
        Ok(path)
    }

    fn prune(&self) -> anyhow::Result<()> {
        let mut snapshots = list_snapshots(&self.dir)?;
        if snapshots.len() <= self.max_to_keep {
            return Ok(());
        }
        snapshots.sort_by_key(|(step, _)| *step);
        let excess = snapshots.len() - self.max_to_keep;
        for (_, path) in snapshots.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "failed to remove old checkpoint: {e}");
            }
        }
        Ok(())
    }
}

fn list_snapshots(dir: &Path) -> anyhow::Result<Vec<(usize, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if let Some(step) = step_from_path(&path) {
            out.push((step, path));
        }
    }
    Ok(out)
}

/// Global step encoded in a `model-<step>.bin` file name.
pub fn step_from_path(path: &Path) -> Option<usize> {
    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(PREFIX)?
        .parse()
        .ok()
}

/// Snapshot named by `<dir>/checkpoint`, if any.
pub fn latest_checkpoint(dir: &Path) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(dir.join(CHECKPOINT_FILE)).ok()?;
    let name = raw.lines().next()?.trim();
    if name.is_empty() {
        return None;
    }
    let path = dir.join(name);
    path.exists().then_some(path)
}

/// Resolve `--load`: a snapshot file, or a log directory holding a `checkpoint` pointer.
pub fn resolve_checkpoint(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_dir() {
        return latest_checkpoint(path)
            .with_context(|| format!("no {CHECKPOINT_FILE} pointer in {}", path.display()));
    }
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let with_ext = path.with_extension(EXTENSION);
    if with_ext.exists() {
        return Ok(with_ext);
    }
    anyhow::bail!("checkpoint {} not found", path.display())
}

pub fn load_into<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<M> {
    let path = resolve_checkpoint(path)?;
    model
        .load_file(&path, &CheckpointRecorder::new(), device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.display()))
}
