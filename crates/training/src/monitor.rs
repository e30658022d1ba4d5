//! Moving-average cost summaries and the per-epoch `stats.json` log.

use anyhow::Context;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STATS_FILE: &str = "stats.json";
pub const EMA_DECAY: f64 = 0.95;

/// Exponential moving averages keyed by summary name. The first observation
/// seeds the average.
#[derive(Debug, Clone)]
pub struct MovingAverages {
    decay: f64,
    values: BTreeMap<String, f64>,
}

impl Default for MovingAverages {
    fn default() -> Self {
        Self::new(EMA_DECAY)
    }
}

impl MovingAverages {
    pub fn new(decay: f64) -> Self {
        Self {
            decay,
            values: BTreeMap::new(),
        }
    }

    pub fn update(&mut self, name: &str, value: f64) {
        if !value.is_finite() {
            tracing::warn!(name, value, "ignoring non-finite summary value");
            return;
        }
        let decay = self.decay;
        self.values
            .entry(name.to_string())
            .and_modify(|ema| *ema = *ema * decay + value * (1.0 - decay))
            .or_insert(value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Appends one JSON object per epoch to `<log_dir>/stats.json`.
#[derive(Debug)]
pub struct StatsWriter {
    path: PathBuf,
    entries: Vec<Value>,
}

impl StatsWriter {
    /// Picks up entries from a previous run in the same directory.
    pub fn open(log_dir: &Path) -> anyhow::Result<Self> {
        let path = log_dir.join(STATS_FILE);
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<Vec<Value>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "discarding unreadable stats: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    pub fn push(
        &mut self,
        epoch: usize,
        global_step: usize,
        learning_rate: f64,
        averages: &MovingAverages,
    ) -> anyhow::Result<()> {
        let mut entry = Map::new();
        entry.insert("epoch_num".into(), epoch.into());
        entry.insert("global_step".into(), global_step.into());
        entry.insert("learning_rate".into(), learning_rate.into());
        for (name, value) in averages.iter() {
            entry.insert(name.to_string(), value.into());
        }
        self.entries.push(Value::Object(entry));
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_then_decays() {
        let mut ema = MovingAverages::default();
        ema.update("cost", 1.0);
        assert_eq!(ema.get("cost"), Some(1.0));
        ema.update("cost", 0.0);
        assert!((ema.get("cost").unwrap() - 0.95).abs() < 1e-12);
        ema.update("cost", f64::NAN);
        assert!((ema.get("cost").unwrap() - 0.95).abs() < 1e-12);
        assert_eq!(ema.get("missing"), None);
    }

    #[test]
    fn stats_append_across_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ema = MovingAverages::default();
        ema.update("cost", 2.0);
        let mut stats = StatsWriter::open(dir.path())?;
        stats.push(1, 10, 1e-3, &ema)?;

        let mut reopened = StatsWriter::open(dir.path())?;
        assert_eq!(reopened.entries().len(), 1);
        reopened.push(2, 20, 1e-3, &ema)?;
        let raw = std::fs::read_to_string(dir.path().join(STATS_FILE))?;
        let parsed: Vec<Value> = serde_json::from_str(&raw)?;
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1]["global_step"], 20);
        assert_eq!(parsed[0]["cost"], 2.0);
        Ok(())
    }
}
