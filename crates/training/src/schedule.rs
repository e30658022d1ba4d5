//! Learning-rate schedule and the `hyper.txt` manual override.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const HYPER_FILE: &str = "hyper.txt";

/// Piecewise-constant schedule keyed by 1-based epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledLearningRate {
    pub initial: f64,
    /// `(epoch, value)` pairs sorted by epoch.
    pub points: Vec<(usize, f64)>,
}

impl Default for ScheduledLearningRate {
    fn default() -> Self {
        Self {
            initial: 1e-3,
            points: vec![(20, 5e-4), (40, 1e-4), (60, 5e-5), (80, 1e-5), (100, 1e-6)],
        }
    }
}

impl ScheduledLearningRate {
    pub fn new(initial: f64, mut points: Vec<(usize, f64)>) -> Self {
        points.sort_by_key(|(epoch, _)| *epoch);
        Self { initial, points }
    }

    /// Rate in effect at the start of `epoch`.
    pub fn at_epoch(&self, epoch: usize) -> f64 {
        self.points
            .iter()
            .take_while(|(e, _)| *e <= epoch)
            .last()
            .map(|(_, v)| *v)
            .unwrap_or(self.initial)
    }
}

/// Reads `learning_rate:<value>` from `<log_dir>/hyper.txt` when present.
#[derive(Debug, Clone)]
pub struct HumanOverride {
    path: PathBuf,
}

impl HumanOverride {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join(HYPER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn learning_rate(&self) -> Option<f64> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let value = parse_hyper(&raw, "learning_rate");
        if value.is_none() && !raw.trim().is_empty() {
            tracing::warn!(path = %self.path.display(), "hyper file has no valid learning_rate entry");
        }
        value
    }
}

fn parse_hyper(raw: &str, key: &str) -> Option<f64> {
    raw.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim() != key {
            return None;
        }
        v.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
    })
}

/// Schedule plus manual override, resolved once per epoch.
#[derive(Debug, Clone)]
pub struct LearningRateSetter {
    pub schedule: ScheduledLearningRate,
    pub human: Option<HumanOverride>,
}

impl LearningRateSetter {
    pub fn epoch_start(&self, epoch: usize) -> f64 {
        let scheduled = self.schedule.at_epoch(epoch);
        match self.human.as_ref().and_then(HumanOverride::learning_rate) {
            Some(lr) => {
                if lr != scheduled {
                    tracing::info!(epoch, scheduled, lr, "learning rate overridden by hyper file");
                }
                lr
            }
            None => scheduled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_steps_at_listed_epochs() {
        let lr = ScheduledLearningRate::default();
        assert_eq!(lr.at_epoch(1), 1e-3);
        assert_eq!(lr.at_epoch(19), 1e-3);
        assert_eq!(lr.at_epoch(20), 5e-4);
        assert_eq!(lr.at_epoch(59), 1e-4);
        assert_eq!(lr.at_epoch(150), 1e-6);
    }

    #[test]
    fn unsorted_points_are_ordered() {
        let lr = ScheduledLearningRate::new(1.0, vec![(10, 0.01), (5, 0.1)]);
        assert_eq!(lr.at_epoch(7), 0.1);
        assert_eq!(lr.at_epoch(12), 0.01);
    }

    #[test]
    fn hyper_file_overrides_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let setter = LearningRateSetter {
            schedule: ScheduledLearningRate::default(),
            human: Some(HumanOverride::new(dir.path())),
        };
        assert_eq!(setter.epoch_start(1), 1e-3);
        std::fs::write(dir.path().join(HYPER_FILE), "momentum:0.9\nlearning_rate: 2e-5\n").unwrap();
        assert_eq!(setter.epoch_start(1), 2e-5);
        std::fs::write(dir.path().join(HYPER_FILE), "learning_rate:oops\n").unwrap();
        assert_eq!(setter.epoch_start(40), 1e-4);
    }
}
