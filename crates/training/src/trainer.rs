//! Training loop shared by both networks.
//!
//! Each step draws a batch from a repeating dataflow, sums the per-task costs
//! (task losses plus scheduled L2 weight decay), and applies one Adam update.
//! Epochs are a fixed number of steps; every epoch ends with a summary line,
//! a `stats.json` entry and a checkpoint.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::{CasNet, RoadNetPyramid, WeightDecay};
use road_dataset::{BatchIter, DatasetConfig, PyramidBatch, RoadBatch};
use std::path::PathBuf;
use std::time::Instant;

use crate::checkpoint::ModelSaver;
use crate::config::TrainConfig;
use crate::loss::{
    scalar, side_branch_losses, sum_costs, weighted_softmax_cross_entropy, WeightDecaySchedule,
};
use crate::monitor::{MovingAverages, StatsWriter};
use crate::schedule::{HumanOverride, LearningRateSetter};

pub const TOTAL_COST: &str = "cost";
const MAX_TO_KEEP: usize = 10;

/// Named task costs of one step; the total is their sum.
pub struct TaskCosts<B: Backend> {
    pub tasks: Vec<(&'static str, Tensor<B, 1>)>,
}

impl<B: Backend> TaskCosts<B> {
    pub fn total(&self, device: &B::Device) -> Tensor<B, 1> {
        sum_costs(self.tasks.iter().map(|(_, c)| c.clone()).collect(), device)
    }
}

/// A network with a training objective over a batch stream.
pub trait RoadObjective<B: AutodiffBackend>: AutodiffModule<B> {
    fn weight_decay() -> WeightDecaySchedule;

    /// Augmentation preset the objective expects.
    fn dataset_config() -> DatasetConfig;

    fn step_costs(
        &self,
        iter: &mut BatchIter,
        cfg: &TrainConfig,
        wd: f64,
        device: &B::Device,
    ) -> anyhow::Result<TaskCosts<B>>;
}

fn exhausted() -> anyhow::Error {
    anyhow::anyhow!("training dataflow ended; the iterator must repeat")
}

pub fn casnet_costs<B: Backend>(
    model: &CasNet<B>,
    batch: RoadBatch<B>,
    wd: f64,
    class_weights: &[f32],
) -> anyhow::Result<TaskCosts<B>> {
    let out = model.forward(batch.images)?;
    let segment = weighted_softmax_cross_entropy(out.segment, batch.segment, class_weights)
        + model.segment.l2_penalty().mul_scalar(wd);
    let skeleton = weighted_softmax_cross_entropy(out.skeleton, batch.skeleton, class_weights)
        + model.skeleton.l2_penalty().mul_scalar(wd);
    Ok(TaskCosts {
        tasks: vec![("segment_cost", segment), ("skeleton_cost", skeleton)],
    })
}

pub fn pyramid_costs<B: Backend>(
    model: &RoadNetPyramid<B>,
    batch: PyramidBatch<B>,
    wd: f64,
) -> anyhow::Result<TaskCosts<B>> {
    let device = batch.image_local.device();
    let out = model.forward(batch.image_local, batch.image_global)?;
    let task = |outputs: &[Tensor<B, 4>], labels: Tensor<B, 3>, penalty: Tensor<B, 1>| {
        let mut costs = side_branch_losses(outputs, labels);
        costs.push(penalty.mul_scalar(wd));
        sum_costs(costs, &device)
    };
    Ok(TaskCosts {
        tasks: vec![
            (
                "segment_global_cost",
                task(out.seg_global.as_slice(), batch.segment_global, model.seg_global.l2_penalty()),
            ),
            (
                "segment_local_cost",
                task(out.seg_local.as_slice(), batch.segment_local, model.seg_local.l2_penalty()),
            ),
            (
                "boundary_cost",
                task(out.boundary.as_slice(), batch.boundary, model.boundary.l2_penalty()),
            ),
            (
                "skeleton_cost",
                task(out.skeleton.as_slice(), batch.skeleton, model.skeleton.l2_penalty()),
            ),
        ],
    })
}

impl<B: AutodiffBackend> RoadObjective<B> for CasNet<B> {
    fn weight_decay() -> WeightDecaySchedule {
        WeightDecaySchedule::casnet()
    }

    fn dataset_config() -> DatasetConfig {
        DatasetConfig::casnet_train()
    }

    fn step_costs(
        &self,
        iter: &mut BatchIter,
        cfg: &TrainConfig,
        wd: f64,
        device: &B::Device,
    ) -> anyhow::Result<TaskCosts<B>> {
        let batch = iter
            .next_batch::<B>(cfg.batch_size.max(1), device)?
            .ok_or_else(exhausted)?;
        casnet_costs(self, batch, wd, &cfg.class_weights)
    }
}

impl<B: AutodiffBackend> RoadObjective<B> for RoadNetPyramid<B> {
    fn weight_decay() -> WeightDecaySchedule {
        WeightDecaySchedule::pyramid()
    }

    fn dataset_config() -> DatasetConfig {
        DatasetConfig::pyramid_train()
    }

    fn step_costs(
        &self,
        iter: &mut BatchIter,
        cfg: &TrainConfig,
        wd: f64,
        device: &B::Device,
    ) -> anyhow::Result<TaskCosts<B>> {
        let batch = iter
            .next_pyramid_batch::<B>(cfg.batch_size.max(1), device)?
            .ok_or_else(exhausted)?;
        pyramid_costs(self, batch, wd)
    }
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs_run: usize,
    pub global_step: usize,
    pub last_checkpoint: Option<PathBuf>,
    /// Moving average of the total cost after the last step.
    pub final_cost: Option<f64>,
}

/// Run epochs `start_step / steps_per_epoch + 1 ..= max_epoch`, checkpointing each.
pub fn fit<B, M>(
    mut model: M,
    cfg: &TrainConfig,
    iter: &mut BatchIter,
    start_step: usize,
    device: &B::Device,
) -> anyhow::Result<(M, TrainSummary)>
where
    B: AutodiffBackend,
    M: RoadObjective<B>,
{
    if cfg.steps_per_epoch == 0 {
        anyhow::bail!("steps_per_epoch must be positive");
    }
    std::fs::create_dir_all(&cfg.log_dir)?;
    let mut optim = AdamConfig::new().with_epsilon(cfg.epsilon).init::<B, M>();
    let wd_schedule = M::weight_decay();
    let lr_setter = LearningRateSetter {
        schedule: cfg.learning_rate.clone(),
        human: Some(HumanOverride::new(&cfg.log_dir)),
    };
    let saver = ModelSaver::new(&cfg.log_dir, MAX_TO_KEEP);
    let mut stats = StatsWriter::open(&cfg.log_dir)?;
    let mut averages = MovingAverages::default();

    let mut global_step = start_step;
    let mut summary = TrainSummary {
        epochs_run: 0,
        global_step,
        last_checkpoint: None,
        final_cost: None,
    };
    let start_epoch = start_step / cfg.steps_per_epoch + 1;
    if start_epoch > cfg.max_epoch {
        tracing::warn!(start_epoch, max_epoch = cfg.max_epoch, "nothing to train");
    }

    for epoch in start_epoch..=cfg.max_epoch {
        let lr = lr_setter.epoch_start(epoch);
        let started = Instant::now();
        for _ in 0..cfg.steps_per_epoch {
            let wd = wd_schedule.at(global_step);
            let costs = model.step_costs(iter, cfg, wd, device)?;
            let total = costs.total(device);
            for (name, cost) in &costs.tasks {
                averages.update(name, scalar(cost.clone().detach()) as f64);
            }
            averages.update(TOTAL_COST, scalar(total.clone().detach()) as f64);

            let grads = GradientsParams::from_grads(total.backward(), &model);
            model = optim.step(lr, model, grads);
            global_step += 1;
        }

        let secs = started.elapsed().as_secs_f64();
        let cost = averages.get(TOTAL_COST).unwrap_or(f64::NAN);
        tracing::info!(
            epoch,
            global_step,
            lr,
            cost,
            secs_per_step = secs / cfg.steps_per_epoch as f64,
            "epoch finished"
        );
        for (name, value) in averages.iter() {
            tracing::debug!(epoch, name, value, "moving average");
        }
        stats.push(epoch, global_step, lr, &averages)?;
        summary.last_checkpoint = Some(saver.save::<B, M>(&model, global_step)?);
        summary.epochs_run += 1;
    }

    summary.global_step = global_step;
    summary.final_cost = averages.get(TOTAL_COST);
    Ok((model, summary))
}
