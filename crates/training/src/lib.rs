#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod loss;
pub mod monitor;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use checkpoint::{latest_checkpoint, load_into, resolve_checkpoint, ModelSaver};
pub use config::{LogDirAction, TrainConfig};
pub use loss::{
    class_balanced_sigmoid_cross_entropy, exponential_decay, fused_mse, side_branch_losses,
    weighted_softmax_cross_entropy, WeightDecaySchedule,
};
pub use schedule::{HumanOverride, LearningRateSetter, ScheduledLearningRate};
pub use trainer::{fit, RoadObjective, TrainSummary};
pub use util::{run_train, run_view, TrainArgs, ViewArgs};

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
