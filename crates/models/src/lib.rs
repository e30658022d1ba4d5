//! Burn networks for road-network extraction from aerial imagery.
//!
//! - [`CasNet`]: cascaded encoder/decoder predicting segmentation, then centerline.
//! - [`RoadNetPyramid`]: two-scale multi-branch towers predicting segmentation,
//!   boundary and centerline with deep supervision on every side branch.
//!
//! These are pure Burn modules: losses, schedules and data loading live in the
//! `training` and `road_dataset` crates; checkpoint-backed predictors in `inference`.

pub mod casnet;
pub mod error;
pub mod layers;
pub mod pyramid;

pub use casnet::{CasNet, CasNetConfig, CasNetOutput, EncoderDecoder, EncoderDecoderConfig, StageSpec};
pub use error::{ModelError, Result};
pub use layers::{selu, upsample_bilinear_2x, SideBranch, WeightDecay};
pub use pyramid::{
    FusedTower, PyramidMaps, PyramidOutput, RoadNetPyramid, RoadNetPyramidConfig, SideTowerConfig,
    TowerStage,
};

pub mod prelude {
    pub use super::{
        CasNet, CasNetConfig, CasNetOutput, ModelError, PyramidOutput, RoadNetPyramid,
        RoadNetPyramidConfig, WeightDecay,
    };
}
