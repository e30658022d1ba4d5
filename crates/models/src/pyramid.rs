//! Two-scale multi-branch RoadNet.
//!
//! Every tower is a plain conv/pool stack with a zero-initialised side branch at each
//! depth; the side outputs are fused by a 1x1 convolution. The global tower looks at a
//! downsampled view of the scene, its centre guides the local segmentation tower, and
//! the local segmentation in turn conditions the boundary and skeleton towers.

use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{check_input, ModelError, Result};
use crate::layers::{
    fuse_conv, max_pool_2x2, sum_penalties, upsample_bilinear_2x, ConvSelu, SideBranch,
    WeightDecay,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TowerStage {
    pub channels: usize,
    pub convs: usize,
}

#[derive(Debug, Clone)]
pub struct SideTowerConfig {
    pub in_channels: usize,
    pub stages: Vec<TowerStage>,
}

impl SideTowerConfig {
    /// Five-level local segmentation tower; `extra` adds the third conv in levels 3-5.
    pub fn local(in_channels: usize, extra: bool) -> Self {
        let deep = if extra { 3 } else { 2 };
        Self {
            in_channels,
            stages: vec![
                TowerStage { channels: 64, convs: 2 },
                TowerStage { channels: 128, convs: 2 },
                TowerStage { channels: 256, convs: deep },
                TowerStage { channels: 512, convs: deep },
                TowerStage { channels: 512, convs: deep },
            ],
        }
    }

    /// Four-level tower shared by the global segmentation, boundary and skeleton heads.
    pub fn compact(in_channels: usize) -> Self {
        Self {
            in_channels,
            stages: vec![
                TowerStage { channels: 32, convs: 2 },
                TowerStage { channels: 64, convs: 2 },
                TowerStage { channels: 128, convs: 2 },
                TowerStage { channels: 256, convs: 2 },
            ],
        }
    }

    pub fn branches(&self) -> usize {
        self.stages.len()
    }

    /// Spatial dimensions must be divisible by this factor.
    pub fn stride(&self) -> usize {
        1 << self.stages.len().saturating_sub(1)
    }
}

#[derive(Debug, Module)]
pub struct TowerLevel<B: Backend> {
    convs: Vec<ConvSelu<B>>,
    branch: SideBranch<B>,
}

/// Side-output tower plus fuse layer.
#[derive(Debug, Module)]
pub struct FusedTower<B: Backend> {
    levels: Vec<TowerLevel<B>>,
    pool: MaxPool2d,
    fuse: Conv2d<B>,
    in_channels: usize,
    stride: usize,
}

impl<B: Backend> FusedTower<B> {
    pub fn new(cfg: &SideTowerConfig, device: &B::Device) -> Self {
        let mut channels = cfg.in_channels;
        let mut levels = Vec::with_capacity(cfg.stages.len());
        for (idx, stage) in cfg.stages.iter().enumerate() {
            let mut convs = Vec::with_capacity(stage.convs);
            for _ in 0..stage.convs.max(1) {
                convs.push(ConvSelu::new(channels, stage.channels, device));
                channels = stage.channels;
            }
            let branch = SideBranch::new(stage.channels, 1 << idx, device);
            levels.push(TowerLevel { convs, branch });
        }
        Self {
            levels,
            pool: max_pool_2x2(),
            fuse: fuse_conv(cfg.branches(), device),
            in_channels: cfg.in_channels,
            stride: cfg.stride(),
        }
    }

    /// Side outputs followed by the fused output, each [B, 1, H, W] logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut x = x;
        let mut outputs = Vec::with_capacity(self.levels.len() + 1);
        let last = self.levels.len().saturating_sub(1);
        for (idx, level) in self.levels.iter().enumerate() {
            for conv in &level.convs {
                x = conv.forward(x);
            }
            outputs.push(level.branch.forward(x.clone()));
            if idx < last {
                x = self.pool.forward(x);
            }
        }
        let fused = self.fuse.forward(Tensor::cat(outputs.clone(), 1));
        outputs.push(fused);
        outputs
    }

    pub fn check(&self, dims: [usize; 4]) -> Result<()> {
        check_input(dims, self.in_channels, self.stride, "side tower")
    }
}

/// Tower convolutions and side branches only; the fuse kernel is not decayed.
impl<B: Backend> WeightDecay<B> for FusedTower<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        let device = self.fuse.weight.val().device();
        let levels = self.levels.iter().flat_map(|level| {
            level
                .convs
                .iter()
                .map(|c| c.l2_penalty())
                .chain(std::iter::once(level.branch.l2_penalty()))
        });
        sum_penalties(levels, &device)
    }
}

#[derive(Debug, Clone)]
pub struct RoadNetPyramidConfig {
    pub global: SideTowerConfig,
    pub local: SideTowerConfig,
    pub boundary: SideTowerConfig,
    pub skeleton: SideTowerConfig,
}

impl Default for RoadNetPyramidConfig {
    fn default() -> Self {
        Self {
            global: SideTowerConfig::compact(3),
            local: SideTowerConfig::local(3 + 1, true),
            boundary: SideTowerConfig::compact(3 + 1),
            skeleton: SideTowerConfig::compact(3 + 1),
        }
    }
}

#[derive(Debug, Module)]
pub struct RoadNetPyramid<B: Backend> {
    pub seg_global: FusedTower<B>,
    pub seg_local: FusedTower<B>,
    pub boundary: FusedTower<B>,
    pub skeleton: FusedTower<B>,
}

/// Per-task logits: side branches first, fused output last.
#[derive(Debug, Clone)]
pub struct PyramidOutput<B: Backend> {
    pub seg_global: Vec<Tensor<B, 4>>,
    pub seg_local: Vec<Tensor<B, 4>>,
    pub boundary: Vec<Tensor<B, 4>>,
    pub skeleton: Vec<Tensor<B, 4>>,
}

/// Sigmoid of a fused output, [B, H, W].
pub fn fused_probability<B: Backend>(outputs: &[Tensor<B, 4>]) -> Option<Tensor<B, 3>> {
    let fused = outputs.last()?.clone();
    let [b, _, h, w] = fused.dims();
    Some(sigmoid(fused).reshape([b, h, w]))
}

/// Probability maps of the three exported heads.
#[derive(Debug, Clone)]
pub struct PyramidMaps<B: Backend> {
    pub segment: Tensor<B, 3>,
    pub boundary: Tensor<B, 3>,
    pub skeleton: Tensor<B, 3>,
}

impl<B: Backend> PyramidOutput<B> {
    pub fn maps(&self) -> Option<PyramidMaps<B>> {
        Some(PyramidMaps {
            segment: fused_probability(&self.seg_local)?,
            boundary: fused_probability(&self.boundary)?,
            skeleton: fused_probability(&self.skeleton)?,
        })
    }
}

/// Central half (per side) of a [B, C, H, W] map, upsampled back to [B, C, H, W].
pub fn centre_upsample<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    let centre = x.narrow(2, h / 4, h / 2).narrow(3, w / 4, w / 2);
    upsample_bilinear_2x(centre)
}

impl<B: Backend> RoadNetPyramid<B> {
    pub fn new(cfg: RoadNetPyramidConfig, device: &B::Device) -> Self {
        tracing::debug!(
            global_branches = cfg.global.branches(),
            local_branches = cfg.local.branches(),
            "building RoadNet pyramid"
        );
        Self {
            seg_global: FusedTower::new(&cfg.global, device),
            seg_local: FusedTower::new(&cfg.local, device),
            boundary: FusedTower::new(&cfg.boundary, device),
            skeleton: FusedTower::new(&cfg.skeleton, device),
        }
    }

    /// `image_local`: full-resolution centre crop; `image_global`: the whole scene
    /// resized to the same shape. Both raw RGB [B, 3, H, W].
    pub fn forward(
        &self,
        image_local: Tensor<B, 4>,
        image_global: Tensor<B, 4>,
    ) -> Result<PyramidOutput<B>> {
        let local_dims = image_local.dims();
        let global_dims = image_global.dims();
        if local_dims != global_dims {
            return Err(ModelError::ViewMismatch {
                local: local_dims,
                global: global_dims,
            });
        }
        // The centre slice takes a quarter from each side before the 2x upsampling.
        check_input(global_dims, 3, 4, "pyramid centre crop")?;
        self.seg_global.check(global_dims)?;
        let seg_global = self.seg_global.forward(image_global);
        let guide = seg_global
            .last()
            .map(|fused| centre_upsample(fused.clone()))
            .ok_or(ModelError::EmptyTower)?;

        let local_input = Tensor::cat(vec![image_local.clone(), guide], 1);
        self.seg_local.check(local_input.dims())?;
        let seg_local = self.seg_local.forward(local_input);

        let merged = seg_local
            .last()
            .map(|fused| Tensor::cat(vec![image_local, fused.clone()], 1))
            .ok_or(ModelError::EmptyTower)?;
        self.boundary.check(merged.dims())?;
        let boundary = self.boundary.forward(merged.clone());
        let skeleton = self.skeleton.forward(merged);

        Ok(PyramidOutput {
            seg_global,
            seg_local,
            boundary,
            skeleton,
        })
    }
}
