//! Cascaded encoder/decoder network (CasNet).
//!
//! A segmentation encoder/decoder produces two-class logits; a second, shallower
//! encoder/decoder predicts the road centerline from the image concatenated with
//! those logits.

use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{check_input, Result};
use crate::layers::{
    head_conv, kernel_l2, max_pool_2x2, sum_penalties, ConvBnRelu, DeconvBnRelu, WeightDecay,
};

/// One resolution level: `convs` 3x3 convolutions producing `channels` feature maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub channels: usize,
    pub convs: usize,
}

impl StageSpec {
    pub const fn new(channels: usize, convs: usize) -> Self {
        Self { channels, convs }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderDecoderConfig {
    pub in_channels: usize,
    pub stages: Vec<StageSpec>,
    pub out_channels: usize,
}

impl EncoderDecoderConfig {
    /// Four-level segmentation network on RGB input.
    pub fn segment() -> Self {
        Self {
            in_channels: 3,
            stages: vec![
                StageSpec::new(32, 2),
                StageSpec::new(64, 2),
                StageSpec::new(128, 3),
                StageSpec::new(256, 3),
            ],
            out_channels: 2,
        }
    }

    /// Three-level centerline network on RGB + segmentation logits.
    pub fn skeleton() -> Self {
        Self {
            in_channels: 3 + 2,
            stages: vec![
                StageSpec::new(32, 2),
                StageSpec::new(64, 2),
                StageSpec::new(128, 3),
            ],
            out_channels: 2,
        }
    }

    /// Spatial dimensions must be divisible by this factor.
    pub fn stride(&self) -> usize {
        1 << self.stages.len()
    }
}

#[derive(Debug, Module)]
pub struct DecoderStage<B: Backend> {
    upsample: DeconvBnRelu<B>,
    convs: Vec<ConvBnRelu<B>>,
}

#[derive(Debug, Module)]
pub struct EncoderDecoder<B: Backend> {
    encoder: Vec<Vec<ConvBnRelu<B>>>,
    decoder: Vec<DecoderStage<B>>,
    pool: MaxPool2d,
    head: Conv2d<B>,
    in_channels: usize,
    stride: usize,
}

impl<B: Backend> EncoderDecoder<B> {
    pub fn new(cfg: &EncoderDecoderConfig, device: &B::Device) -> Self {
        let mut encoder = Vec::with_capacity(cfg.stages.len());
        let mut channels = cfg.in_channels;
        for stage in &cfg.stages {
            let mut convs = Vec::with_capacity(stage.convs);
            for _ in 0..stage.convs.max(1) {
                convs.push(ConvBnRelu::new(channels, stage.channels, device));
                channels = stage.channels;
            }
            encoder.push(convs);
        }

        // Decoder walks back up; each level ends on the channel count of the level above it.
        let mut decoder = Vec::with_capacity(cfg.stages.len());
        for (idx, stage) in cfg.stages.iter().enumerate().rev() {
            let target = if idx == 0 {
                stage.channels
            } else {
                cfg.stages[idx - 1].channels
            };
            let upsample = DeconvBnRelu::new(channels, stage.channels, device);
            let mut convs = Vec::with_capacity(stage.convs);
            for _ in 1..stage.convs.max(1) {
                convs.push(ConvBnRelu::new(stage.channels, stage.channels, device));
            }
            convs.push(ConvBnRelu::new(stage.channels, target, device));
            channels = target;
            decoder.push(DecoderStage { upsample, convs });
        }

        Self {
            encoder,
            decoder,
            pool: max_pool_2x2(),
            head: head_conv(channels, cfg.out_channels, device),
            in_channels: cfg.in_channels,
            stride: cfg.stride(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for stage in &self.encoder {
            for conv in stage {
                x = conv.forward(x);
            }
            x = self.pool.forward(x);
        }
        for stage in &self.decoder {
            x = stage.upsample.forward(x);
            for conv in &stage.convs {
                x = conv.forward(x);
            }
        }
        self.head.forward(x)
    }

    pub fn check(&self, dims: [usize; 4]) -> Result<()> {
        check_input(dims, self.in_channels, self.stride, "encoder/decoder")
    }
}

impl<B: Backend> WeightDecay<B> for EncoderDecoder<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        let device = self.head.weight.val().device();
        let encoder = self.encoder.iter().flatten().map(|c| c.l2_penalty());
        let decoder = self.decoder.iter().flat_map(|stage| {
            std::iter::once(stage.upsample.l2_penalty())
                .chain(stage.convs.iter().map(|c| c.l2_penalty()))
        });
        let head = std::iter::once(kernel_l2(self.head.weight.val()));
        sum_penalties(encoder.chain(decoder).chain(head), &device)
    }
}

#[derive(Debug, Clone)]
pub struct CasNetConfig {
    pub segment: EncoderDecoderConfig,
    pub skeleton: EncoderDecoderConfig,
}

impl Default for CasNetConfig {
    fn default() -> Self {
        Self {
            segment: EncoderDecoderConfig::segment(),
            skeleton: EncoderDecoderConfig::skeleton(),
        }
    }
}

#[derive(Debug, Module)]
pub struct CasNet<B: Backend> {
    pub segment: EncoderDecoder<B>,
    pub skeleton: EncoderDecoder<B>,
}

/// Raw two-class logits, shape [B, 2, H, W] each.
#[derive(Debug, Clone)]
pub struct CasNetOutput<B: Backend> {
    pub segment: Tensor<B, 4>,
    pub skeleton: Tensor<B, 4>,
}

impl<B: Backend> CasNetOutput<B> {
    /// Softmax over the class dimension.
    pub fn probabilities(&self) -> CasNetOutput<B> {
        CasNetOutput {
            segment: softmax(self.segment.clone(), 1),
            skeleton: softmax(self.skeleton.clone(), 1),
        }
    }

    /// Road-class probability maps, shape [B, H, W].
    pub fn road_maps(&self) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let probs = self.probabilities();
        (road_channel(probs.segment), road_channel(probs.skeleton))
    }
}

fn road_channel<B: Backend>(probs: Tensor<B, 4>) -> Tensor<B, 3> {
    let [b, _, h, w] = probs.dims();
    probs.narrow(1, 1, 1).reshape([b, h, w])
}

impl<B: Backend> CasNet<B> {
    pub fn new(cfg: CasNetConfig, device: &B::Device) -> Self {
        tracing::debug!(
            segment_stages = cfg.segment.stages.len(),
            skeleton_stages = cfg.skeleton.stages.len(),
            "building CasNet"
        );
        Self {
            segment: EncoderDecoder::new(&cfg.segment, device),
            skeleton: EncoderDecoder::new(&cfg.skeleton, device),
        }
    }

    /// Input: raw RGB in [B, 3, H, W] with H and W divisible by 16.
    pub fn forward(&self, image: Tensor<B, 4>) -> Result<CasNetOutput<B>> {
        self.segment.check(image.dims())?;
        let segment = self.segment.forward(image.clone());
        let merged = Tensor::cat(vec![image, segment.clone()], 1);
        self.skeleton.check(merged.dims())?;
        let skeleton = self.skeleton.forward(merged);
        Ok(CasNetOutput { segment, skeleton })
    }
}
