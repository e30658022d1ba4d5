//! Building blocks shared by the cascaded and pyramid networks.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

const SELU_LAMBDA: f32 = 1.050_700_987_355_480_5;
const SELU_ALPHA: f32 = 1.673_263_242_354_377_2;

/// Modules that contribute an L2 penalty over their convolution kernels.
///
/// The penalty is `sum(w^2) / 2`; biases and normalization parameters are excluded.
pub trait WeightDecay<B: Backend> {
    fn l2_penalty(&self) -> Tensor<B, 1>;
}

pub(crate) fn kernel_l2<B: Backend, const D: usize>(weight: Tensor<B, D>) -> Tensor<B, 1> {
    weight.powf_scalar(2.0).sum().div_scalar(2.0)
}

pub(crate) fn sum_penalties<B: Backend>(
    penalties: impl IntoIterator<Item = Tensor<B, 1>>,
    device: &B::Device,
) -> Tensor<B, 1> {
    penalties
        .into_iter()
        .fold(Tensor::zeros([1], device), |acc, p| acc + p)
}

pub fn selu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let positive = x.clone().clamp_min(0.0);
    let negative = x.clamp_max(0.0).exp().sub_scalar(1.0).mul_scalar(SELU_ALPHA);
    (positive + negative).mul_scalar(SELU_LAMBDA)
}

/// 2x bilinear upsampling with replicated borders.
///
/// Matches a stride-2 transposed convolution with the separable kernel
/// `[0.25, 0.75, 0.75, 0.25]`: `out[2i] = 0.75 x[i] + 0.25 x[i-1]` and
/// `out[2i+1] = 0.75 x[i] + 0.25 x[i+1]`, indices clamped to the input.
pub fn upsample_bilinear_2x<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let x = upsample_axis(x, 2);
    upsample_axis(x, 3)
}

fn upsample_axis<B: Backend>(x: Tensor<B, 4>, axis: usize) -> Tensor<B, 4> {
    let dims = x.dims();
    let n = dims[axis];
    let (prev, next) = if n == 1 {
        (x.clone(), x.clone())
    } else {
        let first = x.clone().narrow(axis, 0, 1);
        let last = x.clone().narrow(axis, n - 1, 1);
        let prev = Tensor::cat(vec![first, x.clone().narrow(axis, 0, n - 1)], axis);
        let next = Tensor::cat(vec![x.clone().narrow(axis, 1, n - 1), last], axis);
        (prev, next)
    };
    let centre = x.mul_scalar(0.75);
    let even = centre.clone() + prev.mul_scalar(0.25);
    let odd = centre + next.mul_scalar(0.25);

    // Interleave even/odd samples along `axis`.
    let stacked: Tensor<B, 5> = Tensor::stack(vec![even, odd], axis + 1);
    let mut out_dims = dims;
    out_dims[axis] = n * 2;
    stacked.reshape(out_dims)
}

pub(crate) fn max_pool_2x2() -> MaxPool2d {
    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()
}

/// 3x3 conv (same padding) -> BatchNorm -> ReLU.
#[derive(Debug, Module)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let norm = BatchNormConfig::new(out_channels).init(device);
        Self { conv, norm }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.conv.forward(x)))
    }
}

impl<B: Backend> WeightDecay<B> for ConvBnRelu<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        kernel_l2(self.conv.weight.val())
    }
}

/// 2x2 stride-2 transposed conv -> BatchNorm -> ReLU.
#[derive(Debug, Module)]
pub struct DeconvBnRelu<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> DeconvBnRelu<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let deconv = ConvTranspose2dConfig::new([in_channels, out_channels], [2, 2])
            .with_stride([2, 2])
            .init(device);
        let norm = BatchNormConfig::new(out_channels).init(device);
        Self { deconv, norm }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.deconv.forward(x)))
    }
}

impl<B: Backend> WeightDecay<B> for DeconvBnRelu<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        kernel_l2(self.deconv.weight.val())
    }
}

/// 3x3 conv (same padding) followed by SELU.
#[derive(Debug, Module)]
pub struct ConvSelu<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> ConvSelu<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        Self { conv }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        selu(self.conv.forward(x))
    }
}

impl<B: Backend> WeightDecay<B> for ConvSelu<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        kernel_l2(self.conv.weight.val())
    }
}

/// Plain 3x3 conv with identity activation (prediction heads).
pub(crate) fn head_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

/// Side output: 1x1 conv to a single logit map, upsampled back to input resolution.
#[derive(Debug, Module)]
pub struct SideBranch<B: Backend> {
    score: Conv2d<B>,
    /// Number of 2x upsamplings (log2 of the stage stride).
    doublings: usize,
}

impl<B: Backend> SideBranch<B> {
    /// `up` is the stride of the feature map relative to the input; must be a power of two.
    pub fn new(in_channels: usize, up: usize, device: &B::Device) -> Self {
        let score = Conv2dConfig::new([in_channels, 1], [1, 1])
            .with_bias(true)
            .with_initializer(Initializer::Constant { value: 0.0 })
            .init(device);
        Self {
            score,
            doublings: up.max(1).trailing_zeros() as usize,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = self.score.forward(x);
        for _ in 0..self.doublings {
            out = upsample_bilinear_2x(out);
        }
        out
    }
}

impl<B: Backend> WeightDecay<B> for SideBranch<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        kernel_l2(self.score.weight.val())
    }
}

/// 1x1 conv without bias that fuses `branches` side outputs into one logit map.
pub(crate) fn fuse_conv<B: Backend>(branches: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([branches, 1], [1, 1])
        .with_bias(false)
        .with_initializer(Initializer::Constant {
            value: 1.0 / branches.max(1) as f64,
        })
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn upsample_interpolates_with_clamped_edges() {
        let device = Default::default();
        let x = Tensor::<B, 4>::from_data(TensorData::new(vec![1.0f32, 2.0], [1, 1, 1, 2]), &device);
        let out = upsample_bilinear_2x(x);
        assert_eq!(out.dims(), [1, 1, 2, 4]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        let expected = [1.0, 1.25, 1.75, 2.0, 1.0, 1.25, 1.75, 2.0];
        for (v, e) in values.iter().zip(expected.iter()) {
            assert!((v - e).abs() < 1e-6, "{values:?}");
        }
    }

    #[test]
    fn selu_is_identity_scaled_for_positive_inputs() {
        let device = Default::default();
        let x = Tensor::<B, 1>::from_floats([0.0, 2.0, -50.0], &device);
        let y = selu(x).into_data().to_vec::<f32>().unwrap();
        assert!(y[0].abs() < 1e-6);
        assert!((y[1] - 2.0 * SELU_LAMBDA).abs() < 1e-5);
        assert!((y[2] + SELU_LAMBDA * SELU_ALPHA).abs() < 1e-4);
    }

    #[test]
    fn side_branch_starts_at_zero_and_restores_resolution() {
        let device = Default::default();
        let branch = SideBranch::<B>::new(8, 4, &device);
        let out = branch.forward(Tensor::ones([1, 8, 3, 5], &device));
        assert_eq!(out.dims(), [1, 1, 12, 20]);
        let max = out.abs().max().into_data().to_vec::<f32>().unwrap()[0];
        assert_eq!(max, 0.0);
    }
}
