//! Per-task losses and the weight-decay schedule.

use burn::tensor::activation::{log_softmax, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Softmax cross-entropy where each pixel is weighted by its class weight.
///
/// Returns `sum(w * ce) / count(w > 0)`, or zero when no pixel carries weight.
/// `logits`: [B, C, H, W]; `labels`: [B, H, W] class indices stored as floats.
pub fn weighted_softmax_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    labels: Tensor<B, 3>,
    class_weights: &[f32],
) -> Tensor<B, 1> {
    let [b, c, h, w] = logits.dims();
    let device = logits.device();
    let onehot = one_hot(labels, c);
    let ce = (log_softmax(logits, 1) * onehot.clone())
        .sum_dim(1)
        .neg()
        .reshape([b, h, w]);

    let weights: Vec<f32> = (0..c)
        .map(|k| class_weights.get(k).copied().unwrap_or(1.0))
        .collect();
    let weight_map = (onehot
        * Tensor::<B, 1>::from_floats(weights.as_slice(), &device).reshape([1, c, 1, 1]))
    .sum_dim(1)
    .reshape([b, h, w]);

    let nonzero = weight_map.clone().greater_elem(0.0).float().sum();
    let total = (weight_map * ce).sum();
    // Clamping the denominator leaves the zero-weight case at 0 / 1 = 0.
    total / nonzero.clamp_min(1.0)
}

fn one_hot<B: Backend>(labels: Tensor<B, 3>, classes: usize) -> Tensor<B, 4> {
    let [b, h, w] = labels.dims();
    let device = labels.device();
    let ids = Tensor::<B, 1, Int>::arange(0..classes as i64, &device)
        .float()
        .reshape([1, classes, 1, 1]);
    labels
        .reshape([b, 1, h, w])
        .repeat_dim(1, classes)
        .equal(ids.expand([b, classes, h, w]))
        .float()
}

/// Class-balanced sigmoid cross-entropy over single-logit maps.
///
/// With `beta = neg / (neg + pos)` the positive term is weighted by
/// `beta / (1 - beta)` and the mean is scaled by `1 - beta`. A label without
/// positive pixels yields zero.
pub fn class_balanced_sigmoid_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    labels: Tensor<B, 3>,
) -> Tensor<B, 1> {
    let [b, _, h, w] = logits.dims();
    let x = logits.reshape([b, h, w]);
    let total = (b * h * w) as f32;
    let pos = scalar(labels.clone().sum());
    if pos <= 0.0 || total <= 0.0 {
        return Tensor::zeros([1], &x.device());
    }
    let neg = total - pos;
    let beta = neg / total;
    let pos_weight = beta / (1.0 - beta);

    // (1 - z) x + (1 + (q - 1) z) (log1p(exp(-|x|)) + max(-x, 0))
    let softplus_neg = x.clone().abs().neg().exp().log1p() + x.clone().neg().clamp_min(0.0);
    let l = labels.clone().mul_scalar(pos_weight - 1.0).add_scalar(1.0);
    let ce = labels.neg().add_scalar(1.0) * x + l * softplus_neg;
    ce.mean().mul_scalar(1.0 - beta)
}

/// `mean((sigmoid(fused) - labels)^2)`.
pub fn fused_mse<B: Backend>(fused_logits: Tensor<B, 4>, labels: Tensor<B, 3>) -> Tensor<B, 1> {
    let [b, _, h, w] = fused_logits.dims();
    let diff = sigmoid(fused_logits).reshape([b, h, w]) - labels;
    diff.powf_scalar(2.0).mean()
}

/// One balanced cross-entropy per output (branches then fused) plus the fused MSE.
pub fn side_branch_losses<B: Backend>(
    outputs: &[Tensor<B, 4>],
    labels: Tensor<B, 3>,
) -> Vec<Tensor<B, 1>> {
    let mut costs: Vec<Tensor<B, 1>> = outputs
        .iter()
        .map(|o| class_balanced_sigmoid_cross_entropy(o.clone(), labels.clone()))
        .collect();
    if let Some(fused) = outputs.last() {
        costs.push(fused_mse(fused.clone(), labels));
    }
    costs
}

/// `base * rate^(step / decay_steps)`, with integer division when `staircase`.
pub fn exponential_decay(
    base: f64,
    step: usize,
    decay_steps: usize,
    rate: f64,
    staircase: bool,
) -> f64 {
    let decay_steps = decay_steps.max(1);
    let exponent = if staircase {
        (step / decay_steps) as f64
    } else {
        step as f64 / decay_steps as f64
    };
    base * rate.powf(exponent)
}

/// Staircase decay of the L2 weight-decay multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightDecaySchedule {
    pub base: f64,
    pub decay_steps: usize,
    pub rate: f64,
}

impl WeightDecaySchedule {
    pub fn casnet() -> Self {
        Self {
            base: 2e-4,
            decay_steps: 10_000,
            rate: 0.9,
        }
    }

    pub fn pyramid() -> Self {
        Self {
            base: 2e-4,
            decay_steps: 80_000,
            rate: 0.7,
        }
    }

    pub fn at(&self, step: usize) -> f64 {
        exponential_decay(self.base, step, self.decay_steps, self.rate, true)
    }
}

/// Sum of loss terms; zero for an empty list.
pub fn sum_costs<B: Backend>(costs: Vec<Tensor<B, 1>>, device: &B::Device) -> Tensor<B, 1> {
    costs
        .into_iter()
        .reduce(|acc, c| acc + c)
        .unwrap_or_else(|| Tensor::zeros([1], device))
}

/// First element of a rank-1 tensor as `f32`.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn labels(values: &[f32], h: usize, w: usize) -> Tensor<B, 3> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape([1, h, w])
    }

    fn logits1(values: &[f32], h: usize, w: usize) -> Tensor<B, 4> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape([1, 1, h, w])
    }

    #[test]
    fn softmax_ce_of_uniform_logits_is_ln2() {
        let device = Default::default();
        let logits = Tensor::<B, 4>::zeros([1, 2, 2, 2], &device);
        let loss = weighted_softmax_cross_entropy(logits, labels(&[0.0, 1.0, 1.0, 0.0], 2, 2), &[1.0, 1.0]);
        assert!((scalar(loss) - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn softmax_ce_ignores_zero_weight_class() {
        let device = Default::default();
        // Class 1 strongly predicted everywhere.
        let logits = Tensor::<B, 1>::from_floats([0.0, 0.0, 5.0, 5.0], &device).reshape([1, 2, 1, 2]);
        let weighted = weighted_softmax_cross_entropy(
            logits.clone(),
            labels(&[0.0, 1.0], 1, 2),
            &[0.0, 1.0],
        );
        let expected = (1.0f32 + (-5.0f32).exp()).ln();
        assert!((scalar(weighted) - expected).abs() < 1e-5);

        let none = weighted_softmax_cross_entropy(logits, labels(&[0.0, 0.0], 1, 2), &[0.0, 1.0]);
        assert_eq!(scalar(none), 0.0);
    }

    #[test]
    fn balanced_ce_is_zero_without_positives() {
        let loss = class_balanced_sigmoid_cross_entropy(
            logits1(&[1.0, -2.0, 3.0, 0.5], 2, 2),
            labels(&[0.0; 4], 2, 2),
        );
        assert_eq!(scalar(loss), 0.0);
    }

    #[test]
    fn balanced_ce_matches_closed_form() {
        // One positive of four: beta = 0.75, pos_weight = 3.
        let loss = class_balanced_sigmoid_cross_entropy(
            logits1(&[0.0; 4], 2, 2),
            labels(&[1.0, 0.0, 0.0, 0.0], 2, 2),
        );
        let ln2 = std::f32::consts::LN_2;
        let expected = (3.0 * ln2 + 3.0 * ln2) / 4.0 * 0.25;
        assert!((scalar(loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn balanced_ce_is_stable_for_large_logits() {
        let loss = class_balanced_sigmoid_cross_entropy(
            logits1(&[200.0, -200.0], 1, 2),
            labels(&[1.0, 0.0], 1, 2),
        );
        let v = scalar(loss);
        assert!(v.is_finite());
        assert!(v.abs() < 1e-4);
    }

    #[test]
    fn fused_mse_of_zero_logits() {
        let loss = fused_mse(logits1(&[0.0, 0.0], 1, 2), labels(&[1.0, 0.0], 1, 2));
        assert!((scalar(loss) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn side_branch_losses_add_mse_term() {
        let outputs = vec![logits1(&[0.0; 4], 2, 2); 3];
        let costs = side_branch_losses(&outputs, labels(&[1.0, 0.0, 0.0, 0.0], 2, 2));
        assert_eq!(costs.len(), 4);
    }

    #[test]
    fn weight_decay_steps_down() {
        let wd = WeightDecaySchedule::casnet();
        assert!((wd.at(0) - 2e-4).abs() < 1e-12);
        assert!((wd.at(9_999) - 2e-4).abs() < 1e-12);
        assert!((wd.at(10_000) - 1.8e-4).abs() < 1e-12);
        let pyr = WeightDecaySchedule::pyramid();
        assert!((pyr.at(160_000) - 2e-4 * 0.49).abs() < 1e-12);
        assert!((exponential_decay(1.0, 5, 10, 0.5, false) - 0.5f64.sqrt()).abs() < 1e-12);
    }
}
