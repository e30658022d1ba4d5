//! Image augmentation and transformation pipeline.
//!
//! Shape augmentors (crops, flips) move image and labels together; photometric
//! augmentors (brightness, contrast) touch the image only.

use crate::types::{DatasetResult, LabelMap, PyramidSample, RoadDatasetError, RoadSample};
use image::imageops::{self, FilterType};
use image::Rgb32FImage;
use rand::{Rng, SeedableRng};

/// Additive brightness shift drawn from `U(-delta, delta)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brightness {
    pub delta: f32,
    /// Clamp the result to `0..=255`.
    pub clip: bool,
}

impl Brightness {
    pub fn apply(&self, img: &mut Rgb32FImage, rng: &mut dyn rand::RngCore) {
        if self.delta <= 0.0 {
            return;
        }
        let shift = rng.random_range(-self.delta..self.delta);
        for v in img.iter_mut() {
            *v += shift;
            if self.clip {
                *v = v.clamp(0.0, 255.0);
            }
        }
    }
}

/// Per-channel contrast scaling around the channel mean, factor drawn from `range`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contrast {
    pub range: (f32, f32),
    pub clip: bool,
}

impl Contrast {
    pub fn apply(&self, img: &mut Rgb32FImage, rng: &mut dyn rand::RngCore) {
        let (lo, hi) = self.range;
        let factor = if hi > lo {
            rng.random_range(lo..hi)
        } else {
            lo
        };
        let count = (img.width() * img.height()).max(1) as f32;
        let mut mean = [0.0f32; 3];
        for pixel in img.pixels() {
            for c in 0..3 {
                mean[c] += pixel[c];
            }
        }
        for m in mean.iter_mut() {
            *m /= count;
        }
        for pixel in img.pixels_mut() {
            for c in 0..3 {
                let mut v = (pixel[c] - mean[c]) * factor + mean[c];
                if self.clip {
                    v = v.clamp(0.0, 255.0);
                }
                pixel[c] = v;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Randomly crop each side down to a multiple of this value (training).
    pub crop_multiple: Option<u32>,
    /// Deterministic centre crop (width, height), applied after `crop_multiple` (evaluation).
    pub center_crop: Option<(u32, u32)>,
    /// Probability of a joint horizontal flip.
    pub flip_horizontal_prob: f32,
    pub brightness: Option<Brightness>,
    pub contrast: Option<Contrast>,
    /// Labels at or above this value become 1, others 0.
    pub label_threshold: f32,
    /// Shuffle samples before each pass.
    pub shuffle: bool,
    /// Cycle over the split forever, reshuffling on each pass.
    pub repeat: bool,
    /// Seed for reproducible shuffling and augmentation.
    pub seed: Option<u64>,
    /// Fail indexing when a boundary label is missing.
    pub require_boundary: bool,
    /// Optional transform pipeline override; if None, built from other fields.
    pub transform: Option<TransformPipeline>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::casnet_train()
    }
}

impl DatasetConfig {
    /// Cascaded network training: crop to multiples of 16, flip, brightness, contrast 0.4..1.5.
    pub fn casnet_train() -> Self {
        Self {
            crop_multiple: Some(16),
            center_crop: None,
            flip_horizontal_prob: 0.5,
            brightness: Some(Brightness {
                delta: 63.0,
                clip: false,
            }),
            contrast: Some(Contrast {
                range: (0.4, 1.5),
                clip: true,
            }),
            label_threshold: 0.5,
            shuffle: true,
            repeat: true,
            seed: None,
            require_boundary: false,
            transform: None,
        }
    }

    /// Pyramid training. Full scenes are cropped to multiples of 32 so that both the
    /// centre crop and the half-resolution view stay divisible by 16.
    pub fn pyramid_train() -> Self {
        Self {
            crop_multiple: Some(32),
            contrast: Some(Contrast {
                range: (0.5, 1.5),
                clip: true,
            }),
            require_boundary: true,
            ..Self::casnet_train()
        }
    }

    /// Evaluation: deterministic centre crop, no augmentation, single pass.
    pub fn eval(center_crop: (u32, u32)) -> Self {
        Self {
            crop_multiple: None,
            center_crop: Some(center_crop),
            flip_horizontal_prob: 0.0,
            brightness: None,
            contrast: None,
            label_threshold: 0.5,
            shuffle: false,
            repeat: false,
            seed: None,
            require_boundary: false,
            transform: None,
        }
    }

    pub fn pipeline(&self) -> TransformPipeline {
        self.transform
            .clone()
            .unwrap_or_else(|| TransformPipeline::from_config(self))
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub crop_multiple: Option<u32>,
    pub center_crop: Option<(u32, u32)>,
    pub flip_horizontal_prob: f32,
    pub brightness: Option<Brightness>,
    pub contrast: Option<Contrast>,
    pub label_threshold: f32,
    pub seed: Option<u64>,
}

impl TransformPipeline {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            crop_multiple: cfg.crop_multiple,
            center_crop: cfg.center_crop,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            brightness: cfg.brightness,
            contrast: cfg.contrast,
            label_threshold: cfg.label_threshold,
            seed: cfg.seed,
        }
    }

    pub fn describe(&self) -> String {
        let opt = |v: Option<String>| v.unwrap_or_else(|| "none".to_string());
        format!(
            "crop_multiple={} center_crop={} flip_p={:.2} brightness={} contrast={} threshold={:.2} seed={}",
            opt(self.crop_multiple.map(|m| m.to_string())),
            opt(self.center_crop.map(|(w, h)| format!("{w}x{h}"))),
            self.flip_horizontal_prob,
            opt(self.brightness.map(|b| format!("+-{:.0} clip={}", b.delta, b.clip))),
            opt(self
                .contrast
                .map(|c| format!("[{:.2},{:.2}] clip={}", c.range.0, c.range.1, c.clip))),
            self.label_threshold,
            opt(self.seed.map(|s| s.to_string())),
        )
    }

    /// Augment one decoded sample. `sample_id` and `pass` select the seeded stream.
    pub fn apply(&self, sample: RoadSample, sample_id: u64, pass: u64) -> DatasetResult<RoadSample> {
        let mut seeded_rng;
        let mut rng_local;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ sample_id ^ (pass << 32));
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let mut sample = sample;
        if let Some(multiple) = self.crop_multiple {
            sample = crop_multiple(sample, multiple, rng)?;
        }
        if let Some((w, h)) = self.center_crop {
            sample = center_crop(sample, w, h)?;
        }
        maybe_hflip(&mut sample, self.flip_horizontal_prob, rng);
        for label in sample.labels_mut() {
            threshold_label(label, self.label_threshold);
        }
        if let Some(brightness) = self.brightness {
            brightness.apply(&mut sample.image, rng);
        }
        if let Some(contrast) = self.contrast {
            contrast.apply(&mut sample.image, rng);
        }
        Ok(sample)
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    /// Starts from a no-op pipeline (threshold 0.5 only).
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline {
                crop_multiple: None,
                center_crop: None,
                flip_horizontal_prob: 0.0,
                brightness: None,
                contrast: None,
                label_threshold: 0.5,
                seed: None,
            },
        }
    }
    pub fn crop_multiple(mut self, multiple: Option<u32>) -> Self {
        self.inner.crop_multiple = multiple;
        self
    }
    pub fn center_crop(mut self, size: Option<(u32, u32)>) -> Self {
        self.inner.center_crop = size;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn brightness(mut self, delta: f32, clip: bool) -> Self {
        self.inner.brightness = Some(Brightness { delta, clip });
        self
    }
    pub fn contrast(mut self, range: (f32, f32), clip: bool) -> Self {
        self.inner.contrast = Some(Contrast { range, clip });
        self
    }
    pub fn label_threshold(mut self, threshold: f32) -> Self {
        self.inner.label_threshold = threshold;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

fn crop_all(sample: RoadSample, x: u32, y: u32, w: u32, h: u32) -> RoadSample {
    let crop_label = |l: &LabelMap| imageops::crop_imm(l, x, y, w, h).to_image();
    RoadSample {
        stem: sample.stem,
        image: imageops::crop_imm(&sample.image, x, y, w, h).to_image(),
        segment: crop_label(&sample.segment),
        skeleton: crop_label(&sample.skeleton),
        boundary: sample.boundary.as_ref().map(crop_label),
    }
}

/// Random crop of each side down to a multiple of `multiple`.
pub fn crop_multiple(
    sample: RoadSample,
    multiple: u32,
    rng: &mut dyn rand::RngCore,
) -> DatasetResult<RoadSample> {
    let multiple = multiple.max(1);
    let (width, height) = (sample.width(), sample.height());
    let new_w = width / multiple * multiple;
    let new_h = height / multiple * multiple;
    if new_w == 0 || new_h == 0 {
        return Err(RoadDatasetError::TooSmall {
            width,
            height,
            min_width: multiple,
            min_height: multiple,
        });
    }
    let y0 = random_offset(height - new_h, rng);
    let x0 = random_offset(width - new_w, rng);
    if new_w == width && new_h == height {
        return Ok(sample);
    }
    Ok(crop_all(sample, x0, y0, new_w, new_h))
}

fn random_offset(diff: u32, rng: &mut dyn rand::RngCore) -> u32 {
    if diff == 0 {
        0
    } else {
        rng.random_range(0..diff)
    }
}

/// Deterministic centre crop to `(w, h)`.
pub fn center_crop(sample: RoadSample, w: u32, h: u32) -> DatasetResult<RoadSample> {
    let (width, height) = (sample.width(), sample.height());
    if width < w || height < h {
        return Err(RoadDatasetError::TooSmall {
            width,
            height,
            min_width: w,
            min_height: h,
        });
    }
    if width == w && height == h {
        return Ok(sample);
    }
    Ok(crop_all(sample, (width - w) / 2, (height - h) / 2, w, h))
}

pub(crate) fn maybe_hflip(sample: &mut RoadSample, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        imageops::flip_horizontal_in_place(&mut sample.image);
        for label in sample.labels_mut() {
            imageops::flip_horizontal_in_place(label);
        }
    }
}

pub fn threshold_label(label: &mut LabelMap, threshold: f32) {
    for v in label.iter_mut() {
        *v = if *v >= threshold { 1.0 } else { 0.0 };
    }
}

/// Split a full scene of size `(2W, 2H)` into the local view (centre crop `(W, H)`
/// at offset `(W/2, H/2)`) and the global view (whole scene resized to `(W, H)`).
pub fn pyramid_views(sample: RoadSample) -> DatasetResult<PyramidSample> {
    let (width, height) = (sample.width(), sample.height());
    let (w, h) = (width / 2, height / 2);
    if w == 0 || h == 0 {
        return Err(RoadDatasetError::TooSmall {
            width,
            height,
            min_width: 2,
            min_height: 2,
        });
    }
    let image_global = imageops::resize(&sample.image, w, h, FilterType::Triangle);
    let segment_global = imageops::resize(&sample.segment, w, h, FilterType::Nearest);
    let local = crop_all(sample, w / 2, h / 2, w, h);
    Ok(PyramidSample {
        local,
        image_global,
        segment_global,
    })
}
