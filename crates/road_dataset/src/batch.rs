//! Batch iteration for training and evaluation.

use crate::aug::{pyramid_views, DatasetConfig, TransformPipeline};
use crate::index::{index_split, load_sample};
use crate::types::{
    image_to_chw, DatasetResult, LabelMap, PyramidSample, RoadDatasetError, RoadSample,
    SampleIndex, Split,
};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

/// Image and label tensors: `images` [B, 3, H, W], labels [B, H, W] in {0, 1}.
#[derive(Debug, Clone)]
pub struct RoadBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub segment: Tensor<B, 3>,
    pub skeleton: Tensor<B, 3>,
    /// Present only when every sample in the batch carries a boundary label.
    pub boundary: Option<Tensor<B, 3>>,
}

#[derive(Debug, Clone)]
pub struct PyramidBatch<B: Backend> {
    pub image_local: Tensor<B, 4>,
    pub image_global: Tensor<B, 4>,
    pub segment_local: Tensor<B, 3>,
    pub segment_global: Tensor<B, 3>,
    pub boundary: Tensor<B, 3>,
    pub skeleton: Tensor<B, 3>,
}

pub struct BatchIter {
    indices: Vec<SampleIndex>,
    cursor: usize,
    pass: u64,
    cfg: DatasetConfig,
    pipeline: TransformPipeline,
    rng: rand::rngs::StdRng,
    permissive_errors: bool,
    consecutive_failures: usize,
    processed_samples: usize,
    processed_batches: usize,
    skipped_errors: usize,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl BatchIter {
    pub fn from_split(root: &Path, split: Split, cfg: DatasetConfig) -> DatasetResult<Self> {
        let indices = index_split(root, split, cfg.require_boundary)?;
        tracing::info!(
            root = %root.display(),
            split = %split,
            samples = indices.len(),
            "indexed dataset split"
        );
        Self::from_indices(indices, cfg)
    }

    pub fn from_indices(indices: Vec<SampleIndex>, cfg: DatasetConfig) -> DatasetResult<Self> {
        let seed = cfg.seed.or_else(|| {
            std::env::var("ROAD_DATASET_SEED")
                .ok()
                .and_then(|v| v.trim().parse().ok())
        });
        let cfg = DatasetConfig { seed, ..cfg };
        let rng = match seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        let log_every_samples = match std::env::var("ROAD_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.trim().parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let permissive_errors = std::env::var("ROAD_DATASET_PERMISSIVE")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .map(|v| !(v == "0" || v == "false" || v == "off"))
            .unwrap_or(true);
        let mut pipeline = cfg.pipeline();
        // An explicit transform override without its own seed follows the iterator seed.
        pipeline.seed = pipeline.seed.or(seed);
        tracing::debug!(pipeline = %pipeline.describe(), "dataset transform pipeline");
        let mut iter = Self {
            indices,
            cursor: 0,
            pass: 0,
            cfg,
            pipeline,
            rng,
            permissive_errors,
            consecutive_failures: 0,
            processed_samples: 0,
            processed_batches: 0,
            skipped_errors: 0,
            started: Instant::now(),
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
            log_every_samples,
        };
        iter.shuffle();
        Ok(iter)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Completed passes over the split.
    pub fn passes(&self) -> u64 {
        self.pass
    }

    /// Skip unreadable samples with a warning (`true`) or return their error.
    /// Defaults to `ROAD_DATASET_PERMISSIVE`, on unless set to `0`, `false` or `off`.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive_errors = permissive;
        self
    }

    /// Samples dropped so far because they failed to load.
    pub fn skipped_errors(&self) -> usize {
        self.skipped_errors
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    fn shuffle(&mut self) {
        if self.cfg.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    /// Load and augment up to `batch_size` samples; `None` once a non-repeating
    /// iterator is exhausted.
    pub fn next_samples(&mut self, batch_size: usize) -> DatasetResult<Option<Vec<RoadSample>>> {
        let batch_size = batch_size.max(1);
        loop {
            if self.indices.is_empty() {
                return Ok(None);
            }
            if self.cursor >= self.indices.len() {
                if !self.cfg.repeat {
                    return Ok(None);
                }
                self.cursor = 0;
                self.pass += 1;
                self.shuffle();
                tracing::debug!(pass = self.pass, "restarting dataset pass");
            }
            let end = (self.cursor + batch_size).min(self.indices.len());
            let slice = &self.indices[self.cursor..end];
            self.cursor = end;

            let t_load = Instant::now();
            let pass = self.pass;
            let pipeline = &self.pipeline;
            let loaded: Vec<_> = slice
                .par_iter()
                .map(|idx| (idx, load_sample(idx, pipeline, pass)))
                .collect();
            self.total_load_time += t_load.elapsed();

            let mut samples = Vec::with_capacity(loaded.len());
            for (idx, res) in loaded {
                match res {
                    Ok(sample) => samples.push(sample),
                    Err(e) if self.permissive_errors => {
                        tracing::warn!(image = %idx.image.display(), "skipping sample: {e}");
                        self.skipped_errors += 1;
                        self.consecutive_failures += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            if samples.is_empty() {
                if self.consecutive_failures >= self.indices.len() {
                    return Err(RoadDatasetError::Other(format!(
                        "no loadable samples after {} consecutive failures",
                        self.consecutive_failures
                    )));
                }
                continue;
            }
            self.consecutive_failures = 0;
            self.processed_samples += samples.len();
            self.processed_batches += 1;
            self.maybe_log_progress();
            return Ok(Some(samples));
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<RoadBatch<B>>> {
        let Some(samples) = self.next_samples(batch_size)? else {
            return Ok(None);
        };
        road_batch(&samples, device).map(Some)
    }

    pub fn next_pyramid_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<PyramidBatch<B>>> {
        let Some(samples) = self.next_samples(batch_size)? else {
            return Ok(None);
        };
        let views = samples
            .into_iter()
            .map(pyramid_views)
            .collect::<DatasetResult<Vec<_>>>()?;
        pyramid_batch(&views, device).map(Some)
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        if self.processed_samples.saturating_sub(self.last_logged_samples) < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms =
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches.max(1) as f64;
        tracing::info!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            skipped_errors = self.skipped_errors,
            pass = self.pass,
            rate = self.processed_samples as f32 / secs,
            avg_load_ms,
            "[dataset] progress"
        );
        self.last_logged_samples = self.processed_samples;
    }
}

fn check_same_size(sizes: impl Iterator<Item = (u32, u32)>) -> DatasetResult<(u32, u32)> {
    let mut expected = None;
    for size in sizes {
        match expected {
            None => expected = Some(size),
            Some(sz) if sz != size => {
                return Err(RoadDatasetError::Other(format!(
                    "batch contains varying image sizes ({sz:?} vs {size:?}); use batch size 1 or a fixed crop"
                )));
            }
            _ => {}
        }
    }
    expected.ok_or_else(|| RoadDatasetError::Other("cannot collate empty batch".to_string()))
}

fn image_tensor<B: Backend>(
    images: &[Vec<f32>],
    (width, height): (u32, u32),
    device: &B::Device,
) -> Tensor<B, 4> {
    let buf: Vec<f32> = images.iter().flatten().copied().collect();
    Tensor::<B, 1>::from_floats(buf.as_slice(), device).reshape([
        images.len(),
        3,
        height as usize,
        width as usize,
    ])
}

fn label_tensor<B: Backend>(labels: &[&LabelMap], device: &B::Device) -> Tensor<B, 3> {
    let (width, height) = labels.first().map(|l| l.dimensions()).unwrap_or((0, 0));
    let buf: Vec<f32> = labels.iter().flat_map(|l| l.as_raw().iter().copied()).collect();
    Tensor::<B, 1>::from_floats(buf.as_slice(), device).reshape([
        labels.len(),
        height as usize,
        width as usize,
    ])
}

pub fn road_batch<B: Backend>(samples: &[RoadSample], device: &B::Device) -> DatasetResult<RoadBatch<B>> {
    let size = check_same_size(samples.iter().map(|s| s.image.dimensions()))?;
    let images: Vec<Vec<f32>> = samples.iter().map(RoadSample::image_chw).collect();
    let segment: Vec<&LabelMap> = samples.iter().map(|s| &s.segment).collect();
    let skeleton: Vec<&LabelMap> = samples.iter().map(|s| &s.skeleton).collect();
    let boundary: Option<Vec<&LabelMap>> = samples.iter().map(|s| s.boundary.as_ref()).collect();
    Ok(RoadBatch {
        images: image_tensor(&images, size, device),
        segment: label_tensor(&segment, device),
        skeleton: label_tensor(&skeleton, device),
        boundary: boundary.map(|b| label_tensor(&b, device)),
    })
}

pub fn pyramid_batch<B: Backend>(
    views: &[PyramidSample],
    device: &B::Device,
) -> DatasetResult<PyramidBatch<B>> {
    let size = check_same_size(
        views
            .iter()
            .flat_map(|v| [v.local.image.dimensions(), v.image_global.dimensions()]),
    )?;
    let mut boundary = Vec::with_capacity(views.len());
    for v in views {
        let b = v.local.boundary.as_ref().ok_or_else(|| {
            RoadDatasetError::Other(format!(
                "sample {} has no boundary label; the pyramid model requires one",
                v.local.stem
            ))
        })?;
        boundary.push(b);
    }
    let local: Vec<Vec<f32>> = views.iter().map(|v| v.local.image_chw()).collect();
    let global: Vec<Vec<f32>> = views.iter().map(|v| image_to_chw(&v.image_global)).collect();
    let segment_local: Vec<&LabelMap> = views.iter().map(|v| &v.local.segment).collect();
    let segment_global: Vec<&LabelMap> = views.iter().map(|v| &v.segment_global).collect();
    let skeleton: Vec<&LabelMap> = views.iter().map(|v| &v.local.skeleton).collect();
    Ok(PyramidBatch {
        image_local: image_tensor(&local, size, device),
        image_global: image_tensor(&global, size, device),
        segment_local: label_tensor(&segment_local, device),
        segment_global: label_tensor(&segment_global, device),
        boundary: label_tensor(&boundary, device),
        skeleton: label_tensor(&skeleton, device),
    })
}
