//! Image-in, probability-maps-out predictors over the two networks.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};
use models::{CasNet, ModelError, RoadNetPyramid};
use thiserror::Error;

/// Single-channel probability map in `[0, 1]`.
pub type ProbabilityMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Multiple the network input sides are cropped or resized to.
pub const INPUT_MULTIPLE: u32 = 16;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("image {width}x{height} is too small; need at least {min}x{min} after preprocessing")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("unexpected output size {actual} (expected {expected})")]
    Output { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct RoadMaps {
    pub segment: ProbabilityMap,
    /// Absent for networks without a boundary head.
    pub boundary: Option<ProbabilityMap>,
    pub skeleton: ProbabilityMap,
}

pub trait RoadPredictor {
    fn predict(&mut self, image: &RgbImage) -> Result<RoadMaps, PredictError>;

    fn name(&self) -> &'static str;
}

fn round_down(v: u32) -> u32 {
    v / INPUT_MULTIPLE * INPUT_MULTIPLE
}

fn image_tensor<B: Backend>(img: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, p) in img.enumerate_pixels() {
        let base = (y * w + x) as usize;
        for c in 0..3 {
            chw[c * plane + base] = p[c] as f32;
        }
    }
    Tensor::from_data(TensorData::new(chw, [1, 3, h as usize, w as usize]), device)
}

fn to_map<B: Backend>(t: Tensor<B, 3>, (w, h): (u32, u32)) -> Result<ProbabilityMap, PredictError> {
    let values = t.into_data().to_vec::<f32>().unwrap_or_default();
    let expected = (w * h) as usize;
    let actual = values.len();
    ProbabilityMap::from_raw(w, h, values).ok_or(PredictError::Output { expected, actual })
}

/// Cascaded network: the image is resized so each side is a multiple of 16 and
/// the road-class softmax channel of each head is returned.
pub struct CasNetPredictor<B: Backend> {
    model: CasNet<B>,
    device: B::Device,
}

impl<B: Backend> CasNetPredictor<B> {
    pub fn new(model: CasNet<B>, device: B::Device) -> Self {
        Self { model, device }
    }
}

impl<B: Backend> RoadPredictor for CasNetPredictor<B> {
    fn predict(&mut self, image: &RgbImage) -> Result<RoadMaps, PredictError> {
        let (width, height) = image.dimensions();
        let size = (round_down(width), round_down(height));
        if size.0 == 0 || size.1 == 0 {
            return Err(PredictError::TooSmall {
                width,
                height,
                min: INPUT_MULTIPLE,
            });
        }
        let resized;
        let input = if size == (width, height) {
            image
        } else {
            resized = imageops::resize(image, size.0, size.1, FilterType::Triangle);
            &resized
        };
        let out = self.model.forward(image_tensor(input, &self.device))?;
        let (segment, skeleton) = out.road_maps();
        Ok(RoadMaps {
            segment: to_map(segment, size)?,
            boundary: None,
            skeleton: to_map(skeleton, size)?,
        })
    }

    fn name(&self) -> &'static str {
        "casnet"
    }
}

/// Pyramid network: the local view is the centred crop of half the image per
/// side (rounded down to a multiple of 16), the global view is the whole image
/// resized to that size. Maps cover the local view.
pub struct PyramidPredictor<B: Backend> {
    model: RoadNetPyramid<B>,
    device: B::Device,
}

impl<B: Backend> PyramidPredictor<B> {
    pub fn new(model: RoadNetPyramid<B>, device: B::Device) -> Self {
        Self { model, device }
    }

    /// Local crop rectangle `(x, y, w, h)` for an image of the given size.
    pub fn local_window(width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = (round_down(width / 2), round_down(height / 2));
        if w == 0 || h == 0 {
            return None;
        }
        Some(((width - w) / 2, (height - h) / 2, w, h))
    }
}

impl<B: Backend> RoadPredictor for PyramidPredictor<B> {
    fn predict(&mut self, image: &RgbImage) -> Result<RoadMaps, PredictError> {
        let (width, height) = image.dimensions();
        let (x, y, w, h) = Self::local_window(width, height).ok_or(PredictError::TooSmall {
            width,
            height,
            min: 2 * INPUT_MULTIPLE,
        })?;
        let local = imageops::crop_imm(image, x, y, w, h).to_image();
        let global = imageops::resize(image, w, h, FilterType::Triangle);
        let out = self.model.forward(
            image_tensor(&local, &self.device),
            image_tensor(&global, &self.device),
        )?;
        let maps = out.maps().ok_or(ModelError::EmptyTower)?;
        Ok(RoadMaps {
            segment: to_map(maps.segment, (w, h))?,
            boundary: Some(to_map(maps.boundary, (w, h))?),
            skeleton: to_map(maps.skeleton, (w, h))?,
        })
    }

    fn name(&self) -> &'static str {
        "pyramid"
    }
}
