//! Core types, error definitions, and data structures for road_dataset.

use image::{ImageBuffer, Luma, Rgb32FImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, RoadDatasetError>;

/// Single-channel label map; values in `0..=1` once thresholded.
pub type LabelMap = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Error)]
pub enum RoadDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{kind} label missing for {image}: expected {expected}")]
    MissingLabel {
        image: PathBuf,
        kind: LabelKind,
        expected: PathBuf,
    },
    #[error("{kind} label {path} is {actual:?}, image is {expected:?}")]
    LabelShape {
        path: PathBuf,
        kind: LabelKind,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("image {width}x{height} is smaller than the required {min_width}x{min_height}")]
    TooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Segment,
    Skeleton,
    Boundary,
}

impl LabelKind {
    /// Directory holding this label kind under a split root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            LabelKind::Segment => "segment",
            LabelKind::Skeleton => "skeleton",
            LabelKind::Boundary => "boundary",
        }
    }
}

impl std::fmt::Display for LabelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Paths of one image and its label maps.
#[derive(Debug, Clone)]
pub struct SampleIndex {
    /// Position in the sorted split listing; mixed into per-sample seeds.
    pub id: usize,
    pub stem: String,
    pub image: PathBuf,
    pub segment: PathBuf,
    pub skeleton: PathBuf,
    pub boundary: Option<PathBuf>,
}

/// Decoded image and labels at full resolution. Pixels keep the raw `0..=255` range.
#[derive(Debug, Clone)]
pub struct RoadSample {
    pub stem: String,
    pub image: Rgb32FImage,
    pub segment: LabelMap,
    pub skeleton: LabelMap,
    pub boundary: Option<LabelMap>,
}

impl RoadSample {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// All label maps, boundary last when present.
    pub fn labels_mut(&mut self) -> impl Iterator<Item = &mut LabelMap> {
        [&mut self.segment, &mut self.skeleton]
            .into_iter()
            .chain(self.boundary.as_mut())
    }

    /// Image in CHW layout.
    pub fn image_chw(&self) -> Vec<f32> {
        image_to_chw(&self.image)
    }
}

/// Local (full-resolution centre) and global (downsampled) views of one scene.
#[derive(Debug, Clone)]
pub struct PyramidSample {
    pub local: RoadSample,
    pub image_global: Rgb32FImage,
    pub segment_global: LabelMap,
}

pub fn image_to_chw(img: &Rgb32FImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        chw[base] = pixel[0];
        chw[plane + base] = pixel[1];
        chw[2 * plane + base] = pixel[2];
    }
    chw
}

/// Per-split counts produced without failing on incomplete samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitSummary {
    pub root: PathBuf,
    pub images: usize,
    pub complete: usize,
    pub missing_segment: usize,
    pub missing_skeleton: usize,
    pub missing_boundary: usize,
}
