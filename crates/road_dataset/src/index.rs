//! Indexing and loading of `<root>/<split>/{images,segment,skeleton,boundary}` trees.

use crate::aug::TransformPipeline;
use crate::types::{
    DatasetResult, LabelKind, LabelMap, RoadDatasetError, RoadSample, SampleIndex, Split,
    SplitSummary,
};
use image::{Rgb, Rgb32FImage};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_DIR: &str = "images";
const IMAGE_EXT: &str = "png";

fn png_stems(dir: &Path) -> DatasetResult<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| RoadDatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut stems = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(IMAGE_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        stems.push((stem.to_string(), path));
    }
    stems.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(stems)
}

fn label_path(split_root: &Path, kind: LabelKind, stem: &str) -> PathBuf {
    split_root
        .join(kind.dir_name())
        .join(format!("{stem}.{IMAGE_EXT}"))
}

/// Index every image of `split` under `root`, pairing labels by file stem.
///
/// Segment and skeleton labels are required. A boundary label is attached when
/// present; with `require_boundary` its absence is an error.
pub fn index_split(
    root: &Path,
    split: Split,
    require_boundary: bool,
) -> DatasetResult<Vec<SampleIndex>> {
    let split_root = root.join(split.as_str());
    let mut indices = Vec::new();
    for (id, (stem, image)) in png_stems(&split_root.join(IMAGE_DIR))?
        .into_iter()
        .enumerate()
    {
        let segment = label_path(&split_root, LabelKind::Segment, &stem);
        let skeleton = label_path(&split_root, LabelKind::Skeleton, &stem);
        let boundary = label_path(&split_root, LabelKind::Boundary, &stem);
        for (kind, path) in [
            (LabelKind::Segment, &segment),
            (LabelKind::Skeleton, &skeleton),
        ] {
            if !path.exists() {
                return Err(RoadDatasetError::MissingLabel {
                    image: image.clone(),
                    kind,
                    expected: path.clone(),
                });
            }
        }
        let boundary = if boundary.exists() {
            Some(boundary)
        } else if require_boundary {
            return Err(RoadDatasetError::MissingLabel {
                image,
                kind: LabelKind::Boundary,
                expected: boundary,
            });
        } else {
            None
        };
        indices.push(SampleIndex {
            id,
            stem,
            image,
            segment,
            skeleton,
            boundary,
        });
    }
    Ok(indices)
}

/// Count images and missing labels of a split without failing on gaps.
pub fn summarize_split(root: &Path, split: Split) -> DatasetResult<SplitSummary> {
    let split_root = root.join(split.as_str());
    let mut summary = SplitSummary {
        root: split_root.clone(),
        ..Default::default()
    };
    for (stem, _) in png_stems(&split_root.join(IMAGE_DIR))? {
        summary.images += 1;
        let has = |kind| label_path(&split_root, kind, &stem).exists();
        let segment = has(LabelKind::Segment);
        let skeleton = has(LabelKind::Skeleton);
        let boundary = has(LabelKind::Boundary);
        summary.missing_segment += usize::from(!segment);
        summary.missing_skeleton += usize::from(!skeleton);
        summary.missing_boundary += usize::from(!boundary);
        if segment && skeleton {
            summary.complete += 1;
        }
    }
    Ok(summary)
}

pub(crate) fn open_image(path: &Path) -> DatasetResult<Rgb32FImage> {
    let rgb = image::open(path)
        .map_err(|e| RoadDatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgb8();
    Ok(Rgb32FImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        Rgb([p[0] as f32, p[1] as f32, p[2] as f32])
    }))
}

/// Grayscale label scaled to `0..=1` (not yet thresholded).
fn open_label(path: &Path, kind: LabelKind, expected: (u32, u32)) -> DatasetResult<LabelMap> {
    let gray = image::open(path)
        .map_err(|e| RoadDatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_luma8();
    if gray.dimensions() != expected {
        return Err(RoadDatasetError::LabelShape {
            path: path.to_path_buf(),
            kind,
            expected,
            actual: gray.dimensions(),
        });
    }
    Ok(LabelMap::from_fn(gray.width(), gray.height(), |x, y| {
        image::Luma([gray.get_pixel(x, y)[0] as f32 / 255.0])
    }))
}

/// Decode a sample without augmentation.
pub fn load_raw_sample(idx: &SampleIndex) -> DatasetResult<RoadSample> {
    let image = open_image(&idx.image)?;
    let dims = image.dimensions();
    let segment = open_label(&idx.segment, LabelKind::Segment, dims)?;
    let skeleton = open_label(&idx.skeleton, LabelKind::Skeleton, dims)?;
    let boundary = idx
        .boundary
        .as_deref()
        .map(|p| open_label(p, LabelKind::Boundary, dims))
        .transpose()?;
    Ok(RoadSample {
        stem: idx.stem.clone(),
        image,
        segment,
        skeleton,
        boundary,
    })
}

/// Decode and run the transform pipeline. `pass` varies seeded randomness across epochs.
pub fn load_sample(
    idx: &SampleIndex,
    pipeline: &TransformPipeline,
    pass: u64,
) -> DatasetResult<RoadSample> {
    let raw = load_raw_sample(idx)?;
    pipeline.apply(raw, idx.id as u64, pass)
}
