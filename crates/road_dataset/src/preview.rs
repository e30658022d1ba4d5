//! Dump augmented samples to disk for visual inspection.

use crate::batch::BatchIter;
use crate::types::{DatasetResult, LabelMap, RoadDatasetError, RoadSample};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Side multiple every training sample must satisfy.
pub const PREVIEW_MULTIPLE: u32 = 16;

fn to_rgb8(sample: &RoadSample) -> RgbImage {
    RgbImage::from_fn(sample.width(), sample.height(), |x, y| {
        let p = sample.image.get_pixel(x, y);
        Rgb([0, 1, 2].map(|c| p[c].clamp(0.0, 255.0).round() as u8))
    })
}

fn label_to_gray(label: &LabelMap) -> GrayImage {
    GrayImage::from_fn(label.width(), label.height(), |x, y| {
        Luma([(label.get_pixel(x, y)[0].clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

/// Write `count` samples from `iter` as `<n>-image.png`, `<n>-segment.png`,
/// `<n>-skeleton.png` and, when present, `<n>-boundary.png`. Returns written paths.
pub fn write_previews(
    iter: &mut BatchIter,
    out_dir: &Path,
    count: usize,
) -> DatasetResult<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir).map_err(|e| RoadDatasetError::Io {
        path: out_dir.to_path_buf(),
        source: e,
    })?;
    let mut written = Vec::new();
    let mut n = 0usize;
    while n < count {
        let Some(samples) = iter.next_samples(1)? else {
            break;
        };
        for sample in samples {
            if sample.width() % PREVIEW_MULTIPLE != 0 || sample.height() % PREVIEW_MULTIPLE != 0 {
                return Err(RoadDatasetError::Other(format!(
                    "sample {} is {}x{}, sides must be multiples of {PREVIEW_MULTIPLE}",
                    sample.stem,
                    sample.width(),
                    sample.height()
                )));
            }
            let image_path = out_dir.join(format!("{n}-image.png"));
            to_rgb8(&sample)
                .save(&image_path)
                .map_err(|e| RoadDatasetError::Image {
                    path: image_path.clone(),
                    source: e,
                })?;
            written.push(image_path);
            let labels = [
                ("segment", Some(&sample.segment)),
                ("skeleton", Some(&sample.skeleton)),
                ("boundary", sample.boundary.as_ref()),
            ];
            for (name, label) in labels {
                let Some(label) = label else { continue };
                let path = out_dir.join(format!("{n}-{name}.png"));
                label_to_gray(label)
                    .save(&path)
                    .map_err(|e| RoadDatasetError::Image {
                        path: path.clone(),
                        source: e,
                    })?;
                written.push(path);
            }
            tracing::debug!(index = n, stem = %sample.stem, "wrote preview");
            n += 1;
            if n >= count {
                break;
            }
        }
    }
    tracing::info!(samples = n, out_dir = %out_dir.display(), "previews written");
    Ok(written)
}
