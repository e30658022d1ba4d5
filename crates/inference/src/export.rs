//! PNG export of predicted maps.

use anyhow::Context;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, GrayImage, ImageEncoder, Luma, Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::predictor::{ProbabilityMap, RoadMaps};

/// Where `run_directory` writes its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// One merged `<stem>.png` per input image.
    Merged(PathBuf),
    /// `out-segment.png`, `out-boundary.png`, `out-skeleton.png`, overwritten per image.
    Scratch(PathBuf),
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Pack maps so a BGR reader sees `(segment, boundary, skeleton)`: red carries the
/// skeleton, green the boundary (zero when absent), blue the segmentation.
pub fn maps_to_bgr(maps: &RoadMaps) -> RgbImage {
    let (w, h) = maps.segment.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let boundary = maps
            .boundary
            .as_ref()
            .map(|b| b.get_pixel(x, y)[0])
            .unwrap_or(0.0);
        Rgb([
            to_u8(maps.skeleton.get_pixel(x, y)[0]),
            to_u8(boundary),
            to_u8(maps.segment.get_pixel(x, y)[0]),
        ])
    })
}

fn to_gray(map: &ProbabilityMap) -> GrayImage {
    GrayImage::from_fn(map.width(), map.height(), |x, y| Luma([to_u8(map.get_pixel(x, y)[0])]))
}

/// Write `<dir>/<stem>.png` uncompressed and without row filtering.
pub fn write_merged(maps: &RoadMaps, dir: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    let img = maps_to_bgr(maps);
    let path = dir.join(format!("{stem}.png"));
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    PngEncoder::new_with_quality(
        BufWriter::new(file),
        CompressionType::Uncompressed,
        FilterType::NoFilter,
    )
    .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
    .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(path)
}

/// Write the three grayscale maps as `out-<kind>.png`. A missing boundary is written as zeros.
pub fn write_scratch(maps: &RoadMaps, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let (w, h) = maps.segment.dimensions();
    let boundary = maps
        .boundary
        .as_ref()
        .map(to_gray)
        .unwrap_or_else(|| GrayImage::new(w, h));
    let outputs = [
        ("segment", to_gray(&maps.segment)),
        ("boundary", boundary),
        ("skeleton", to_gray(&maps.skeleton)),
    ];
    let mut written = Vec::with_capacity(outputs.len());
    for (kind, img) in outputs {
        let path = dir.join(format!("out-{kind}.png"));
        img.save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps(boundary: bool) -> RoadMaps {
        RoadMaps {
            segment: ProbabilityMap::from_pixel(2, 2, Luma([1.0])),
            boundary: boundary.then(|| ProbabilityMap::from_pixel(2, 2, Luma([0.5]))),
            skeleton: ProbabilityMap::from_pixel(2, 2, Luma([0.0])),
        }
    }

    #[test]
    fn channels_follow_bgr_order() {
        let img = maps_to_bgr(&maps(true));
        assert_eq!(img.get_pixel(1, 1).0, [0, 128, 255]);
        let img = maps_to_bgr(&maps(false));
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
    }

    #[test]
    fn merged_png_is_stored_uncompressed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let flat = RoadMaps {
            segment: ProbabilityMap::from_pixel(128, 128, Luma([1.0])),
            boundary: None,
            skeleton: ProbabilityMap::from_pixel(128, 128, Luma([0.0])),
        };
        let path = write_merged(&flat, dir.path(), "flat")?;
        let raw_pixels = 128 * 128 * 3;
        assert!(std::fs::metadata(&path)?.len() >= raw_pixels);
        Ok(())
    }

    #[test]
    fn merged_png_round_trips_pixels() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_merged(&maps(true), dir.path(), "tile")?;
        assert_eq!(path, dir.path().join("tile.png"));
        let back = image::open(&path)?.to_rgb8();
        assert_eq!(back.get_pixel(0, 1).0, [0, 128, 255]);
        Ok(())
    }

    #[test]
    fn scratch_outputs_include_empty_boundary() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let written = write_scratch(&maps(false), dir.path())?;
        assert_eq!(written.len(), 3);
        let boundary = image::open(dir.path().join("out-boundary.png"))?.to_luma8();
        assert!(boundary.pixels().all(|p| p[0] == 0));
        Ok(())
    }
}
