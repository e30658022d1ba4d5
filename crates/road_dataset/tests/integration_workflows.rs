//! End-to-end dataset workflows on a synthetic split.

use burn_ndarray::NdArray;
use image::{GrayImage, Luma, Rgb, RgbImage};
use road_dataset::{
    index_split, summarize_split, write_previews, BatchIter, DatasetConfig, RoadDatasetError,
    Split,
};
use std::fs;
use std::path::Path;

type B = NdArray<f32>;

/// Write `count` scenes of `w`x`h` under `<root>/train`; boundaries only when `boundary`.
fn synthetic_split(root: &Path, count: usize, w: u32, h: u32, boundary: bool) -> anyhow::Result<()> {
    let split = root.join("train");
    let mut dirs = vec!["images", "segment", "skeleton"];
    if boundary {
        dirs.push("boundary");
    }
    for dir in &dirs {
        fs::create_dir_all(split.join(dir))?;
    }
    for i in 0..count {
        let stem = format!("tile_{i:03}");
        let img = RgbImage::from_fn(w, h, |x, _| Rgb([(x * 4) as u8, 100, (i * 20) as u8]));
        img.save(split.join("images").join(format!("{stem}.png")))?;
        let road = GrayImage::from_fn(w, h, |x, _| Luma([if x < w / 2 { 255 } else { 0 }]));
        let centre = GrayImage::from_fn(w, h, |x, _| Luma([if x == w / 4 { 200 } else { 10 }]));
        road.save(split.join("segment").join(format!("{stem}.png")))?;
        centre.save(split.join("skeleton").join(format!("{stem}.png")))?;
        if boundary {
            road.save(split.join("boundary").join(format!("{stem}.png")))?;
        }
    }
    Ok(())
}

fn eval_cfg(size: (u32, u32)) -> DatasetConfig {
    DatasetConfig {
        seed: Some(1),
        ..DatasetConfig::eval(size)
    }
}

#[test]
fn index_pairs_labels_by_stem() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 3, 32, 32, false)?;
    let indices = index_split(tmp.path(), Split::Train, false)?;
    assert_eq!(indices.len(), 3);
    assert_eq!(indices[0].stem, "tile_000");
    assert!(indices.iter().all(|i| i.boundary.is_none()));

    let err = index_split(tmp.path(), Split::Train, true).unwrap_err();
    assert!(matches!(err, RoadDatasetError::MissingLabel { .. }));
    Ok(())
}

#[test]
fn missing_labels_are_summarised_and_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 4, 32, 32, true)?;
    fs::remove_file(tmp.path().join("train/skeleton/tile_002.png"))?;

    let summary = summarize_split(tmp.path(), Split::Train)?;
    assert_eq!(summary.images, 4);
    assert_eq!(summary.complete, 3);
    assert_eq!(summary.missing_skeleton, 1);

    assert!(index_split(tmp.path(), Split::Train, false).is_err());
    Ok(())
}

#[test]
fn eval_batches_are_binary_and_end_after_one_pass() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 3, 40, 36, true)?;
    let device = Default::default();
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, eval_cfg((32, 32)))?;

    let batch = iter
        .next_batch::<B>(2, &device)?
        .expect("first batch");
    assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
    assert_eq!(batch.segment.dims(), [2, 32, 32]);
    assert_eq!(batch.boundary.as_ref().map(|b| b.dims()), Some([2, 32, 32]));
    let seg = batch.segment.into_data().to_vec::<f32>().unwrap();
    assert!(seg.iter().all(|v| *v == 0.0 || *v == 1.0));
    let skel = batch.skeleton.into_data().to_vec::<f32>().unwrap();
    assert!(skel.iter().any(|v| *v == 1.0));

    let last = iter.next_batch::<B>(2, &device)?.expect("tail batch");
    assert_eq!(last.images.dims()[0], 1);
    assert!(iter.next_batch::<B>(2, &device)?.is_none());
    Ok(())
}

#[test]
fn repeating_iterator_keeps_producing() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 2, 48, 48, false)?;
    let device = Default::default();
    let cfg = DatasetConfig {
        seed: Some(9),
        ..DatasetConfig::casnet_train()
    };
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, cfg)?;
    for _ in 0..5 {
        let batch = iter.next_batch::<B>(1, &device)?.expect("repeat never ends");
        let [_, c, h, w] = batch.images.dims();
        assert_eq!((c, h % 16, w % 16), (3, 0, 0));
    }
    assert!(iter.passes() >= 2);
    Ok(())
}

#[test]
fn pyramid_batches_pair_local_and_global_views() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 2, 64, 64, true)?;
    let device = Default::default();
    let cfg = DatasetConfig {
        seed: Some(3),
        ..DatasetConfig::pyramid_train()
    };
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, cfg)?;
    let batch = iter
        .next_pyramid_batch::<B>(2, &device)?
        .expect("pyramid batch");
    assert_eq!(batch.image_local.dims(), [2, 3, 32, 32]);
    assert_eq!(batch.image_global.dims(), [2, 3, 32, 32]);
    assert_eq!(batch.segment_global.dims(), [2, 32, 32]);
    assert_eq!(batch.boundary.dims(), [2, 32, 32]);
    Ok(())
}

#[test]
fn previews_write_one_file_per_component() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 2, 32, 32, true)?;
    let out = tmp.path().join("preview");
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, eval_cfg((32, 32)))?;
    let written = write_previews(&mut iter, &out, 2)?;
    assert_eq!(written.len(), 8);
    assert!(out.join("1-boundary.png").exists());
    let seg = image::open(out.join("0-segment.png"))?.to_luma8();
    assert_eq!(seg.get_pixel(0, 0)[0], 255);
    Ok(())
}

fn corrupt_image(root: &Path, stem: &str) -> anyhow::Result<()> {
    fs::write(root.join("train/images").join(format!("{stem}.png")), b"not a png")?;
    Ok(())
}

#[test]
fn unreadable_samples_are_skipped_when_permissive() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 3, 32, 32, false)?;
    corrupt_image(tmp.path(), "tile_001")?;
    let device = Default::default();
    let mut iter =
        BatchIter::from_split(tmp.path(), Split::Train, eval_cfg((32, 32)))?.permissive(true);

    let batch = iter.next_batch::<B>(3, &device)?.expect("two readable samples");
    assert_eq!(batch.images.dims()[0], 2);
    assert_eq!(iter.skipped_errors(), 1);
    assert!(iter.next_batch::<B>(3, &device)?.is_none());
    Ok(())
}

#[test]
fn strict_iterator_returns_the_load_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 3, 32, 32, false)?;
    corrupt_image(tmp.path(), "tile_001")?;
    let device = Default::default();
    let mut iter =
        BatchIter::from_split(tmp.path(), Split::Train, eval_cfg((32, 32)))?.permissive(false);

    let err = iter.next_batch::<B>(3, &device).unwrap_err();
    assert!(matches!(err, RoadDatasetError::Image { .. }), "{err}");
    assert_eq!(iter.skipped_errors(), 0);
    Ok(())
}

#[test]
fn repeating_over_only_unreadable_samples_gives_up() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 2, 32, 32, false)?;
    corrupt_image(tmp.path(), "tile_000")?;
    corrupt_image(tmp.path(), "tile_001")?;
    let device = Default::default();
    let cfg = DatasetConfig {
        seed: Some(5),
        ..DatasetConfig::casnet_train()
    };
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, cfg)?.permissive(true);

    let err = iter.next_batch::<B>(1, &device).unwrap_err();
    assert!(
        matches!(&err, RoadDatasetError::Other(msg) if msg.contains("consecutive failures")),
        "{err}"
    );
    assert_eq!(iter.skipped_errors(), 2);
    Ok(())
}

#[test]
fn iterator_seed_reaches_the_transform_pipeline() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_split(tmp.path(), 2, 48, 48, false)?;
    let cfg = DatasetConfig {
        seed: Some(11),
        transform: Some(DatasetConfig::casnet_train().pipeline()),
        ..DatasetConfig::casnet_train()
    };
    let iter = BatchIter::from_split(tmp.path(), Split::Train, cfg)?;
    assert_eq!(iter.pipeline().seed, Some(11));

    let seeded = |seed| -> anyhow::Result<Vec<f32>> {
        let cfg = DatasetConfig {
            seed: Some(seed),
            shuffle: false,
            ..DatasetConfig::casnet_train()
        };
        let mut iter = BatchIter::from_split(tmp.path(), Split::Train, cfg)?;
        let batch = iter
            .next_batch::<B>(1, &Default::default())?
            .expect("repeating batch");
        Ok(batch.images.into_data().to_vec::<f32>().unwrap())
    };
    assert_eq!(seeded(4)?, seeded(4)?);
    Ok(())
}
