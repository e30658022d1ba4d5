//! Short end-to-end training runs on a synthetic dataset.

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use clap::Parser;
use image::{GrayImage, Luma, Rgb, RgbImage};
use models::{
    CasNet, CasNetConfig, EncoderDecoderConfig, RoadNetPyramid, RoadNetPyramidConfig,
    SideTowerConfig, StageSpec, TowerStage,
};
use road_dataset::{BatchIter, DatasetConfig, Split};
use std::fs;
use std::path::Path;
use training::checkpoint::{latest_checkpoint, CHECKPOINT_FILE};
use training::monitor::STATS_FILE;
use training::fit;

type AD = Autodiff<NdArray<f32>>;

fn synthetic_dataset(root: &Path, count: usize, side: u32) -> anyhow::Result<()> {
    let split = root.join("train");
    for dir in ["images", "segment", "skeleton", "boundary"] {
        fs::create_dir_all(split.join(dir))?;
    }
    for i in 0..count {
        let stem = format!("{i:02}");
        RgbImage::from_fn(side, side, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 90]))
            .save(split.join("images").join(format!("{stem}.png")))?;
        let road = GrayImage::from_fn(side, side, |x, _| Luma([if x < side / 3 { 255 } else { 0 }]));
        let centre = GrayImage::from_fn(side, side, |x, _| Luma([if x == side / 6 { 255 } else { 0 }]));
        let edge = GrayImage::from_fn(side, side, |x, _| Luma([if x == side / 3 { 255 } else { 0 }]));
        road.save(split.join("segment").join(format!("{stem}.png")))?;
        centre.save(split.join("skeleton").join(format!("{stem}.png")))?;
        edge.save(split.join("boundary").join(format!("{stem}.png")))?;
    }
    Ok(())
}

fn small_config(log_dir: &Path, model: cli_support::ModelKind) -> training::TrainConfig {
    training::TrainConfig {
        log_dir: log_dir.to_path_buf(),
        steps_per_epoch: 2,
        max_epoch: 2,
        seed: Some(4),
        ..training::TrainConfig::defaults(model)
    }
}

#[test]
fn casnet_fit_writes_checkpoints_and_stats() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_dataset(tmp.path(), 2, 32)?;
    let log_dir = tmp.path().join("log");
    let cfg = small_config(&log_dir, cli_support::ModelKind::Casnet);
    let device = Default::default();
    let model = CasNet::<AD>::new(
        CasNetConfig {
            segment: EncoderDecoderConfig {
                in_channels: 3,
                stages: vec![StageSpec::new(4, 2), StageSpec::new(8, 2)],
                out_channels: 2,
            },
            skeleton: EncoderDecoderConfig {
                in_channels: 5,
                stages: vec![StageSpec::new(4, 2)],
                out_channels: 2,
            },
        },
        &device,
    );
    let dataset = DatasetConfig {
        seed: cfg.seed,
        ..DatasetConfig::casnet_train()
    };
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, dataset)?;
    let (_, summary) = fit(model, &cfg, &mut iter, 0, &device)?;

    assert_eq!(summary.epochs_run, 2);
    assert_eq!(summary.global_step, 4);
    assert!(summary.final_cost.is_some_and(f64::is_finite));
    assert!(log_dir.join("model-2.bin").exists());
    assert!(log_dir.join("model-4.bin").exists());
    assert_eq!(latest_checkpoint(&log_dir), Some(log_dir.join("model-4.bin")));
    let pointer = fs::read_to_string(log_dir.join(CHECKPOINT_FILE))?;
    assert_eq!(pointer.trim(), "model-4.bin");

    let stats: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(log_dir.join(STATS_FILE))?)?;
    assert_eq!(stats.len(), 2);
    assert!(stats[1]["segment_cost"].is_number());
    assert!(stats[1]["skeleton_cost"].is_number());
    assert_eq!(stats[1]["learning_rate"], 1e-3);
    Ok(())
}

#[test]
fn pyramid_fit_reports_all_tasks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_dataset(tmp.path(), 2, 64)?;
    let log_dir = tmp.path().join("log");
    let mut cfg = small_config(&log_dir, cli_support::ModelKind::Pyramid);
    cfg.max_epoch = 1;
    let device = Default::default();
    let tower = |in_channels: usize, levels: usize| SideTowerConfig {
        in_channels,
        stages: (0..levels)
            .map(|i| TowerStage {
                channels: 2 << i,
                convs: 1,
            })
            .collect(),
    };
    let model = RoadNetPyramid::<AD>::new(
        RoadNetPyramidConfig {
            global: tower(3, 3),
            local: tower(4, 4),
            boundary: tower(4, 3),
            skeleton: tower(4, 3),
        },
        &device,
    );
    let dataset = DatasetConfig {
        seed: cfg.seed,
        ..DatasetConfig::pyramid_train()
    };
    let mut iter = BatchIter::from_split(tmp.path(), Split::Train, dataset)?;
    let (_, summary) = fit(model, &cfg, &mut iter, 0, &device)?;
    assert_eq!(summary.global_step, 2);

    let stats: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(log_dir.join(STATS_FILE))?)?;
    for key in [
        "segment_global_cost",
        "segment_local_cost",
        "boundary_cost",
        "skeleton_cost",
        "cost",
    ] {
        assert!(stats[0][key].is_number(), "missing {key}");
    }
    Ok(())
}

#[test]
fn run_train_resumes_from_log_dir() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    synthetic_dataset(tmp.path(), 1, 16)?;
    let log_dir = tmp.path().join("train_log");
    let root = tmp.path().to_string_lossy().to_string();
    let log = log_dir.to_string_lossy().to_string();
    let base = [
        "train",
        "--model",
        "casnet",
        "--dataset-root",
        root.as_str(),
        "--log-dir",
        log.as_str(),
        "--steps-per-epoch",
        "1",
        "--seed",
        "2",
    ];

    let first = training::TrainArgs::parse_from(base.iter().copied().chain(["--max-epoch", "1"]));
    let summary = training::run_train(first)?;
    assert_eq!(summary.global_step, 1);
    assert!(log_dir.join("model-1.bin").exists());

    let resumed = training::TrainArgs::parse_from(
        base.iter()
            .copied()
            .chain(["--max-epoch", "2", "--load", log.as_str()]),
    );
    let summary = training::run_train(resumed)?;
    assert_eq!(summary.epochs_run, 1);
    assert_eq!(summary.global_step, 2);
    assert_eq!(latest_checkpoint(&log_dir), Some(log_dir.join("model-2.bin")));
    Ok(())
}

#[test]
fn missing_dataset_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("absent").to_string_lossy().to_string();
    let log = tmp.path().join("log").to_string_lossy().to_string();
    let args = training::TrainArgs::parse_from([
        "train",
        "--dataset-root",
        root.as_str(),
        "--log-dir",
        log.as_str(),
    ]);
    assert!(training::run_train(args).is_err());
}
