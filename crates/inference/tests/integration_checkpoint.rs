//! Checkpoint round trip through `build_predictor` and directory export.

use burn::tensor::backend::Backend;
use cli_support::ModelKind;
use image::{Rgb, RgbImage};
use inference::{build_predictor, run_directory_to, ExportTarget, InferenceBackend};
use models::{CasNet, CasNetConfig};
use std::path::Path;
use training::ModelSaver;

fn write_inputs(dir: &Path, names: &[&str], side: u32) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for name in names {
        RgbImage::from_fn(side, side, |x, y| Rgb([(x * 3) as u8, (y * 3) as u8, 60]))
            .save(dir.join(format!("{name}.png")))?;
    }
    std::fs::write(dir.join("notes.txt"), "ignored")?;
    Ok(())
}

fn saved_casnet(log_dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    let device = <InferenceBackend as Backend>::Device::default();
    let model = CasNet::<InferenceBackend>::new(CasNetConfig::default(), &device);
    ModelSaver::new(log_dir, 2).save::<InferenceBackend, _>(&model, 7)
}

#[test]
fn casnet_checkpoint_drives_merged_export() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ckpt = saved_casnet(&tmp.path().join("log"))?;
    assert!(ckpt.ends_with("model-7.bin"));

    let input = tmp.path().join("input");
    write_inputs(&input, &["b", "a"], 36)?;
    let out = tmp.path().join("out");

    let mut predictor = build_predictor(ModelKind::Casnet, &tmp.path().join("log"))?;
    let report = run_directory_to(predictor.as_mut(), &input, &ExportTarget::Merged(out.clone()))?;
    assert_eq!(report.images, 2);
    assert!(report.average_ms().is_some());
    assert_eq!(report.outputs, vec![out.join("a.png"), out.join("b.png")]);

    let merged = image::open(out.join("a.png"))?.to_rgb8();
    assert_eq!(merged.dimensions(), (32, 32));
    // No boundary head: the green channel stays empty.
    assert!(merged.pixels().all(|p| p[1] == 0));
    Ok(())
}

#[test]
fn scratch_target_overwrites_fixed_names() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ckpt = saved_casnet(&tmp.path().join("log"))?;
    let input = tmp.path().join("input");
    write_inputs(&input, &["only"], 16)?;
    let scratch = tmp.path().join("scratch");
    std::fs::create_dir_all(&scratch)?;

    let mut predictor = build_predictor(ModelKind::Casnet, &ckpt)?;
    let report = run_directory_to(predictor.as_mut(), &input, &ExportTarget::Scratch(scratch.clone()))?;
    assert_eq!(report.images, 1);
    for kind in ["segment", "boundary", "skeleton"] {
        assert!(scratch.join(format!("out-{kind}.png")).exists());
    }
    Ok(())
}

#[test]
fn missing_or_corrupt_checkpoints_fail() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    assert!(build_predictor(ModelKind::Casnet, &tmp.path().join("nope.bin")).is_err());
    assert!(build_predictor(ModelKind::Pyramid, tmp.path()).is_err());

    let garbage = tmp.path().join("model-1.bin");
    std::fs::write(&garbage, b"not a checkpoint")?;
    assert!(build_predictor(ModelKind::Casnet, &garbage).is_err());
    Ok(())
}

#[test]
fn empty_directory_reports_no_average() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ckpt = saved_casnet(&tmp.path().join("log"))?;
    let input = tmp.path().join("empty");
    std::fs::create_dir_all(&input)?;
    let mut predictor = build_predictor(ModelKind::Casnet, &ckpt)?;
    let report = run_directory_to(
        predictor.as_mut(),
        &input,
        &ExportTarget::Merged(tmp.path().join("out")),
    )?;
    assert_eq!(report.images, 0);
    assert!(report.average_ms().is_none());
    Ok(())
}
