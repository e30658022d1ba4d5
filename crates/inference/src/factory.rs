use burn::tensor::backend::Backend;
use cli_support::ModelKind;
use models::{CasNet, CasNetConfig, RoadNetPyramid, RoadNetPyramidConfig};
use std::path::Path;
use training::checkpoint::{load_into, resolve_checkpoint};

use crate::predictor::{CasNetPredictor, PyramidPredictor, RoadPredictor};
use crate::InferenceBackend;

/// Build a predictor for `model` with weights from `checkpoint` (a snapshot file
/// or a log directory with a `checkpoint` pointer). Missing or unreadable
/// weights are an error.
pub fn build_predictor(
    model: ModelKind,
    checkpoint: &Path,
) -> anyhow::Result<Box<dyn RoadPredictor>> {
    let path = resolve_checkpoint(checkpoint)?;
    let device = <InferenceBackend as Backend>::Device::default();
    let predictor: Box<dyn RoadPredictor> = match model {
        ModelKind::Casnet => {
            let net = CasNet::<InferenceBackend>::new(CasNetConfig::default(), &device);
            Box::new(CasNetPredictor::new(load_into(net, &path, &device)?, device))
        }
        ModelKind::Pyramid => {
            let net = RoadNetPyramid::<InferenceBackend>::new(RoadNetPyramidConfig::default(), &device);
            Box::new(PyramidPredictor::new(load_into(net, &path, &device)?, device))
        }
    };
    tracing::info!(model = %model, checkpoint = %path.display(), "loaded predictor");
    Ok(predictor)
}
