#![recursion_limit = "256"]

pub mod export;
pub mod factory;
pub mod predictor;
pub mod run;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use export::{maps_to_bgr, write_merged, write_scratch, ExportTarget};
pub use factory::build_predictor;
pub use predictor::{
    CasNetPredictor, PredictError, ProbabilityMap, PyramidPredictor, RoadMaps, RoadPredictor,
};
pub use run::{run_directory, run_directory_to, run_predict, PredictArgs, RunReport};

pub mod prelude {
    pub use crate::factory::build_predictor;
    pub use crate::predictor::{RoadMaps, RoadPredictor};
    pub use crate::run::{run_directory, RunReport};
    pub use crate::InferenceBackend;
}
