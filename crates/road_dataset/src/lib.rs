//! Road imagery dataset loading, augmentation and Burn-compatible batching.
//!
//! This crate provides utilities for:
//! - Indexing `<root>/<split>/{images,segment,skeleton,boundary}` trees
//! - Joint image/label augmentation pipelines
//! - Local/global view derivation for the pyramid model
//! - Burn-compatible batch iteration
//! - Split summaries and preview dumps

pub mod aug;
pub mod batch;
pub mod index;
pub mod preview;
pub mod types;

pub use aug::{
    pyramid_views, Brightness, Contrast, DatasetConfig, TransformPipeline,
    TransformPipelineBuilder,
};
pub use batch::{pyramid_batch, road_batch, BatchIter, PyramidBatch, RoadBatch};
pub use index::{index_split, load_raw_sample, load_sample, summarize_split};
pub use preview::write_previews;
pub use types::*;
