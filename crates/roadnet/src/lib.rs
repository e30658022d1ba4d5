//! Road-network extraction umbrella crate: re-exports the workspace crates with feature wiring.
//!
//! - `models`: CasNet and the two-scale pyramid network
//! - `road_dataset`: dataset indexing, augmentation and batching
//! - `training`: losses, schedules and the training loop
//! - `inference`: checkpoint-backed predictors and map export

#[cfg(feature = "models")]
pub use models;

#[cfg(feature = "road-dataset")]
pub use road_dataset;

#[cfg(feature = "training")]
pub use training;

#[cfg(feature = "inference")]
pub use inference;

#[cfg(feature = "cli-support")]
pub use cli_support;
