//! Argument types and process setup shared by the `train`, `view` and `predict` binaries.

pub mod common;

pub use common::{init_tracing, validate_backend_choice, BackendKind, ModelArgs, ModelKind};
