use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Network architecture.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Cascaded segmentation then centerline encoder/decoders.
    Casnet,
    /// Two-scale multi-branch towers with boundary output.
    Pyramid,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Casnet => "casnet",
            ModelKind::Pyramid => "pyramid",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[value(name = "ndarray")]
    #[serde(rename = "ndarray")]
    NdArray,
    Wgpu,
}

/// Model selection shared by every binary.
#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Network to build.
    #[arg(long, value_enum, default_value_t = ModelKind::Casnet)]
    pub model: ModelKind,
    /// Backend to use (ndarray, or wgpu when built with `backend-wgpu`).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Shorthand for `--backend wgpu`.
    #[arg(long, default_value_t = false)]
    pub gpu: bool,
    /// Checkpoint to initialise weights from.
    #[arg(long)]
    pub load: Option<PathBuf>,
}

impl ModelArgs {
    /// Backend after applying `--gpu`.
    pub fn backend(&self) -> BackendKind {
        if self.gpu {
            BackendKind::Wgpu
        } else {
            self.backend
        }
    }
}

/// Reject backends the binary was not compiled for.
pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; the WGPU backend is used despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
