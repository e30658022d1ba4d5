use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Spatial dimensions the network cannot pool/unpool back to the same size.
    #[error("input {height}x{width} is not divisible by {multiple} ({context})")]
    InputShape {
        height: usize,
        width: usize,
        multiple: usize,
        context: &'static str,
    },
    #[error("local view {local:?} and global view {global:?} must share a shape")]
    ViewMismatch { local: [usize; 4], global: [usize; 4] },
    #[error("tower has no side outputs")]
    EmptyTower,
    #[error("expected {expected} input channels, got {actual}")]
    Channels { expected: usize, actual: usize },
}

/// Check that `dims` ([B, C, H, W]) has `channels` channels and sides divisible by `multiple`.
pub(crate) fn check_input(
    dims: [usize; 4],
    channels: usize,
    multiple: usize,
    context: &'static str,
) -> Result<()> {
    if dims[1] != channels {
        return Err(ModelError::Channels {
            expected: channels,
            actual: dims[1],
        });
    }
    if dims[2] == 0 || dims[3] == 0 || dims[2] % multiple != 0 || dims[3] % multiple != 0 {
        return Err(ModelError::InputShape {
            height: dims[2],
            width: dims[3],
            multiple,
            context,
        });
    }
    Ok(())
}
