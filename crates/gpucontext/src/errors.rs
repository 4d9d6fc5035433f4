use std::time::Duration;

/// Failures surfaced by [`crate::ContextExecutor`] and [`crate::GraphicsContext`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Bring-up failed or did not finish in time; the executor is unusable.
    #[error("graphics context initialization failed: {0}")]
    Initialization(String),
    /// The worker did not report readiness before the bring-up deadline.
    #[error("graphics context initialization timed out after {0:?}")]
    InitializationTimeout(Duration),
    /// Operation attempted on a released, not-yet-ready, or foreign-thread context.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Device-level failure reported by the backend.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ContextError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        ContextError::InvalidState(message.into())
    }

    /// True for both bring-up variants.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            ContextError::Initialization(_) | ContextError::InitializationTimeout(_)
        )
    }
}

/// GPU to CPU pixel transfer failed.
#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("texture {0} is not registered with this context")]
    UnknownTexture(u32),
    #[error("context is not valid for readback: {0}")]
    Context(String),
    #[error("buffer mapping failed: {0}")]
    Map(String),
    #[error("readback produced {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

impl From<ContextError> for ReadbackError {
    fn from(value: ContextError) -> Self {
        ReadbackError::Context(value.to_string())
    }
}

/// Errors reported by external render targets.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface has been closed")]
    Closed,
    #[error("frame is {actual:?}, surface expects {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("surface error: {0}")]
    Other(String),
}

pub type ContextResult<T> = std::result::Result<T, ContextError>;
