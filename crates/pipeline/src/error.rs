use gpucontext::ContextError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A link would create a cycle, cross executors, or touch a node in an
    /// unexpected state.
    #[error("chain integrity violation: {0}")]
    ChainIntegrity(String),
    /// Terminal nodes have no downstream slot.
    #[error("node '{0}' is terminal and cannot have a downstream node")]
    Terminal(String),
    #[error("node '{node}' does not support {operation}")]
    Unsupported {
        node: String,
        operation: &'static str,
    },
    #[error(transparent)]
    Context(#[from] ContextError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Reports a broken chain invariant.
///
/// Debug builds stop at the offending call; release builds log and return
/// the error so the mutation becomes a no-op.
pub(crate) fn integrity_violation(message: impl Into<String>) -> PipelineError {
    let message = message.into();
    tracing::error!(%message, "chain integrity violation");
    debug_assert!(false, "chain integrity violation: {message}");
    PipelineError::ChainIntegrity(message)
}
