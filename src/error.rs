use thiserror::Error;

/// Failure taxonomy for the pipeline. Transport failures are normally
/// converted into a structured send outcome at the dispatcher boundary;
/// this variant exists for the transport layer itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown location, invalid month, or otherwise malformed request.
    /// Rejected immediately with no side effects.
    #[error("data error: {0}")]
    Data(String),

    /// Insufficient or unusable history for a location. Non-fatal.
    #[error("model error: {0}")]
    Model(String),

    /// Gateway unreachable, auth failure, or malformed gateway response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Store-level failure, distinct from a malformed request.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl CoreError {
    pub fn data(msg: impl Into<String>) -> Self {
        CoreError::Data(msg.into())
    }
}
