use thiserror::Error;

/// Errors surfaced by schedule, timer and channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Missing or bad token, or a valid token without scope for the channel.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Timer transition not legal from the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The backing store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl CoreError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }
}

/// Convenience alias used throughout the workspace.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
