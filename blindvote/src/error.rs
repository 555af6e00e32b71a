use thiserror::Error;

/// Error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("blindvote: invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("blindvote: voter {0} is not on the roster")]
    UnauthorizedVoter(String),

    #[error("blindvote: voter {0} has already received a signature")]
    AlreadySigned(String),

    #[error("blindvote: session {0} not found or expired")]
    SessionNotFound(String),

    #[error("blindvote: signature verification failed")]
    InvalidSignature,

    #[error("blindvote: signature has already been cast")]
    DuplicateSignature,

    #[error("blindvote: arithmetic error: {0}")]
    Arithmetic(String),

    #[error("blindvote: storage error: {0}")]
    Storage(String),

    #[error("blindvote: configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }
}
