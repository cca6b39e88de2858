use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no session credentials available")]
    NoCredentials,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("rest request failed: {0}")]
    Rest(#[from] reqwest::Error),
}

impl ClientError {
    /// True for failures the connection lifecycle recovers from by itself
    /// (retry/backoff) rather than surfacing to a caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::MalformedFrame(_))
    }
}
