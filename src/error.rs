#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The session backend could not be reached or rejected the command.
    #[error("Session backend error: {0}")]
    Backend(String),
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),
    #[error("Session codec error: {0}")]
    Codec(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
