use thiserror::Error;

#[derive(Error, Debug)]
pub enum SatchelError {
    #[error("cancelled by user")]
    UserCancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    ConflictExists(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("not permitted: {0}")]
    NotPermitted(String),
}

pub type Result<T> = std::result::Result<T, SatchelError>;
