use thiserror::Error;

/// Errors returned by sponsorship ledger operations.
#[derive(Debug, Error)]
pub enum SponsorError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payout error: {0}")]
    PayoutError(String),

    #[error("verification error: {0}")]
    VerificationError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
