use passman_crypto::CryptoError;
use thiserror::Error;

use crate::access::DenyReason;
use crate::types::RecordId;

/// Message shown to end users for any failed secret retrieval, whether the
/// cause was authorization, a missing record or corrupted data.
pub const RETRIEVAL_FAILED_MESSAGE: &str = "unable to retrieve this secret";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Display is uniform so callers cannot learn whether a membership
    /// exists; the reason is for internal logs.
    #[error("Access denied")]
    AccessDenied(DenyReason),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Secret not found: {0}")]
    NotFound(RecordId),

    #[error("Store error: {0}")]
    Store(String),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl VaultError {
    /// Only encryption failures are worth one retry: they come from the RNG
    /// or cipher backend, not from the input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Encryption(_))
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::AccessDenied(reason) => Some(*reason),
            _ => None,
        }
    }

    /// End-user facing text. Authorization, lookup and decryption failures
    /// collapse into one message, so an outsider cannot tell which record
    /// ids exist.
    pub fn user_message(&self) -> String {
        match self {
            Self::AccessDenied(_) | Self::NotFound(_) | Self::Decryption => {
                RETRIEVAL_FAILED_MESSAGE.to_string()
            }
            Self::InvalidArgument(msg) => msg.clone(),
            _ => "internal error".to_string(),
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Configuration(msg) => Self::Configuration(msg),
            CryptoError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            CryptoError::EncryptionFailed(msg) => Self::Encryption(msg),
            CryptoError::DecryptionFailed => Self::Decryption,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
