use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Carries no detail: wrong key, tampered data and malformed envelopes
    /// must be indistinguishable to the caller.
    #[error("Decryption failed")]
    DecryptionFailed,
}
