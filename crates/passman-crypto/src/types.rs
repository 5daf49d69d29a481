/// AES-GCM nonce length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_NONCE_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// Minimum accepted length of the process-wide root secret.
pub const MIN_ROOT_SECRET_LENGTH: usize = 32;

/// Smallest decodable envelope: nonce plus tag over an empty plaintext.
pub const MIN_ENVELOPE_LENGTH: usize = AES_GCM_NONCE_LENGTH + AES_GCM_TAG_LENGTH;
