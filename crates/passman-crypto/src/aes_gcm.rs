//! AES-256-GCM encryption of single credential fields.
//!
//! Every call draws a fresh 96-bit nonce from the OS RNG, so encrypting the
//! same value twice never yields the same envelope. Decryption failures of
//! any kind surface as the single [`CryptoError::DecryptionFailed`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::envelope::{decode_envelope, encode_envelope, split_envelope};
use crate::error::CryptoError;
use crate::types::{AES_GCM_NONCE_LENGTH, AES_KEY_LENGTH};

/// Generate a random 12-byte nonce for AES-GCM.
pub fn generate_nonce() -> Result<[u8; AES_GCM_NONCE_LENGTH], CryptoError> {
    let mut nonce = [0u8; AES_GCM_NONCE_LENGTH];
    getrandom::getrandom(&mut nonce).map_err(|e| {
        CryptoError::EncryptionFailed(format!("random number generation failed: {}", e))
    })?;
    Ok(nonce)
}

/// Encrypt raw bytes into an envelope string.
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8]) -> Result<String, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::EncryptionFailed(format!(
            "invalid key length: expected {} bytes, got {}",
            AES_KEY_LENGTH,
            key.len()
        )));
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let nonce = generate_nonce()?;

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(encode_envelope(&nonce, &sealed))
}

/// Decrypt an envelope string back into raw bytes.
pub fn decrypt_bytes(envelope: &str, key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::DecryptionFailed);
    }
    let raw = decode_envelope(envelope)?;
    let parts = split_envelope(&raw)?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(parts.nonce), parts.sealed)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt one text field (password, note, custom field value).
pub fn encrypt_field_value(plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
    encrypt_bytes(plaintext.as_bytes(), key)
}

/// Decrypt one text field. Authenticated bytes that are not UTF-8 are
/// treated like any other decryption failure.
pub fn decrypt_field_value(envelope: &str, key: &[u8]) -> Result<Zeroizing<String>, CryptoError> {
    let bytes = decrypt_bytes(envelope, key)?;
    match std::str::from_utf8(&bytes) {
        Ok(text) => Ok(Zeroizing::new(text.to_owned())),
        Err(_) => Err(CryptoError::DecryptionFailed),
    }
}
