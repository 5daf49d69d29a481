//! Stored envelope encoding.
//!
//! Layout (stable, persisted): base64url-unpadded([nonce:12][ciphertext][tag:16])
//!
//! The envelope carries no version or epoch; the epoch is stored next to it.

use base64ct::{Base64UrlUnpadded, Encoding};

use crate::error::CryptoError;
use crate::types::{AES_GCM_NONCE_LENGTH, MIN_ENVELOPE_LENGTH};

/// Borrowed view of a decoded envelope.
#[derive(Debug)]
pub struct EnvelopeParts<'a> {
    pub nonce: &'a [u8],
    /// Ciphertext with the GCM tag appended, as the `aead` API expects it.
    pub sealed: &'a [u8],
}

/// Encode nonce and sealed ciphertext into the stored string form.
pub fn encode_envelope(nonce: &[u8], sealed: &[u8]) -> String {
    let mut raw = Vec::with_capacity(nonce.len() + sealed.len());
    raw.extend_from_slice(nonce);
    raw.extend_from_slice(sealed);
    Base64UrlUnpadded::encode_string(&raw)
}

/// Decode the stored string form into raw bytes.
///
/// Any malformation collapses into [`CryptoError::DecryptionFailed`].
pub fn decode_envelope(envelope: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = Base64UrlUnpadded::decode_vec(envelope).map_err(|_| CryptoError::DecryptionFailed)?;
    if raw.len() < MIN_ENVELOPE_LENGTH {
        return Err(CryptoError::DecryptionFailed);
    }
    Ok(raw)
}

/// Split decoded envelope bytes. Caller must have length-checked via
/// [`decode_envelope`].
pub fn split_envelope(raw: &[u8]) -> Result<EnvelopeParts<'_>, CryptoError> {
    if raw.len() < MIN_ENVELOPE_LENGTH {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, sealed) = raw.split_at(AES_GCM_NONCE_LENGTH);
    Ok(EnvelopeParts { nonce, sealed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_keeps_byte_order() {
        let nonce = [1u8; 12];
        let sealed = [2u8; 20];
        let encoded = encode_envelope(&nonce, &sealed);
        let raw = decode_envelope(&encoded).unwrap();
        let parts = split_envelope(&raw).unwrap();
        assert_eq!(parts.nonce, &nonce);
        assert_eq!(parts.sealed, &sealed);
    }

    #[test]
    fn encoding_is_url_safe_and_unpadded() {
        let encoded = encode_envelope(&[0xfb; 12], &[0xff; 17]);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_envelope("not base64!!"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn rejects_short_envelope() {
        let short = Base64UrlUnpadded::encode_string(&[0u8; MIN_ENVELOPE_LENGTH - 1]);
        assert!(matches!(
            decode_envelope(&short),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(split_envelope(&[0u8; 5]).is_err());
    }

    #[test]
    fn empty_string_is_rejected() {
        assert!(decode_envelope("").is_err());
    }
}
