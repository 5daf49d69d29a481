//! HKDF-SHA256 expansion into caller-owned key buffers.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

/// Run HKDF-SHA256 extract-and-expand, filling `okm` completely.
///
/// `info_parts` are concatenated in order by the HKDF expand step, so callers
/// can pass framed fields without building an intermediate buffer.
///
/// # Arguments
/// * `ikm` - Input keying material
/// * `salt` - Salt for domain separation
/// * `info_parts` - Context components, fed to expand in order
/// * `okm` - Output buffer (at most 255 * 32 bytes)
pub fn hkdf_expand_into(
    ikm: &[u8],
    salt: &[u8],
    info_parts: &[&[u8]],
    okm: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand_multi_info(info_parts, okm)
        .map_err(|e| CryptoError::EncryptionFailed(format!("HKDF expand failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(ikm: &[u8], salt: &[u8], info: &[&[u8]]) -> [u8; 32] {
        let mut okm = [0u8; 32];
        hkdf_expand_into(ikm, salt, info, &mut okm).unwrap();
        okm
    }

    #[test]
    fn deterministic() {
        let ikm = [0x42u8; 32];
        let a = derive(&ikm, b"salt", &[b"info"]);
        let b = derive(&ikm, b"salt", &[b"info"]);
        assert_eq!(a, b);
    }

    #[test]
    fn split_info_matches_joined_info() {
        let ikm = [0x42u8; 32];
        let joined = derive(&ikm, b"salt", &[b"group:abc"]);
        let split = derive(&ikm, b"salt", &[b"group:", b"abc"]);
        assert_eq!(joined, split);
    }

    #[test]
    fn different_salts_different_keys() {
        let ikm = [0x42u8; 32];
        assert_ne!(
            derive(&ikm, b"salt-a", &[b"info"]),
            derive(&ikm, b"salt-b", &[b"info"])
        );
    }

    #[test]
    fn rfc5869_test_vector_1() {
        // RFC 5869 Test Case 1 (SHA-256), first 32 bytes of the 42-byte OKM
        let ikm = hex::decode("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").unwrap();
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();
        let expected =
            hex::decode("3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf")
                .unwrap();
        assert_eq!(derive(&ikm, &salt, &[&info]).to_vec(), expected);
    }

    #[test]
    fn oversized_output_is_rejected() {
        let mut okm = vec![0u8; 255 * 32 + 1];
        assert!(hkdf_expand_into(&[1u8; 32], b"salt", &[b"info"], &mut okm).is_err());
    }
}
