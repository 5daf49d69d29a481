//! Property-based tests for field encryption and group key derivation.

use base64ct::{Base64UrlUnpadded, Encoding};
use proptest::prelude::*;

use crate::{decrypt_field_value, derive_group_key, encrypt_field_value, CryptoError};

fn key_strategy() -> impl Strategy<Value = [u8; 32]> {
    any::<[u8; 32]>()
}

proptest! {
    /// Encrypt then decrypt returns the original text for any string,
    /// including empty and multi-byte content.
    #[test]
    fn field_round_trip(key in key_strategy(), plaintext in any::<String>()) {
        let envelope = encrypt_field_value(&plaintext, &key).unwrap();
        let decrypted = decrypt_field_value(&envelope, &key).unwrap();
        prop_assert_eq!(decrypted.as_str(), plaintext.as_str());
    }

    /// Two encryptions of one value under one key never share an envelope.
    #[test]
    fn fresh_nonce_per_call(key in key_strategy(), plaintext in ".{0,64}") {
        let a = encrypt_field_value(&plaintext, &key).unwrap();
        let b = encrypt_field_value(&plaintext, &key).unwrap();
        prop_assert_ne!(a, b);
    }

    /// Flipping any single bit of a valid envelope is rejected.
    #[test]
    fn single_bit_tamper_detected(
        key in key_strategy(),
        plaintext in ".{0,64}",
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let envelope = encrypt_field_value(&plaintext, &key).unwrap();
        let mut raw = Base64UrlUnpadded::decode_vec(&envelope).unwrap();
        let index = position.index(raw.len());
        raw[index] ^= 1 << bit;
        let tampered = Base64UrlUnpadded::encode_string(&raw);
        prop_assert!(matches!(
            decrypt_field_value(&tampered, &key),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    /// Derivation is a function of its inputs.
    #[test]
    fn derivation_deterministic(
        root in prop::collection::vec(any::<u8>(), 32..64),
        group in "[a-z0-9-]{1,40}",
        epoch in any::<u32>(),
    ) {
        let a = derive_group_key(&root, &group, epoch).unwrap();
        let b = derive_group_key(&root, &group, epoch).unwrap();
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
    }

    /// Distinct groups never share a key, so envelopes do not cross groups.
    #[test]
    fn cross_group_isolation(
        group_a in "[a-z0-9-]{1,40}",
        group_b in "[a-z0-9-]{1,40}",
        plaintext in ".{0,32}",
    ) {
        prop_assume!(group_a != group_b);
        let root = [0x33u8; 32];
        let key_a = derive_group_key(&root, &group_a, 0).unwrap();
        let key_b = derive_group_key(&root, &group_b, 0).unwrap();
        prop_assert_ne!(key_a.as_bytes(), key_b.as_bytes());

        let envelope = encrypt_field_value(&plaintext, key_a.as_bytes()).unwrap();
        prop_assert!(decrypt_field_value(&envelope, key_b.as_bytes()).is_err());
    }

    /// Adjacent epochs of one group never share a key.
    #[test]
    fn epochs_are_separated(group in "[a-z0-9-]{1,40}", epoch in 0u32..u32::MAX) {
        let root = [0x44u8; 32];
        let current = derive_group_key(&root, &group, epoch).unwrap();
        let next = derive_group_key(&root, &group, epoch + 1).unwrap();
        prop_assert_ne!(current.as_bytes(), next.as_bytes());
    }
}
