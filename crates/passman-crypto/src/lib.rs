pub mod aes_gcm;
pub mod envelope;
pub mod error;
pub mod group_key;
pub mod hkdf;
pub mod types;

#[cfg(test)]
mod proptests;

pub use aes_gcm::{decrypt_bytes, decrypt_field_value, encrypt_bytes, encrypt_field_value};
pub use envelope::{decode_envelope, encode_envelope};
pub use error::CryptoError;
pub use group_key::{derive_group_key, GroupKey, GroupKeyDeriver, RootSecret};
pub use types::{
    AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, MIN_ENVELOPE_LENGTH,
    MIN_ROOT_SECRET_LENGTH,
};
