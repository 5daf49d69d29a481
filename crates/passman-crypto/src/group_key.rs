//! Per-group key derivation from the process-wide root secret.
//!
//! group_key = HKDF-SHA256(salt="passman:group-key-salt:v1", ikm=root_secret,
//!     info="passman:group-key:v1" || 0x00 || len(group_id):4 BE || group_id || epoch:4 BE)
//!
//! Nothing here is persisted: the same (root secret, group id, epoch) always
//! yields the same key, so a group's key only exists for the duration of the
//! call that needs it.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::hkdf::hkdf_expand_into;
use crate::types::{AES_KEY_LENGTH, MIN_ROOT_SECRET_LENGTH};

const GROUP_KEY_INFO_PREFIX: &[u8] = b"passman:group-key:v1";
const GROUP_KEY_SALT: &[u8] = b"passman:group-key-salt:v1";

/// The process-wide secret every group key is derived from.
///
/// Validated once at construction and zeroized on drop. `Debug` never prints
/// the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootSecret(Vec<u8>);

impl RootSecret {
    /// Wrap raw secret bytes, rejecting anything shorter than
    /// [`MIN_ROOT_SECRET_LENGTH`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new(bytes.into());
        check_root_secret(&bytes)?;
        Ok(Self(std::mem::take(&mut *bytes)))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootSecret([REDACTED; {} bytes])", self.0.len())
    }
}

/// A derived 256-bit group key, tagged with the epoch it belongs to.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct GroupKey {
    bytes: [u8; AES_KEY_LENGTH],
    epoch: u32,
}

impl GroupKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKey")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

fn check_root_secret(root_secret: &[u8]) -> Result<(), CryptoError> {
    if root_secret.is_empty() {
        return Err(CryptoError::Configuration(
            "root secret must not be empty".to_string(),
        ));
    }
    if root_secret.len() < MIN_ROOT_SECRET_LENGTH {
        return Err(CryptoError::Configuration(format!(
            "root secret must be at least {} bytes, got {}",
            MIN_ROOT_SECRET_LENGTH,
            root_secret.len()
        )));
    }
    Ok(())
}

/// Derive the key for `group_id` at `epoch`.
///
/// # Arguments
/// * `root_secret` - Process-wide secret (at least 32 bytes)
/// * `group_id` - Group identifier, must be non-empty
/// * `epoch` - Key epoch, 0 for groups that were never rotated
pub fn derive_group_key(
    root_secret: &[u8],
    group_id: &str,
    epoch: u32,
) -> Result<GroupKey, CryptoError> {
    check_root_secret(root_secret)?;
    if group_id.is_empty() {
        return Err(CryptoError::InvalidArgument(
            "group id must not be empty".to_string(),
        ));
    }
    let group_len = u32::try_from(group_id.len()).map_err(|_| {
        CryptoError::InvalidArgument(format!("group id too long: {} bytes", group_id.len()))
    })?;

    let mut key = GroupKey {
        bytes: [0u8; AES_KEY_LENGTH],
        epoch,
    };
    hkdf_expand_into(
        root_secret,
        GROUP_KEY_SALT,
        &[
            GROUP_KEY_INFO_PREFIX,
            &[0x00],
            &group_len.to_be_bytes(),
            group_id.as_bytes(),
            &epoch.to_be_bytes(),
        ],
        &mut key.bytes,
    )?;
    Ok(key)
}

/// Key Derivation Unit bound to the configured root secret.
///
/// Built once at startup and shared by reference; it holds the root secret
/// but never caches derived keys.
#[derive(Debug, Clone)]
pub struct GroupKeyDeriver {
    root: RootSecret,
}

impl GroupKeyDeriver {
    pub fn new(root: RootSecret) -> Self {
        Self { root }
    }

    pub fn derive(&self, group_id: &str, epoch: u32) -> Result<GroupKey, CryptoError> {
        derive_group_key(self.root.expose(), group_id, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: [u8; 32] = [0x5au8; 32];

    #[test]
    fn derives_32_byte_key() {
        let key = derive_group_key(&ROOT, "group-1", 0).unwrap();
        assert_eq!(key.as_bytes().len(), 32);
        assert_eq!(key.epoch(), 0);
    }

    #[test]
    fn deterministic() {
        let a = derive_group_key(&ROOT, "group-1", 3).unwrap();
        let b = derive_group_key(&ROOT, "group-1", 3).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_groups_different_keys() {
        let a = derive_group_key(&ROOT, "group-a", 0).unwrap();
        let b = derive_group_key(&ROOT, "group-b", 0).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_epochs_different_keys() {
        let a = derive_group_key(&ROOT, "group-1", 0).unwrap();
        let b = derive_group_key(&ROOT, "group-1", 1).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_roots_different_keys() {
        let a = derive_group_key(&[0x01u8; 32], "group-1", 0).unwrap();
        let b = derive_group_key(&[0x02u8; 32], "group-1", 0).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn group_ids_sharing_a_prefix_are_separated() {
        let a = derive_group_key(&ROOT, "group-1", 0).unwrap();
        let b = derive_group_key(&ROOT, "group-10", 0).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn rejects_empty_root_secret() {
        let err = derive_group_key(&[], "group-1", 0).unwrap_err();
        assert!(matches!(err, CryptoError::Configuration(_)));
    }

    #[test]
    fn rejects_short_root_secret() {
        let err = derive_group_key(&[0u8; 31], "group-1", 0).unwrap_err();
        assert!(matches!(err, CryptoError::Configuration(_)));
        assert!(derive_group_key(&[0u8; 32], "group-1", 0).is_ok());
    }

    #[test]
    fn rejects_empty_group_id() {
        let err = derive_group_key(&ROOT, "", 0).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidArgument(_)));
    }

    #[test]
    fn root_secret_validates_length() {
        assert!(RootSecret::new(vec![7u8; 16]).is_err());
        assert!(RootSecret::new(Vec::new()).is_err());
        assert_eq!(RootSecret::new(vec![7u8; 48]).unwrap().len(), 48);
    }

    #[test]
    fn root_secret_debug_is_redacted() {
        let root = RootSecret::new(b"correct horse battery staple!!!!".to_vec()).unwrap();
        let printed = format!("{:?}", root);
        assert!(!printed.contains("horse"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn deriver_matches_free_function() {
        let deriver = GroupKeyDeriver::new(RootSecret::new(ROOT.to_vec()).unwrap());
        let a = deriver.derive("group-1", 2).unwrap();
        let b = derive_group_key(&ROOT, "group-1", 2).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert!(!format!("{:?}", a).contains("bytes"));
    }
}
