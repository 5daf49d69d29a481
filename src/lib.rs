//! Per-group encrypted credential fields for a team password manager.
//!
//! Each group's key is derived on demand from a process-wide root secret, the
//! group id and the group's key epoch (see `passman-crypto`). Every
//! encrypt/decrypt goes through the membership [`AccessGate`]. Rotation
//! advances the epoch; old envelopes stay readable at their own epoch.
//!
//! Membership, groups and principal status belong to the embedding
//! application and are consumed through the [`Directory`] trait. Records and
//! epoch counters are persisted through [`SecretStore`].

pub mod access;
pub mod config;
pub mod error;
pub mod generator;
pub mod rotation;
pub mod store;
pub mod types;
pub mod vault;

pub use access::{role_permits, AccessGate, AccessGrant, DenyReason};
pub use config::{RotationPolicy, VaultConfig};
pub use error::{Result, VaultError, RETRIEVAL_FAILED_MESSAGE};
pub use generator::{check_strength, generate_password, PasswordPolicy, Strength, StrengthReport};
pub use rotation::{rotation_due, RotationReport};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{Directory, FieldWrite, MemoryStore, SecretStore};
pub use types::{
    AccessLogEntry, Capability, EncryptedField, EpochState, Group, GroupId, PrincipalId,
    RecordId, Role, SecretRecord,
};
pub use vault::SecretVault;

pub use passman_crypto::{derive_group_key, CryptoError, GroupKey, RootSecret};
