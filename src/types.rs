//! Identifiers and records shared by the gate, the lifecycle and the stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VaultError};

// ============================================================================
// Identifiers
// ============================================================================

/// Authenticated actor, as identified by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(VaultError::InvalidArgument(
                "principal id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Group identifier, the unit of key isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(VaultError::InvalidArgument(
                "group id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Fresh random (UUID v4) group id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored secret record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| VaultError::InvalidArgument(format!("invalid record id: {}", e)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Membership
// ============================================================================

/// Role of a principal inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(VaultError::InvalidArgument(format!("invalid role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller wants to do with a group's secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Decrypt.
    Read,
    /// Encrypt, create, edit, delete.
    Write,
}

/// A collaboration boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub owner: PrincipalId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Key epoch bookkeeping for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochState {
    /// Current encryption epoch; new envelopes are produced at this epoch.
    pub epoch: u32,
    /// When the epoch last advanced, or `None` if it never has.
    pub rotated_at: Option<DateTime<Utc>>,
}

impl EpochState {
    pub const INITIAL: EpochState = EpochState {
        epoch: 0,
        rotated_at: None,
    };
}

impl Default for EpochState {
    fn default() -> Self {
        Self::INITIAL
    }
}

// ============================================================================
// Encrypted values
// ============================================================================

/// One encrypted sensitive value and the metadata needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    /// Group whose key produced the envelope.
    pub group_id: GroupId,
    /// Key epoch the envelope was produced under.
    pub epoch: u32,
    /// Opaque envelope: base64url([nonce:12][ciphertext][tag:16]).
    pub ciphertext: String,
}

/// A stored secret: an encrypted field plus record bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: RecordId,
    /// What the value is ("password", "notes", a custom field name).
    pub label: String,
    pub field: EncryptedField,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: u64,
}

impl SecretRecord {
    pub fn group_id(&self) -> &GroupId {
        &self.field.group_id
    }
}

/// Who decrypted a record, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub record_id: RecordId,
    pub principal: PrincipalId,
    pub accessed_at: DateTime<Utc>,
}
