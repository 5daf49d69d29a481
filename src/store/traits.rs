//! Collaborator interfaces: the membership directory and the record store.
//!
//! Both are synchronous; implementations backed by a database block the
//! calling thread. All methods must be safe to call concurrently.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AccessLogEntry, EncryptedField, EpochState, Group, GroupId, PrincipalId, RecordId, Role,
    SecretRecord,
};

// ============================================================================
// Directory: membership and principal status, owned by the application
// ============================================================================

/// Read-only view of groups, memberships and principal status.
pub trait Directory: Send + Sync {
    fn group(&self, group_id: &GroupId) -> Result<Option<Group>>;

    /// Role of `principal` in `group_id`, `None` if not a member.
    fn role(&self, principal: &PrincipalId, group_id: &GroupId) -> Result<Option<Role>>;

    /// Unknown principals are reported as inactive.
    fn is_active_and_not_banned(&self, principal: &PrincipalId) -> Result<bool>;
}

// ============================================================================
// SecretStore: durable home of encrypted fields and epoch counters
// ============================================================================

/// Outcome of the epoch-guarded writes, [`SecretStore::insert_record`] and
/// [`SecretStore::replace_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWrite {
    Written,
    /// The record or its group is at a newer epoch than the field offered;
    /// nothing was written. `stored` is that newer epoch.
    StaleEpoch { stored: u32 },
    /// No record with that id. Never returned by `insert_record`.
    Missing,
}

/// Persistence for secret records and per-group key epochs.
///
/// # Atomicity
/// `insert_record`, `swap_field`, `replace_field` and `advance_group_epoch`
/// must each be atomic with respect to every other write of the same record
/// (or group). The epoch checks of `insert_record` and `replace_field` read
/// the group's epoch inside that same critical section.
pub trait SecretStore: Send + Sync {
    /// Epoch state of a group; groups never rotated report [`EpochState::INITIAL`].
    fn group_epoch(&self, group_id: &GroupId) -> Result<EpochState>;

    /// Increment the group's epoch by one and return the new state.
    fn advance_group_epoch(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<EpochState>;

    /// Insert a new record unless its field is older than the group's epoch.
    /// Fails if the id is taken.
    fn insert_record(&self, record: SecretRecord) -> Result<FieldWrite>;

    fn get_record(&self, id: &RecordId) -> Result<Option<SecretRecord>>;

    fn list_group_records(&self, group_id: &GroupId) -> Result<Vec<SecretRecord>>;

    /// Compare-and-swap: store `new` only if the current field equals
    /// `expected` (epoch and ciphertext). Returns whether the swap happened.
    fn swap_field(
        &self,
        id: &RecordId,
        expected: &EncryptedField,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Overwrite the field unless the stored one, or the group, has a newer
    /// epoch.
    fn replace_field(
        &self,
        id: &RecordId,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<FieldWrite>;

    /// Bump the access counter and timestamp and append an access-log entry
    /// for `principal`. Missing records are ignored.
    fn record_access(
        &self,
        id: &RecordId,
        principal: &PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Access-log entries of a record, newest first.
    fn access_log(&self, id: &RecordId) -> Result<Vec<AccessLogEntry>>;

    /// Returns whether a record was removed. Its access log goes with it.
    fn delete_record(&self, id: &RecordId) -> Result<bool>;

    /// Remove every record of a group with their access logs, and the
    /// group's epoch state. Returns the number of records removed.
    fn purge_group(&self, group_id: &GroupId) -> Result<usize>;
}

impl<T: Directory + ?Sized> Directory for std::sync::Arc<T> {
    fn group(&self, group_id: &GroupId) -> Result<Option<Group>> {
        (**self).group(group_id)
    }

    fn role(&self, principal: &PrincipalId, group_id: &GroupId) -> Result<Option<Role>> {
        (**self).role(principal, group_id)
    }

    fn is_active_and_not_banned(&self, principal: &PrincipalId) -> Result<bool> {
        (**self).is_active_and_not_banned(principal)
    }
}

impl<T: SecretStore + ?Sized> SecretStore for std::sync::Arc<T> {
    fn group_epoch(&self, group_id: &GroupId) -> Result<EpochState> {
        (**self).group_epoch(group_id)
    }

    fn advance_group_epoch(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<EpochState> {
        (**self).advance_group_epoch(group_id, now)
    }

    fn insert_record(&self, record: SecretRecord) -> Result<FieldWrite> {
        (**self).insert_record(record)
    }

    fn get_record(&self, id: &RecordId) -> Result<Option<SecretRecord>> {
        (**self).get_record(id)
    }

    fn list_group_records(&self, group_id: &GroupId) -> Result<Vec<SecretRecord>> {
        (**self).list_group_records(group_id)
    }

    fn swap_field(
        &self,
        id: &RecordId,
        expected: &EncryptedField,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).swap_field(id, expected, new, now)
    }

    fn replace_field(
        &self,
        id: &RecordId,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<FieldWrite> {
        (**self).replace_field(id, new, now)
    }

    fn record_access(
        &self,
        id: &RecordId,
        principal: &PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        (**self).record_access(id, principal, at)
    }

    fn access_log(&self, id: &RecordId) -> Result<Vec<AccessLogEntry>> {
        (**self).access_log(id)
    }

    fn delete_record(&self, id: &RecordId) -> Result<bool> {
        (**self).delete_record(id)
    }

    fn purge_group(&self, group_id: &GroupId) -> Result<usize> {
        (**self).purge_group(group_id)
    }
}
