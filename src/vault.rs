//! Secret Record Lifecycle: encrypt, decrypt, create, read, update, delete.
//!
//! Every operation authorizes through the [`AccessGate`] first and derives the
//! group key from the resulting grant. Keys live only for the duration of one
//! call. Rotation lives in [`crate::rotation`].

use chrono::{DateTime, Duration, SubsecRound, Utc};
use passman_crypto::{decrypt_field_value, encrypt_field_value, GroupKey, GroupKeyDeriver};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::access::{AccessGate, AccessGrant};
use crate::config::{RotationPolicy, VaultConfig};
use crate::error::{Result, VaultError};
use crate::store::{Directory, FieldWrite, SecretStore};
use crate::types::{
    AccessLogEntry, Capability, EncryptedField, GroupId, PrincipalId, RecordId, SecretRecord,
};

/// Entry point for all encrypted-field operations.
///
/// `SecretVault` is `Sync` when its collaborators are; share it by reference
/// across threads.
pub struct SecretVault<D, S> {
    pub(crate) gate: AccessGate<D>,
    pub(crate) store: S,
    deriver: GroupKeyDeriver,
    pub(crate) rotation_policy: RotationPolicy,
    pub(crate) rotation_interval: Duration,
}

/// Wall-clock time at the millisecond precision every store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Run `op`, retrying exactly once if it failed with a retryable error.
pub(crate) fn retry_once<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(err) if err.is_retryable() => {
            warn!(error = %err, "retrying after transient failure");
            op()
        }
        other => other,
    }
}

impl<D: Directory, S: SecretStore> SecretVault<D, S> {
    pub fn new(config: VaultConfig, directory: D, store: S) -> Self {
        Self {
            gate: AccessGate::new(directory),
            store,
            deriver: GroupKeyDeriver::new(config.root_secret),
            rotation_policy: config.rotation_policy,
            rotation_interval: config.rotation_interval,
        }
    }

    pub fn gate(&self) -> &AccessGate<D> {
        &self.gate
    }

    pub fn directory(&self) -> &D {
        self.gate.directory()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        self.rotation_policy
    }

    // ------------------------------------------------------------------
    // Field operations
    // ------------------------------------------------------------------

    /// Encrypt `plaintext` under `group_id`'s key at the current epoch.
    pub fn encrypt_field(
        &self,
        principal: &PrincipalId,
        group_id: &GroupId,
        plaintext: &str,
    ) -> Result<EncryptedField> {
        let grant = self.gate.authorize(principal, group_id, Capability::Write)?;
        let epoch = self.store.group_epoch(group_id)?.epoch;
        self.seal(&grant, epoch, plaintext)
    }

    /// Decrypt a field of `group_id` at the epoch recorded on it.
    ///
    /// A field claiming another group, or an epoch the group has not reached,
    /// fails with the same error as a corrupted envelope.
    pub fn decrypt_field(
        &self,
        principal: &PrincipalId,
        group_id: &GroupId,
        field: &EncryptedField,
    ) -> Result<Zeroizing<String>> {
        let grant = self.gate.authorize(principal, group_id, Capability::Read)?;
        let current = self.store.group_epoch(group_id)?.epoch;
        self.open(&grant, field, current)
    }

    // ------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------

    /// Store a new secret at the group's current epoch.
    ///
    /// A rotation landing between sealing and inserting makes the store
    /// refuse the insert; the value is sealed again at the newer epoch and
    /// inserted once more.
    pub fn create_secret(
        &self,
        principal: &PrincipalId,
        group_id: &GroupId,
        label: &str,
        plaintext: &str,
    ) -> Result<SecretRecord> {
        let label = label.trim();
        if label.is_empty() {
            return Err(VaultError::InvalidArgument(
                "label must not be empty".to_string(),
            ));
        }
        let grant = self.gate.authorize(principal, group_id, Capability::Write)?;
        let id = RecordId::generate();
        let mut epoch = self.store.group_epoch(group_id)?.epoch;
        for attempt in 0..2 {
            let created = now();
            let record = SecretRecord {
                id,
                label: label.to_string(),
                field: self.seal(&grant, epoch, plaintext)?,
                created_at: created,
                updated_at: created,
                last_accessed: None,
                access_count: 0,
            };
            match self.store.insert_record(record.clone())? {
                FieldWrite::Written => {
                    debug!(record_id = %id, group_id = %group_id, epoch, "secret created");
                    return Ok(record);
                }
                FieldWrite::StaleEpoch { stored } => {
                    debug!(record_id = %id, attempt, sealed = epoch, stored, "create raced a rotation");
                    epoch = stored;
                }
                FieldWrite::Missing => {
                    return Err(VaultError::Store(format!(
                        "store reported record {} missing on insert",
                        id
                    )))
                }
            }
        }
        Err(VaultError::Store(format!(
            "group {} rotated repeatedly while creating a secret",
            group_id
        )))
    }

    /// Decrypt a stored record, count the access and log who made it.
    ///
    /// A missing record and a refused one read the same to end users; see
    /// [`VaultError::user_message`].
    ///
    /// Under [`RotationPolicy::Lazy`] a field from an older epoch is
    /// re-encrypted at the current one; losing that race to another writer is
    /// fine, and a failed upgrade never fails the read.
    pub fn read_secret(
        &self,
        principal: &PrincipalId,
        record_id: &RecordId,
    ) -> Result<Zeroizing<String>> {
        let record = self.load(record_id)?;
        let grant = self
            .gate
            .authorize(principal, record.group_id(), Capability::Read)?;
        let current = self.store.group_epoch(record.group_id())?.epoch;
        let plaintext = self.open(&grant, &record.field, current)?;

        self.store.record_access(record_id, principal, now())?;

        if self.rotation_policy == RotationPolicy::Lazy && record.field.epoch < current {
            if let Err(err) = self.upgrade(&record, &plaintext, current) {
                warn!(record_id = %record_id, error = %err, "lazy re-encryption failed");
            }
        }
        Ok(plaintext)
    }

    /// Replace a record's value, always at the group's current epoch.
    ///
    /// If a rotation moved the record to a newer epoch between sealing and
    /// writing, the value is sealed again at that epoch and written once more.
    pub fn update_secret(
        &self,
        principal: &PrincipalId,
        record_id: &RecordId,
        plaintext: &str,
    ) -> Result<SecretRecord> {
        let record = self.load(record_id)?;
        let grant = self
            .gate
            .authorize(principal, record.group_id(), Capability::Write)?;

        let mut epoch = self.store.group_epoch(record.group_id())?.epoch;
        for attempt in 0..2 {
            let field = self.seal(&grant, epoch, plaintext)?;
            match self.store.replace_field(record_id, field, now())? {
                FieldWrite::Written => return self.load(record_id),
                FieldWrite::Missing => return Err(VaultError::NotFound(*record_id)),
                FieldWrite::StaleEpoch { stored } => {
                    debug!(record_id = %record_id, attempt, sealed = epoch, stored, "update raced a rotation");
                    epoch = stored.max(self.store.group_epoch(record.group_id())?.epoch);
                }
            }
        }
        Err(VaultError::Store(format!(
            "record {} moved to a newer epoch during update",
            record_id
        )))
    }

    pub fn delete_secret(&self, principal: &PrincipalId, record_id: &RecordId) -> Result<()> {
        let record = self.load(record_id)?;
        self.gate
            .authorize(principal, record.group_id(), Capability::Write)?;
        if !self.store.delete_record(record_id)? {
            return Err(VaultError::NotFound(*record_id));
        }
        debug!(record_id = %record_id, group_id = %record.group_id(), "secret deleted");
        Ok(())
    }

    /// Who decrypted a record and when, newest first. Requires read access.
    pub fn access_log(
        &self,
        principal: &PrincipalId,
        record_id: &RecordId,
    ) -> Result<Vec<AccessLogEntry>> {
        let record = self.load(record_id)?;
        self.gate
            .authorize(principal, record.group_id(), Capability::Read)?;
        self.store.access_log(record_id)
    }

    /// Remove every record of a group the application has deleted.
    ///
    /// Not gated: group deletion is authorized by the caller. A group still
    /// present in the directory is refused, since its epoch would restart
    /// at zero under members that still hold newer fields.
    pub fn purge_group(&self, group_id: &GroupId) -> Result<usize> {
        if self.gate.directory().group(group_id)?.is_some() {
            return Err(VaultError::InvalidArgument(format!(
                "group {} still exists; delete it before purging its secrets",
                group_id
            )));
        }
        let removed = self.store.purge_group(group_id)?;
        info!(group_id = %group_id, removed, "purged group secrets");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Grant-bound key use
    // ------------------------------------------------------------------

    fn load(&self, record_id: &RecordId) -> Result<SecretRecord> {
        self.store
            .get_record(record_id)?
            .ok_or(VaultError::NotFound(*record_id))
    }

    fn group_key(&self, grant: &AccessGrant, epoch: u32) -> Result<GroupKey> {
        debug!(group_id = %grant.group_id(), epoch, "deriving group key");
        Ok(self.deriver.derive(grant.group_id().as_str(), epoch)?)
    }

    /// Encrypt at `epoch` under the grant's group. Requires a write grant.
    pub(crate) fn seal(
        &self,
        grant: &AccessGrant,
        epoch: u32,
        plaintext: &str,
    ) -> Result<EncryptedField> {
        if !grant.allows(Capability::Write) {
            return Err(VaultError::InvalidArgument(
                "sealing requires a write grant".to_string(),
            ));
        }
        let key = self.group_key(grant, epoch)?;
        let ciphertext =
            retry_once(|| Ok(encrypt_field_value(plaintext, key.as_bytes())?))?;
        Ok(EncryptedField {
            group_id: grant.group_id().clone(),
            epoch,
            ciphertext,
        })
    }

    /// Decrypt under the grant's group; `current` is the group's epoch.
    pub(crate) fn open(
        &self,
        grant: &AccessGrant,
        field: &EncryptedField,
        current: u32,
    ) -> Result<Zeroizing<String>> {
        if field.group_id != *grant.group_id() || field.epoch > current {
            warn!(
                group_id = %grant.group_id(),
                field_group = %field.group_id,
                field_epoch = field.epoch,
                current_epoch = current,
                "field does not belong to this group and epoch"
            );
            return Err(VaultError::Decryption);
        }
        let key = self.group_key(grant, field.epoch)?;
        decrypt_field_value(&field.ciphertext, key.as_bytes()).map_err(|err| {
            warn!(group_id = %field.group_id, epoch = field.epoch, "field decryption failed");
            VaultError::from(err)
        })
    }

    /// Re-encrypt an older-epoch record at `current` with a compare-and-swap.
    /// Returns whether this call won the swap.
    fn upgrade(&self, record: &SecretRecord, plaintext: &str, current: u32) -> Result<bool> {
        let grant = self.gate.maintenance(record.group_id())?;
        let field = self.seal(&grant, current, plaintext)?;
        let swapped = self
            .store
            .swap_field(&record.id, &record.field, field, now())?;
        debug!(
            record_id = %record.id,
            from_epoch = record.field.epoch,
            to_epoch = current,
            swapped,
            "lazy re-encryption"
        );
        Ok(swapped)
    }
}
