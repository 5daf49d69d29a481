//! Group key rotation.
//!
//! Rotation advances a group's epoch by one. New envelopes are produced at
//! the new epoch from then on; old envelopes stay readable at the epoch
//! recorded next to them. Under [`RotationPolicy::Eager`] the rotation call
//! also re-encrypts every record of the group, one compare-and-swap per
//! record, so concurrent updates are never overwritten with stale data.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access::AccessGrant;
use crate::config::RotationPolicy;
use crate::error::{Result, VaultError};
use crate::store::{Directory, SecretStore};
use crate::types::{GroupId, SecretRecord};
use crate::vault::{now, SecretVault};

/// Extra attempts per record when the eager pass loses a swap.
pub const MAX_SWAP_RETRIES: usize = 3;

/// Outcome of one rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub group_id: GroupId,
    pub previous_epoch: u32,
    pub new_epoch: u32,
    /// Records this rotation moved to `new_epoch`.
    pub reencrypted: usize,
    /// Records some other writer had already moved to `new_epoch` or later.
    pub already_current: usize,
    /// Records left at an older epoch (undecryptable, or kept losing the
    /// swap). They remain readable at their own epoch.
    pub skipped: usize,
}

/// Whether a group last rotated (or created) at `last` is due at `now`.
pub fn rotation_due(last: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    now.signed_duration_since(last) >= interval
}

enum Migration {
    Reencrypted,
    AlreadyCurrent,
    Gone,
    Skipped,
}

impl<D: Directory, S: SecretStore> SecretVault<D, S> {
    /// Advance `group_id` to a fresh epoch and return it.
    pub fn rotate_group_key(&self, group_id: &GroupId) -> Result<u32> {
        Ok(self.rotate_group_key_with_report(group_id)?.new_epoch)
    }

    pub fn rotate_group_key_with_report(&self, group_id: &GroupId) -> Result<RotationReport> {
        let grant = self.gate.maintenance(group_id)?;
        let state = self.store.advance_group_epoch(group_id, now())?;
        let mut report = RotationReport {
            group_id: group_id.clone(),
            previous_epoch: state.epoch.saturating_sub(1),
            new_epoch: state.epoch,
            reencrypted: 0,
            already_current: 0,
            skipped: 0,
        };

        if self.rotation_policy == RotationPolicy::Eager {
            for record in self.store.list_group_records(group_id)? {
                match self.migrate_record(&grant, record, state.epoch)? {
                    Migration::Reencrypted => report.reencrypted += 1,
                    Migration::AlreadyCurrent => report.already_current += 1,
                    Migration::Skipped => report.skipped += 1,
                    Migration::Gone => {}
                }
            }
        }

        info!(
            group_id = %group_id,
            previous_epoch = report.previous_epoch,
            new_epoch = report.new_epoch,
            policy = ?self.rotation_policy,
            reencrypted = report.reencrypted,
            already_current = report.already_current,
            skipped = report.skipped,
            "rotated group key"
        );
        Ok(report)
    }

    /// Rotate if the group's epoch is older than the configured interval.
    ///
    /// Groups that never rotated are measured from their creation time.
    /// Returns the new epoch when a rotation happened.
    pub fn rotate_if_due(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<Option<u32>> {
        let state = self.store.group_epoch(group_id)?;
        let last = match state.rotated_at {
            Some(at) => at,
            None => {
                self.gate
                    .directory()
                    .group(group_id)?
                    .ok_or(VaultError::AccessDenied(
                        crate::access::DenyReason::GroupNotFound,
                    ))?
                    .created_at
            }
        };
        if !rotation_due(last, now, self.rotation_interval) {
            debug!(group_id = %group_id, epoch = state.epoch, "rotation not due");
            return Ok(None);
        }
        self.rotate_group_key(group_id).map(Some)
    }

    fn migrate_record(
        &self,
        grant: &AccessGrant,
        mut record: SecretRecord,
        new_epoch: u32,
    ) -> Result<Migration> {
        for attempt in 0..=MAX_SWAP_RETRIES {
            if record.field.epoch >= new_epoch {
                return Ok(Migration::AlreadyCurrent);
            }
            let plaintext = match self.open(grant, &record.field, new_epoch) {
                Ok(plaintext) => plaintext,
                Err(VaultError::Decryption) => {
                    warn!(record_id = %record.id, epoch = record.field.epoch, "record left at old epoch: undecryptable");
                    return Ok(Migration::Skipped);
                }
                Err(err) => return Err(err),
            };
            let field = self.seal(grant, new_epoch, &plaintext)?;
            if self
                .store
                .swap_field(&record.id, &record.field, field, now())?
            {
                return Ok(Migration::Reencrypted);
            }
            debug!(record_id = %record.id, attempt, "re-encryption lost a swap, re-reading");
            match self.store.get_record(&record.id)? {
                Some(fresh) => record = fresh,
                None => return Ok(Migration::Gone),
            }
        }
        warn!(record_id = %record.id, "record left at old epoch: kept changing during rotation");
        Ok(Migration::Skipped)
    }
}
