//! MemoryStore: directory and record store held entirely in memory.
//!
//! Used by tests and by embedders that keep membership elsewhere and only
//! need a process-local view. Membership administration here follows the
//! group rules: the creator is the only OWNER and that role never moves.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{Result, VaultError};
use crate::types::{
    AccessLogEntry, EncryptedField, EpochState, Group, GroupId, PrincipalId, RecordId, Role,
    SecretRecord,
};

use super::traits::{Directory, FieldWrite, SecretStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrincipalStatus {
    Active,
    Banned,
}

#[derive(Default)]
struct DirectoryState {
    principals: HashMap<PrincipalId, PrincipalStatus>,
    groups: HashMap<GroupId, Group>,
    /// group → (principal → role)
    memberships: HashMap<GroupId, HashMap<PrincipalId, Role>>,
}

#[derive(Default)]
struct RecordState {
    records: HashMap<RecordId, SecretRecord>,
    epochs: HashMap<GroupId, EpochState>,
    /// Oldest first.
    access_log: Vec<AccessLogEntry>,
}

impl RecordState {
    fn epoch_of(&self, group_id: &GroupId) -> u32 {
        self.epochs.get(group_id).map_or(0, |state| state.epoch)
    }
}

/// In-memory [`Directory`] + [`SecretStore`].
///
/// Interior mutability via `parking_lot::Mutex`. The two halves have separate
/// locks; when both are needed the directory lock is taken first.
#[derive(Default)]
pub struct MemoryStore {
    directory: Mutex<DirectoryState>,
    records: Mutex<RecordState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Principals
    // ------------------------------------------------------------------

    /// Register (or reactivate) a principal as active.
    pub fn register_principal(&self, principal: &PrincipalId) {
        self.directory
            .lock()
            .principals
            .insert(principal.clone(), PrincipalStatus::Active);
    }

    pub fn ban_principal(&self, principal: &PrincipalId) {
        self.directory
            .lock()
            .principals
            .insert(principal.clone(), PrincipalStatus::Banned);
    }

    // ------------------------------------------------------------------
    // Groups and memberships
    // ------------------------------------------------------------------

    /// Create a group owned by `owner`, who becomes its only OWNER.
    pub fn create_group(&self, owner: &PrincipalId, name: &str) -> Result<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidArgument(
                "group name must not be empty".to_string(),
            ));
        }
        let mut dir = self.directory.lock();
        if dir.principals.get(owner) != Some(&PrincipalStatus::Active) {
            return Err(VaultError::InvalidArgument(format!(
                "principal {} cannot own a group",
                owner
            )));
        }
        let group = Group {
            id: GroupId::generate(),
            owner: owner.clone(),
            name: name.to_string(),
            created_at: crate::vault::now(),
        };
        dir.groups.insert(group.id.clone(), group.clone());
        dir.memberships
            .entry(group.id.clone())
            .or_default()
            .insert(owner.clone(), Role::Owner);
        Ok(group)
    }

    pub fn add_member(&self, group_id: &GroupId, principal: &PrincipalId, role: Role) -> Result<()> {
        if role == Role::Owner {
            return Err(VaultError::InvalidArgument(
                "only the group creator can hold the owner role".to_string(),
            ));
        }
        let mut dir = self.directory.lock();
        if !dir.groups.contains_key(group_id) {
            return Err(group_not_found(group_id));
        }
        let members = dir.memberships.entry(group_id.clone()).or_default();
        if members.contains_key(principal) {
            return Err(VaultError::InvalidArgument(format!(
                "{} is already a member of {}",
                principal, group_id
            )));
        }
        members.insert(principal.clone(), role);
        Ok(())
    }

    pub fn change_role(
        &self,
        group_id: &GroupId,
        principal: &PrincipalId,
        new_role: Role,
    ) -> Result<()> {
        let mut dir = self.directory.lock();
        let role = dir
            .memberships
            .get_mut(group_id)
            .and_then(|members| members.get_mut(principal))
            .ok_or_else(|| not_a_member(principal, group_id))?;
        if *role == Role::Owner || new_role == Role::Owner {
            return Err(VaultError::InvalidArgument(
                "cannot change the group owner role".to_string(),
            ));
        }
        *role = new_role;
        Ok(())
    }

    /// Returns whether a membership was removed. The owner cannot be removed.
    pub fn remove_member(&self, group_id: &GroupId, principal: &PrincipalId) -> Result<bool> {
        let mut dir = self.directory.lock();
        let Some(members) = dir.memberships.get_mut(group_id) else {
            return Ok(false);
        };
        if members.get(principal) == Some(&Role::Owner) {
            return Err(VaultError::InvalidArgument(
                "cannot remove the group owner".to_string(),
            ));
        }
        Ok(members.remove(principal).is_some())
    }

    /// Delete a group with its memberships and, by cascade, its records.
    /// Returns the number of records removed.
    pub fn delete_group(&self, group_id: &GroupId) -> Result<usize> {
        let mut dir = self.directory.lock();
        if dir.groups.remove(group_id).is_none() {
            return Err(group_not_found(group_id));
        }
        dir.memberships.remove(group_id);
        self.purge_group(group_id)
    }

    pub fn members(&self, group_id: &GroupId) -> Vec<(PrincipalId, Role)> {
        let dir = self.directory.lock();
        let mut members: Vec<_> = dir
            .memberships
            .get(group_id)
            .map(|m| m.iter().map(|(p, r)| (p.clone(), *r)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }
}

fn group_not_found(group_id: &GroupId) -> VaultError {
    VaultError::InvalidArgument(format!("group {} not found", group_id))
}

fn not_a_member(principal: &PrincipalId, group_id: &GroupId) -> VaultError {
    VaultError::InvalidArgument(format!("{} is not a member of {}", principal, group_id))
}

impl Directory for MemoryStore {
    fn group(&self, group_id: &GroupId) -> Result<Option<Group>> {
        Ok(self.directory.lock().groups.get(group_id).cloned())
    }

    fn role(&self, principal: &PrincipalId, group_id: &GroupId) -> Result<Option<Role>> {
        Ok(self
            .directory
            .lock()
            .memberships
            .get(group_id)
            .and_then(|members| members.get(principal))
            .copied())
    }

    fn is_active_and_not_banned(&self, principal: &PrincipalId) -> Result<bool> {
        Ok(self.directory.lock().principals.get(principal) == Some(&PrincipalStatus::Active))
    }
}

impl SecretStore for MemoryStore {
    fn group_epoch(&self, group_id: &GroupId) -> Result<EpochState> {
        Ok(self
            .records
            .lock()
            .epochs
            .get(group_id)
            .copied()
            .unwrap_or_default())
    }

    fn advance_group_epoch(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<EpochState> {
        let mut state = self.records.lock();
        let entry = state.epochs.entry(group_id.clone()).or_default();
        entry.epoch = entry.epoch.checked_add(1).ok_or_else(|| {
            VaultError::Store(format!("epoch counter exhausted for group {}", group_id))
        })?;
        entry.rotated_at = Some(now);
        Ok(*entry)
    }

    fn insert_record(&self, record: SecretRecord) -> Result<FieldWrite> {
        let mut state = self.records.lock();
        if state.records.contains_key(&record.id) {
            return Err(VaultError::Store(format!(
                "record {} already exists",
                record.id
            )));
        }
        let current = state.epoch_of(record.group_id());
        if record.field.epoch < current {
            return Ok(FieldWrite::StaleEpoch { stored: current });
        }
        state.records.insert(record.id, record);
        Ok(FieldWrite::Written)
    }

    fn get_record(&self, id: &RecordId) -> Result<Option<SecretRecord>> {
        Ok(self.records.lock().records.get(id).cloned())
    }

    fn list_group_records(&self, group_id: &GroupId) -> Result<Vec<SecretRecord>> {
        let state = self.records.lock();
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.group_id() == group_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    fn swap_field(
        &self,
        id: &RecordId,
        expected: &EncryptedField,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.records.lock();
        let Some(record) = state.records.get_mut(id) else {
            return Ok(false);
        };
        if record.field != *expected {
            return Ok(false);
        }
        check_same_group(record, &new)?;
        record.field = new;
        record.updated_at = now;
        Ok(true)
    }

    fn replace_field(
        &self,
        id: &RecordId,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<FieldWrite> {
        let mut state = self.records.lock();
        let group_epoch = state.epoch_of(&new.group_id);
        let Some(record) = state.records.get_mut(id) else {
            return Ok(FieldWrite::Missing);
        };
        check_same_group(record, &new)?;
        let floor = record.field.epoch.max(group_epoch);
        if new.epoch < floor {
            return Ok(FieldWrite::StaleEpoch { stored: floor });
        }
        record.field = new;
        record.updated_at = now;
        Ok(FieldWrite::Written)
    }

    fn record_access(
        &self,
        id: &RecordId,
        principal: &PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.records.lock();
        let Some(record) = state.records.get_mut(id) else {
            return Ok(());
        };
        record.last_accessed = Some(at);
        record.access_count += 1;
        state.access_log.push(AccessLogEntry {
            record_id: *id,
            principal: principal.clone(),
            accessed_at: at,
        });
        Ok(())
    }

    fn access_log(&self, id: &RecordId) -> Result<Vec<AccessLogEntry>> {
        let state = self.records.lock();
        Ok(state
            .access_log
            .iter()
            .rev()
            .filter(|entry| entry.record_id == *id)
            .cloned()
            .collect())
    }

    fn delete_record(&self, id: &RecordId) -> Result<bool> {
        let mut state = self.records.lock();
        if state.records.remove(id).is_none() {
            return Ok(false);
        }
        state.access_log.retain(|entry| entry.record_id != *id);
        Ok(true)
    }

    fn purge_group(&self, group_id: &GroupId) -> Result<usize> {
        let mut state = self.records.lock();
        let RecordState {
            records,
            epochs,
            access_log,
        } = &mut *state;
        let before = records.len();
        records.retain(|_, r| r.group_id() != group_id);
        access_log.retain(|entry| records.contains_key(&entry.record_id));
        epochs.remove(group_id);
        Ok(before - records.len())
    }
}

fn check_same_group(record: &SecretRecord, new: &EncryptedField) -> Result<()> {
    if record.field.group_id != new.group_id {
        return Err(VaultError::InvalidArgument(format!(
            "record {} belongs to group {}, not {}",
            record.id, record.field.group_id, new.group_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn record(group: &GroupId, epoch: u32, ciphertext: &str) -> SecretRecord {
        let now = Utc::now();
        SecretRecord {
            id: RecordId::generate(),
            label: "password".to_string(),
            field: EncryptedField {
                group_id: group.clone(),
                epoch,
                ciphertext: ciphertext.to_string(),
            },
            created_at: now,
            updated_at: now,
            last_accessed: None,
            access_count: 0,
        }
    }

    #[test]
    fn creator_becomes_owner() {
        let store = MemoryStore::new();
        store.register_principal(&pid("alice"));
        let group = store.create_group(&pid("alice"), "  Ops  ").unwrap();
        assert_eq!(group.name, "Ops");
        assert_eq!(group.owner, pid("alice"));
        assert_eq!(
            store.role(&pid("alice"), &group.id).unwrap(),
            Some(Role::Owner)
        );
    }

    #[test]
    fn banned_principal_cannot_create_group() {
        let store = MemoryStore::new();
        store.ban_principal(&pid("eve"));
        assert!(store.create_group(&pid("eve"), "x").is_err());
        assert!(store.create_group(&pid("nobody"), "x").is_err());
    }

    #[test]
    fn owner_role_is_immutable() {
        let store = MemoryStore::new();
        store.register_principal(&pid("alice"));
        let group = store.create_group(&pid("alice"), "Ops").unwrap();

        assert!(store.add_member(&group.id, &pid("bob"), Role::Owner).is_err());
        store.add_member(&group.id, &pid("bob"), Role::Member).unwrap();
        assert!(store
            .change_role(&group.id, &pid("bob"), Role::Owner)
            .is_err());
        assert!(store
            .change_role(&group.id, &pid("alice"), Role::Admin)
            .is_err());
        assert!(store.remove_member(&group.id, &pid("alice")).is_err());

        store
            .change_role(&group.id, &pid("bob"), Role::Admin)
            .unwrap();
        assert_eq!(
            store.members(&group.id),
            vec![(pid("alice"), Role::Owner), (pid("bob"), Role::Admin)]
        );
    }

    #[test]
    fn duplicate_membership_is_rejected() {
        let store = MemoryStore::new();
        store.register_principal(&pid("alice"));
        let group = store.create_group(&pid("alice"), "Ops").unwrap();
        store.add_member(&group.id, &pid("bob"), Role::Member).unwrap();
        assert!(store.add_member(&group.id, &pid("bob"), Role::Admin).is_err());
        assert!(store.remove_member(&group.id, &pid("bob")).unwrap());
        assert!(!store.remove_member(&group.id, &pid("bob")).unwrap());
    }

    #[test]
    fn epochs_start_at_zero_and_advance_by_one() {
        let store = MemoryStore::new();
        let group = GroupId::generate();
        assert_eq!(store.group_epoch(&group).unwrap(), EpochState::INITIAL);
        let now = Utc::now();
        let state = store.advance_group_epoch(&group, now).unwrap();
        assert_eq!(state.epoch, 1);
        assert_eq!(state.rotated_at, Some(now));
        assert_eq!(store.advance_group_epoch(&group, now).unwrap().epoch, 2);
    }

    #[test]
    fn swap_requires_exact_match() {
        let store = MemoryStore::new();
        let group = GroupId::generate();
        let rec = record(&group, 0, "v0");
        let id = rec.id;
        store.insert_record(rec.clone()).unwrap();

        let newer = EncryptedField {
            epoch: 1,
            ciphertext: "v1".to_string(),
            ..rec.field.clone()
        };
        assert!(store
            .swap_field(&id, &rec.field, newer.clone(), Utc::now())
            .unwrap());
        // The expected value is gone now.
        assert!(!store
            .swap_field(&id, &rec.field, rec.field.clone(), Utc::now())
            .unwrap());
        assert_eq!(store.get_record(&id).unwrap().unwrap().field, newer);
    }

    #[test]
    fn replace_refuses_older_epoch() {
        let store = MemoryStore::new();
        let group = GroupId::generate();
        let rec = record(&group, 2, "v2");
        let id = rec.id;
        store.insert_record(rec.clone()).unwrap();

        let stale = EncryptedField {
            epoch: 1,
            ciphertext: "old".to_string(),
            ..rec.field.clone()
        };
        assert_eq!(
            store.replace_field(&id, stale, Utc::now()).unwrap(),
            FieldWrite::StaleEpoch { stored: 2 }
        );
        let same = EncryptedField {
            ciphertext: "v2b".to_string(),
            ..rec.field.clone()
        };
        assert_eq!(
            store.replace_field(&id, same, Utc::now()).unwrap(),
            FieldWrite::Written
        );
        assert_eq!(
            store
                .replace_field(&RecordId::generate(), rec.field, Utc::now())
                .unwrap(),
            FieldWrite::Missing
        );
    }

    #[test]
    fn writes_cannot_move_a_record_between_groups() {
        let store = MemoryStore::new();
        let rec = record(&GroupId::generate(), 0, "v0");
        let id = rec.id;
        store.insert_record(rec).unwrap();
        let foreign = EncryptedField {
            group_id: GroupId::generate(),
            epoch: 0,
            ciphertext: "x".to_string(),
        };
        assert!(store.replace_field(&id, foreign, Utc::now()).is_err());
    }

    #[test]
    fn replace_refuses_field_older_than_group() {
        let store = MemoryStore::new();
        let group = GroupId::generate();
        let rec = record(&group, 0, "v0");
        let id = rec.id;
        store.insert_record(rec.clone()).unwrap();
        store.advance_group_epoch(&group, Utc::now()).unwrap();

        let still_old = EncryptedField {
            ciphertext: "v0b".to_string(),
            ..rec.field.clone()
        };
        assert_eq!(
            store.replace_field(&id, still_old, Utc::now()).unwrap(),
            FieldWrite::StaleEpoch { stored: 1 }
        );
        assert_eq!(store.get_record(&id).unwrap().unwrap().field, rec.field);
    }

    #[test]
    fn insert_refuses_field_older_than_group() {
        let store = MemoryStore::new();
        let group = GroupId::generate();
        store.advance_group_epoch(&group, Utc::now()).unwrap();
        store.advance_group_epoch(&group, Utc::now()).unwrap();

        let stale = record(&group, 1, "v1");
        assert_eq!(
            store.insert_record(stale.clone()).unwrap(),
            FieldWrite::StaleEpoch { stored: 2 }
        );
        assert!(store.get_record(&stale.id).unwrap().is_none());
        assert_eq!(
            store.insert_record(record(&group, 2, "v2")).unwrap(),
            FieldWrite::Written
        );
    }

    #[test]
    fn access_is_counted_and_logged() {
        let store = MemoryStore::new();
        let rec = record(&GroupId::generate(), 0, "v0");
        let id = rec.id;
        store.insert_record(rec).unwrap();
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(1);
        store.record_access(&id, &pid("alice"), first).unwrap();
        store.record_access(&id, &pid("bob"), second).unwrap();
        store
            .record_access(&RecordId::generate(), &pid("bob"), second)
            .unwrap();

        let stored = store.get_record(&id).unwrap().unwrap();
        assert_eq!(stored.access_count, 2);
        assert_eq!(stored.last_accessed, Some(second));

        let log = store.access_log(&id).unwrap();
        let who: Vec<_> = log.iter().map(|e| e.principal.as_str()).collect();
        assert_eq!(who, ["bob", "alice"]);
        assert_eq!(log[1].accessed_at, first);

        assert!(store.delete_record(&id).unwrap());
        assert!(store.access_log(&id).unwrap().is_empty());
    }

    #[test]
    fn delete_group_cascades_to_records() {
        let store = MemoryStore::new();
        store.register_principal(&pid("alice"));
        let group = store.create_group(&pid("alice"), "Ops").unwrap();
        let other = GroupId::generate();
        store.insert_record(record(&group.id, 0, "a")).unwrap();
        store.insert_record(record(&group.id, 0, "b")).unwrap();
        let kept = record(&other, 0, "c");
        store.insert_record(kept.clone()).unwrap();
        store.advance_group_epoch(&group.id, Utc::now()).unwrap();
        let doomed = store.list_group_records(&group.id).unwrap();
        store
            .record_access(&doomed[0].id, &pid("alice"), Utc::now())
            .unwrap();
        store
            .record_access(&kept.id, &pid("alice"), Utc::now())
            .unwrap();

        assert_eq!(store.delete_group(&group.id).unwrap(), 2);
        assert!(store.access_log(&doomed[0].id).unwrap().is_empty());
        assert_eq!(store.access_log(&kept.id).unwrap().len(), 1);
        assert!(store.group(&group.id).unwrap().is_none());
        assert!(store.role(&pid("alice"), &group.id).unwrap().is_none());
        assert!(store.list_group_records(&group.id).unwrap().is_empty());
        assert_eq!(store.list_group_records(&other).unwrap().len(), 1);
        assert_eq!(store.group_epoch(&group.id).unwrap(), EpochState::INITIAL);
    }

    #[test]
    fn duplicate_record_id_is_rejected() {
        let store = MemoryStore::new();
        let rec = record(&GroupId::generate(), 0, "v0");
        store.insert_record(rec.clone()).unwrap();
        assert!(store.insert_record(rec).is_err());
    }
}
