//! `SecretVault` with records persisted in SQLite and membership in memory.
#![cfg(feature = "sqlite")]

use std::sync::Arc;

use passman_vault::{
    MemoryStore, PrincipalId, Role, RootSecret, RotationPolicy, SecretStore, SecretVault,
    SqliteStore, VaultConfig,
};

fn pid(s: &str) -> PrincipalId {
    PrincipalId::new(s).expect("principal id")
}

fn config(policy: RotationPolicy) -> VaultConfig {
    VaultConfig::new(RootSecret::new(vec![0x5cu8; 32]).expect("root secret"))
        .with_rotation_policy(policy)
}

#[test]
fn secrets_survive_reopen_and_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.sqlite");

    let directory = Arc::new(MemoryStore::new());
    directory.register_principal(&pid("alice"));
    directory.register_principal(&pid("bob"));
    let group = directory.create_group(&pid("alice"), "Ops").unwrap();
    directory
        .add_member(&group.id, &pid("bob"), Role::Admin)
        .unwrap();

    let record_id = {
        let vault = SecretVault::new(
            config(RotationPolicy::Eager),
            directory.clone(),
            SqliteStore::open(&path).unwrap(),
        );
        let record = vault
            .create_secret(&pid("alice"), &group.id, "db-password", "correct horse")
            .unwrap();
        let report = vault.rotate_group_key_with_report(&group.id).unwrap();
        assert_eq!(report.reencrypted, 1);
        record.id
    };

    // Same root secret, fresh process view of the database.
    let vault = SecretVault::new(
        config(RotationPolicy::Lazy),
        directory.clone(),
        SqliteStore::open(&path).unwrap(),
    );
    let stored = vault.store().get_record(&record_id).unwrap().unwrap();
    assert_eq!(stored.field.epoch, 1);
    assert_eq!(vault.store().group_epoch(&group.id).unwrap().epoch, 1);
    assert_eq!(
        vault.read_secret(&pid("bob"), &record_id).unwrap().as_str(),
        "correct horse"
    );

    // Lazy rotation: the next read upgrades the row in place.
    vault.rotate_group_key(&group.id).unwrap();
    vault.read_secret(&pid("bob"), &record_id).unwrap();
    let stored = vault.store().get_record(&record_id).unwrap().unwrap();
    assert_eq!(stored.field.epoch, 2);
    assert_eq!(stored.access_count, 2);

    let log = vault.access_log(&pid("alice"), &record_id).unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|entry| entry.principal == pid("bob")));
}

#[test]
fn returned_records_match_what_was_stored() {
    let directory = Arc::new(MemoryStore::new());
    directory.register_principal(&pid("alice"));
    let group = directory.create_group(&pid("alice"), "Ops").unwrap();
    let vault = SecretVault::new(
        config(RotationPolicy::Lazy),
        directory,
        SqliteStore::open_in_memory().unwrap(),
    );

    let created = vault
        .create_secret(&pid("alice"), &group.id, "password", "v0")
        .unwrap();
    assert_eq!(vault.store().get_record(&created.id).unwrap(), Some(created.clone()));

    let updated = vault
        .update_secret(&pid("alice"), &created.id, "v1")
        .unwrap();
    assert_eq!(vault.store().get_record(&created.id).unwrap(), Some(updated));
}

#[test]
fn wrong_root_secret_cannot_read() {
    let directory = Arc::new(MemoryStore::new());
    directory.register_principal(&pid("alice"));
    let group = directory.create_group(&pid("alice"), "Ops").unwrap();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let vault = SecretVault::new(config(RotationPolicy::Lazy), directory.clone(), store.clone());
    let record = vault
        .create_secret(&pid("alice"), &group.id, "password", "x")
        .unwrap();

    let other = VaultConfig::new(RootSecret::new(vec![0x77u8; 32]).unwrap());
    let foreign = SecretVault::new(other, directory, store);
    let err = foreign.read_secret(&pid("alice"), &record.id).unwrap_err();
    assert!(matches!(err, passman_vault::VaultError::Decryption));
}
