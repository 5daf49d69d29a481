//! SqliteStore: [`SecretStore`] persisted in a SQLite database.
//!
//! One connection behind a `parking_lot::Mutex`; every trait method runs
//! while holding it, and multi-statement writes run inside a transaction.
//! Timestamps are stored as Unix milliseconds; anything finer is dropped.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, VaultError};
use crate::types::{
    AccessLogEntry, EncryptedField, EpochState, GroupId, PrincipalId, RecordId, SecretRecord,
};

use super::traits::{FieldWrite, SecretStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS secret_records (
    id            TEXT PRIMARY KEY NOT NULL,
    group_id      TEXT NOT NULL,
    label         TEXT NOT NULL,
    epoch         INTEGER NOT NULL,
    ciphertext    TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    last_accessed INTEGER,
    access_count  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_secret_records_group ON secret_records (group_id);
CREATE TABLE IF NOT EXISTS group_epochs (
    group_id   TEXT PRIMARY KEY NOT NULL,
    epoch      INTEGER NOT NULL,
    rotated_at INTEGER
);
CREATE TABLE IF NOT EXISTS access_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id   TEXT NOT NULL,
    principal   TEXT NOT NULL,
    accessed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_access_log_record ON access_log (record_id, accessed_at);
";

const RECORD_COLUMNS: &str = "id, group_id, label, epoch, ciphertext, created_at, updated_at, \
                              last_accessed, access_count";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000; PRAGMA secure_delete=ON;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Column values as SQLite returns them, before domain validation.
struct RawRecord {
    id: String,
    group_id: String,
    label: String,
    epoch: i64,
    ciphertext: String,
    created_at: i64,
    updated_at: i64,
    last_accessed: Option<i64>,
    access_count: i64,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        group_id: row.get(1)?,
        label: row.get(2)?,
        epoch: row.get(3)?,
        ciphertext: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        last_accessed: row.get(7)?,
        access_count: row.get(8)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<SecretRecord> {
        Ok(SecretRecord {
            id: RecordId::parse(&self.id).map_err(|_| corrupt("record id", &self.id))?,
            label: self.label,
            field: EncryptedField {
                group_id: GroupId::new(self.group_id)
                    .map_err(|_| corrupt("group id", &self.id))?,
                epoch: epoch_from_sql(self.epoch)?,
                ciphertext: self.ciphertext,
            },
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            last_accessed: self.last_accessed.map(from_millis).transpose()?,
            access_count: u64::try_from(self.access_count)
                .map_err(|_| corrupt("access count", &self.id))?,
        })
    }
}

fn corrupt(what: &str, id: &str) -> VaultError {
    VaultError::Store(format!("corrupt {} in row {}", what, id))
}

fn epoch_from_sql(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| VaultError::Store(format!("epoch out of range: {}", value)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| VaultError::Store(format!("timestamp out of range: {}", ms)))
}

/// Current epoch of a group, read on the caller's connection or transaction.
fn current_epoch(conn: &Connection, group_id: &str) -> Result<u32> {
    let epoch: Option<i64> = conn
        .query_row(
            "SELECT epoch FROM group_epochs WHERE group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(epoch.map(epoch_from_sql).transpose()?.unwrap_or(0))
}

fn check_group(stored: &str, id: &RecordId, new: &EncryptedField) -> Result<()> {
    if stored != new.group_id.as_str() {
        return Err(VaultError::InvalidArgument(format!(
            "record {} belongs to group {}, not {}",
            id, stored, new.group_id
        )));
    }
    Ok(())
}

impl SecretStore for SqliteStore {
    fn group_epoch(&self, group_id: &GroupId) -> Result<EpochState> {
        let conn = self.conn.lock();
        let row: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT epoch, rotated_at FROM group_epochs WHERE group_id = ?1",
                params![group_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(EpochState::INITIAL),
            Some((epoch, rotated_at)) => Ok(EpochState {
                epoch: epoch_from_sql(epoch)?,
                rotated_at: rotated_at.map(from_millis).transpose()?,
            }),
        }
    }

    fn advance_group_epoch(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<EpochState> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current = current_epoch(&tx, group_id.as_str())?;
        let next = current.checked_add(1).ok_or_else(|| {
            VaultError::Store(format!("epoch counter exhausted for group {}", group_id))
        })?;
        tx.execute(
            "INSERT INTO group_epochs (group_id, epoch, rotated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id) DO UPDATE SET epoch = excluded.epoch, rotated_at = excluded.rotated_at",
            params![group_id.as_str(), i64::from(next), now.timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(EpochState {
            epoch: next,
            rotated_at: Some(now),
        })
    }

    fn insert_record(&self, record: SecretRecord) -> Result<FieldWrite> {
        let access_count = i64::try_from(record.access_count)
            .map_err(|_| VaultError::InvalidArgument("access count out of range".to_string()))?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current = current_epoch(&tx, record.field.group_id.as_str())?;
        if record.field.epoch < current {
            return Ok(FieldWrite::StaleEpoch { stored: current });
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO secret_records
             (id, group_id, label, epoch, ciphertext, created_at, updated_at, last_accessed, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.field.group_id.as_str(),
                record.label,
                i64::from(record.field.epoch),
                record.field.ciphertext,
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
                record.last_accessed.map(|t| t.timestamp_millis()),
                access_count,
            ],
        )?;
        if inserted == 0 {
            return Err(VaultError::Store(format!(
                "record {} already exists",
                record.id
            )));
        }
        tx.commit()?;
        Ok(FieldWrite::Written)
    }

    fn get_record(&self, id: &RecordId) -> Result<Option<SecretRecord>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM secret_records WHERE id = ?1", RECORD_COLUMNS),
                params![id.to_string()],
                read_raw,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn list_group_records(&self, group_id: &GroupId) -> Result<Vec<SecretRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM secret_records WHERE group_id = ?1 ORDER BY created_at, id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![group_id.as_str()], read_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    fn swap_field(
        &self,
        id: &RecordId,
        expected: &EncryptedField,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let stored: Option<String> = tx
            .query_row(
                "SELECT group_id FROM secret_records WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored_group) = stored else {
            return Ok(false);
        };
        if stored_group != expected.group_id.as_str() {
            return Ok(false);
        }
        check_group(&stored_group, id, &new)?;
        let changed = tx.execute(
            "UPDATE secret_records SET epoch = ?2, ciphertext = ?3, updated_at = ?4
             WHERE id = ?1 AND epoch = ?5 AND ciphertext = ?6",
            params![
                id.to_string(),
                i64::from(new.epoch),
                new.ciphertext,
                now.timestamp_millis(),
                i64::from(expected.epoch),
                expected.ciphertext,
            ],
        )?;
        tx.commit()?;
        Ok(changed == 1)
    }

    fn replace_field(
        &self,
        id: &RecordId,
        new: EncryptedField,
        now: DateTime<Utc>,
    ) -> Result<FieldWrite> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let stored: Option<(String, i64)> = tx
            .query_row(
                "SELECT group_id, epoch FROM secret_records WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((stored_group, stored_epoch)) = stored else {
            return Ok(FieldWrite::Missing);
        };
        check_group(&stored_group, id, &new)?;
        let floor = epoch_from_sql(stored_epoch)?.max(current_epoch(&tx, &stored_group)?);
        if new.epoch < floor {
            return Ok(FieldWrite::StaleEpoch { stored: floor });
        }
        tx.execute(
            "UPDATE secret_records SET epoch = ?2, ciphertext = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                i64::from(new.epoch),
                new.ciphertext,
                now.timestamp_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(FieldWrite::Written)
    }

    fn record_access(
        &self,
        id: &RecordId,
        principal: &PrincipalId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE secret_records SET last_accessed = ?2, access_count = access_count + 1
             WHERE id = ?1",
            params![id.to_string(), at.timestamp_millis()],
        )?;
        if changed == 1 {
            tx.execute(
                "INSERT INTO access_log (record_id, principal, accessed_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), principal.as_str(), at.timestamp_millis()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn access_log(&self, id: &RecordId) -> Result<Vec<AccessLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT principal, accessed_at FROM access_log WHERE record_id = ?1
             ORDER BY accessed_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(principal, accessed_at)| {
                Ok(AccessLogEntry {
                    record_id: *id,
                    principal: PrincipalId::new(principal)
                        .map_err(|_| corrupt("principal", &id.to_string()))?,
                    accessed_at: from_millis(accessed_at)?,
                })
            })
            .collect()
    }

    fn delete_record(&self, id: &RecordId) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM secret_records WHERE id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM access_log WHERE record_id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn purge_group(&self, group_id: &GroupId) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM access_log
             WHERE record_id IN (SELECT id FROM secret_records WHERE group_id = ?1)",
            params![group_id.as_str()],
        )?;
        let removed = tx.execute(
            "DELETE FROM secret_records WHERE group_id = ?1",
            params![group_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM group_epochs WHERE group_id = ?1",
            params![group_id.as_str()],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}
