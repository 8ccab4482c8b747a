//! rollcall-store: SQLite persistence for identities and attendance.
//!
//! One [`Store`] wraps one connection. The daemon opens two (engine thread and
//! HTTP side); SQLite serializes their writes and `busy_timeout` absorbs the
//! contention.

pub mod export;

use chrono::{DateTime, Utc};
use rollcall_core::{AttendanceLog, AttendanceRecord, AttendanceStatus, Embedding, Identity, IdentityStore};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use export::write_csv;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    reference   TEXT UNIQUE,
    embeddings  BLOB
);
CREATE TABLE IF NOT EXISTS attendance (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id   INTEGER NOT NULL REFERENCES identities(id),
    timestamp_ms  INTEGER NOT NULL,
    status        TEXT NOT NULL,
    temperature   REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_identity_time
    ON attendance(identity_id, timestamp_ms);
";

/// Database path from `ROLLCALL_DB_PATH`, else `$XDG_DATA_HOME/rollcall/rollcall.db`.
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROLLCALL_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("rollcall.db")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity {0} not found")]
    NotFound(i64),
    #[error("an identity with that name or reference already exists: {0}")]
    Duplicate(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Which attendance rows a purge removes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttendanceFilter {
    All,
    /// Records at or after the timestamp.
    Since(DateTime<Utc>),
    Identity(i64),
}

/// Attendance record joined with its identity, as shown in reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub identity_id: i64,
    pub name: String,
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub temperature: f32,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let store = Self::init(conn)?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Register a person with no embeddings yet.
    pub fn create_identity(&self, name: &str, reference: Option<&str>) -> Result<Identity, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO identities (name, reference) VALUES (?1, ?2)",
            params![name, reference],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                return Err(StoreError::Duplicate(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        let id = self.conn.last_insert_rowid();
        tracing::info!(id, name, "identity created");
        Ok(Identity {
            id,
            name: name.to_string(),
            reference: reference.map(str::to_string),
            embeddings: None,
        })
    }

    pub fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, reference, embeddings FROM identities ORDER BY id")?;
        let rows = stmt.query_map([], identity_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_identity(&self, id: i64) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, reference, embeddings FROM identities WHERE id = ?1",
                [id],
                identity_from_row,
            )
            .optional()?)
    }

    /// Change the name and reference of an existing identity.
    pub fn update_identity(&self, id: i64, name: &str, reference: Option<&str>) -> Result<Identity, StoreError> {
        let updated = self.conn.execute(
            "UPDATE identities SET name = ?1, reference = ?2 WHERE id = ?3",
            params![name, reference, id],
        );
        match updated {
            Ok(0) => return Err(StoreError::NotFound(id)),
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                return Err(StoreError::Duplicate(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(id, name, "identity updated");
        self.get_identity(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Replace the identity's embedding set.
    pub fn save_embeddings(&self, id: i64, embeddings: &[Embedding]) -> Result<(), StoreError> {
        let blob = Embedding::encode_set(embeddings)?;
        let changed = self
            .conn
            .execute("UPDATE identities SET embeddings = ?1 WHERE id = ?2", params![blob, id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        tracing::info!(id, samples = embeddings.len(), "embeddings saved");
        Ok(())
    }

    /// Delete an identity and its attendance history. Returns false if it did not exist.
    pub fn delete_identity(&self, id: i64) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM attendance WHERE identity_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM identities WHERE id = ?1", [id])?;
        tx.commit()?;
        if removed > 0 {
            tracing::info!(id, "identity deleted");
        }
        Ok(removed > 0)
    }

    pub fn most_recent(&self, identity_id: i64) -> Result<Option<AttendanceRecord>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT identity_id, timestamp_ms, status, temperature FROM attendance
                 WHERE identity_id = ?1 ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
                [identity_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?, row.get::<_, f64>(3)?)),
            )
            .optional()?;

        raw.map(|(identity_id, ms, status, temperature)| {
            Ok(AttendanceRecord {
                identity_id,
                timestamp: timestamp_from_ms(ms)?,
                status: parse_status(&status)?,
                temperature: temperature as f32,
            })
        })
        .transpose()
    }

    pub fn insert(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO attendance (identity_id, timestamp_ms, status, temperature) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.identity_id,
                record.timestamp.timestamp_millis(),
                record.status.as_str(),
                record.temperature as f64
            ],
        )?;
        Ok(())
    }

    /// Delete attendance rows matching `filter`. Returns the number removed.
    pub fn purge(&self, filter: AttendanceFilter) -> Result<usize, StoreError> {
        let removed = match filter {
            AttendanceFilter::All => self.conn.execute("DELETE FROM attendance", [])?,
            AttendanceFilter::Since(ts) => self
                .conn
                .execute("DELETE FROM attendance WHERE timestamp_ms >= ?1", [ts.timestamp_millis()])?,
            AttendanceFilter::Identity(id) => self
                .conn
                .execute("DELETE FROM attendance WHERE identity_id = ?1", [id])?,
        };
        tracing::info!(?filter, removed, "attendance purged");
        Ok(removed)
    }

    /// Every attendance record, newest first.
    pub fn report(&self) -> Result<Vec<ReportRow>, StoreError> {
        self.report_rows(
            "SELECT a.identity_id, i.name, i.reference, a.timestamp_ms, a.status, a.temperature
             FROM attendance a JOIN identities i ON i.id = a.identity_id
             ORDER BY a.timestamp_ms DESC, a.id DESC",
        )
    }

    /// The newest record of each identity that has any, ordered by name.
    pub fn latest_per_identity(&self) -> Result<Vec<ReportRow>, StoreError> {
        self.report_rows(
            "SELECT a.identity_id, i.name, i.reference, a.timestamp_ms, a.status, a.temperature
             FROM attendance a JOIN identities i ON i.id = a.identity_id
             WHERE a.id = (SELECT a2.id FROM attendance a2 WHERE a2.identity_id = a.identity_id
                           ORDER BY a2.timestamp_ms DESC, a2.id DESC LIMIT 1)
             ORDER BY i.name",
        )
    }

    fn report_rows(&self, sql: &str) -> Result<Vec<ReportRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(identity_id, name, reference, ms, status, temperature)| {
                Ok(ReportRow {
                    identity_id,
                    name,
                    reference,
                    timestamp: timestamp_from_ms(ms)?,
                    status: parse_status(&status)?,
                    temperature: temperature as f32,
                })
            })
            .collect()
    }
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        reference: row.get(2)?,
        embeddings: row.get(3)?,
    })
}

fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

fn parse_status(s: &str) -> Result<AttendanceStatus, StoreError> {
    s.parse().map_err(|e: rollcall_core::attendance::ParseStatusError| StoreError::Corrupt(e.to_string()))
}

impl IdentityStore for Store {
    type Error = StoreError;

    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Store::list_identities(self)
    }

    fn get_identity(&self, id: i64) -> Result<Option<Identity>, StoreError> {
        Store::get_identity(self, id)
    }

    fn save_embeddings(&self, id: i64, embeddings: &[Embedding]) -> Result<(), StoreError> {
        Store::save_embeddings(self, id, embeddings)
    }

    fn delete_identity(&self, id: i64) -> Result<bool, StoreError> {
        Store::delete_identity(self, id)
    }
}

impl AttendanceLog for Store {
    type Error = StoreError;

    fn most_recent(&self, identity_id: i64) -> Result<Option<AttendanceRecord>, StoreError> {
        Store::most_recent(self, identity_id)
    }

    fn insert(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        Store::insert(self, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::{AttendanceRecorder, FaceGallery, RecordOutcome};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(identity_id: i64, secs: i64, temperature: f32) -> AttendanceRecord {
        AttendanceRecord {
            identity_id,
            timestamp: at(secs),
            status: if temperature < 37.5 {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Anomaly
            },
            temperature,
        }
    }

    #[test]
    fn test_create_and_list_identities() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_identity("Ana", Some("R-001")).unwrap();
        let ben = store.create_identity("Ben", None).unwrap();
        assert_ne!(ana.id, ben.id);

        let all = store.list_identities().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Ana");
        assert_eq!(all[0].reference.as_deref(), Some("R-001"));
        assert_eq!(all[1].embeddings, None);
        assert_eq!(store.get_identity(ben.id).unwrap().unwrap().name, "Ben");
        assert_eq!(store.get_identity(999).unwrap(), None);
    }

    #[test]
    fn test_duplicate_name_or_reference_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.create_identity("Ana", Some("R-001")).unwrap();
        assert!(matches!(store.create_identity("Ana", None), Err(StoreError::Duplicate(_))));
        assert!(matches!(
            store.create_identity("Other", Some("R-001")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_update_identity() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_identity("Ana", Some("R-1")).unwrap().id;
        store.create_identity("Ben", Some("R-2")).unwrap();

        let renamed = store.update_identity(ana, "Ana Maria", None).unwrap();
        assert_eq!(renamed.name, "Ana Maria");
        assert_eq!(renamed.reference, None);
        assert!(matches!(store.update_identity(ana, "Ben", None), Err(StoreError::Duplicate(_))));
        assert!(matches!(store.update_identity(77, "X", None), Err(StoreError::NotFound(77))));
    }

    #[test]
    fn test_save_embeddings_replaces_set() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_identity("Ana", None).unwrap().id;

        store
            .save_embeddings(id, &[Embedding::new(vec![1.0, 0.0]), Embedding::new(vec![0.0, 1.0])])
            .unwrap();
        store.save_embeddings(id, &[Embedding::new(vec![0.5, 0.5])]).unwrap();

        let blob = store.get_identity(id).unwrap().unwrap().embeddings.unwrap();
        let set = Embedding::decode_set(&blob).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_save_embeddings_unknown_identity() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.save_embeddings(42, &[Embedding::new(vec![1.0])]),
            Err(StoreError::NotFound(42))
        ));
    }

    #[test]
    fn test_gallery_loads_from_store() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_identity("Ana", Some("R-1")).unwrap().id;
        store.create_identity("Ben", None).unwrap();
        store
            .save_embeddings(ana, &[Embedding::new(vec![1.0, 0.0]), Embedding::new(vec![0.9, 0.1])])
            .unwrap();

        let gallery = FaceGallery::load(&store).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.identity_count(), 1);
        assert_eq!(gallery.entries()[0].reference.as_deref(), Some("R-1"));
    }

    #[test]
    fn test_delete_identity_cascades_attendance() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_identity("Ana", None).unwrap().id;
        let ben = store.create_identity("Ben", None).unwrap().id;
        store.insert(&record(ana, 0, 36.5)).unwrap();
        store.insert(&record(ben, 0, 36.5)).unwrap();

        assert!(store.delete_identity(ana).unwrap());
        assert!(!store.delete_identity(ana).unwrap());
        assert_eq!(store.most_recent(ana).unwrap(), None);
        assert_eq!(store.report().unwrap().len(), 1);
    }

    #[test]
    fn test_most_recent_picks_latest() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_identity("Ana", None).unwrap().id;
        store.insert(&record(id, 10, 36.5)).unwrap();
        store.insert(&record(id, 30, 38.0)).unwrap();
        store.insert(&record(id, 20, 36.9)).unwrap();

        let latest = store.most_recent(id).unwrap().unwrap();
        assert_eq!(latest.timestamp, at(30));
        assert_eq!(latest.status, AttendanceStatus::Anomaly);
        assert_eq!(latest.temperature, 38.0);
    }

    #[test]
    fn test_recorder_debounces_against_store() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_identity("Ana", None).unwrap().id;
        let recorder = AttendanceRecorder::default();

        assert_eq!(
            recorder.record(&store, id, 36.2, at(0)).unwrap(),
            RecordOutcome::Recorded(AttendanceStatus::Present)
        );
        assert_eq!(recorder.record(&store, id, 36.2, at(3)).unwrap(), RecordOutcome::Debounced);
        assert_eq!(
            recorder.record(&store, id, 38.0, at(5)).unwrap(),
            RecordOutcome::Recorded(AttendanceStatus::Anomaly)
        );
        assert_eq!(store.report().unwrap().len(), 2);
    }

    #[test]
    fn test_purge_filters() {
        let store = Store::open_in_memory().unwrap();
        let ana = store.create_identity("Ana", None).unwrap().id;
        let ben = store.create_identity("Ben", None).unwrap().id;
        store.insert(&record(ana, 0, 36.5)).unwrap();
        store.insert(&record(ana, 100, 36.5)).unwrap();
        store.insert(&record(ben, 200, 36.5)).unwrap();

        assert_eq!(store.purge(AttendanceFilter::Since(at(100))).unwrap(), 2);
        assert_eq!(store.report().unwrap().len(), 1);
        assert_eq!(store.purge(AttendanceFilter::Identity(ben)).unwrap(), 0);
        assert_eq!(store.purge(AttendanceFilter::Identity(ana)).unwrap(), 1);
        store.insert(&record(ben, 300, 36.5)).unwrap();
        assert_eq!(store.purge(AttendanceFilter::All).unwrap(), 1);
        assert!(store.report().unwrap().is_empty());
    }

    #[test]
    fn test_report_and_latest() {
        let store = Store::open_in_memory().unwrap();
        let ben = store.create_identity("Ben", None).unwrap().id;
        let ana = store.create_identity("Ana", Some("R-7")).unwrap().id;
        store.insert(&record(ben, 10, 36.5)).unwrap();
        store.insert(&record(ana, 20, 37.8)).unwrap();
        store.insert(&record(ben, 30, 36.7)).unwrap();

        let report = store.report().unwrap();
        let times: Vec<_> = report.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(30), at(20), at(10)]);

        let latest = store.latest_per_identity().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].name, "Ana");
        assert_eq!(latest[0].reference.as_deref(), Some("R-7"));
        assert_eq!(latest[0].status, AttendanceStatus::Anomaly);
        assert_eq!(latest[1].name, "Ben");
        assert_eq!(latest[1].timestamp, at(30));
    }

    #[test]
    fn test_on_disk_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rollcall.db");

        let id = {
            let store = Store::open(&path).unwrap();
            let id = store.create_identity("Ana", None).unwrap().id;
            store.insert(&record(id, 0, 36.5)).unwrap();
            id
        };

        let a = Store::open(&path).unwrap();
        let b = Store::open(&path).unwrap();
        b.insert(&record(id, 60, 36.6)).unwrap();
        assert_eq!(a.most_recent(id).unwrap().unwrap().timestamp, at(60));
    }
}
