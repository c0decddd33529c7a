//! Resumable bulk upgrade of plaintext rows to the current scheme.
//!
//! Only rows whose `encryption_version` is 0 are ever fetched, in keyset
//! order, so an interrupted run can simply be started again.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::crypto::codec::{CryptoError, FieldCipher};

/// Errors surfaced by a record store during migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("record store error: {0}")]
    Store(String),

    #[error("invalid migration target: {0}")]
    InvalidTarget(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A row still at `encryption_version = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    /// Keyset cursor for the row.
    pub id: String,
    /// The allow-listed columns of the row.
    pub fields: Map<String, Value>,
}

/// Storage seam for the migration driver.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows with `encryption_version = 0` and id after `after_id`, ordered by id.
    async fn fetch_unmigrated(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PendingRecord>, MigrationError>;

    /// Persist the encrypted fields and mark the row as version 1.
    async fn save_migrated(&self, record: &PendingRecord) -> Result<(), MigrationError>;
}

/// Outcome of a migration run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Drives a [`RecordStore`] through the upgrade.
pub struct FieldMigration<'a> {
    cipher: &'a FieldCipher,
    fields: Vec<String>,
    batch_size: usize,
}

impl<'a> FieldMigration<'a> {
    pub fn new(cipher: &'a FieldCipher, fields: &[&str], batch_size: usize) -> Self {
        Self {
            cipher,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            batch_size: batch_size.max(1),
        }
    }

    /// Run until no unmigrated rows remain past the cursor.
    ///
    /// A row that fails to encrypt, verify, or save is counted and left at
    /// version 0; a failure to fetch aborts the run.
    pub async fn run(&self, store: &dyn RecordStore) -> Result<MigrationReport, MigrationError> {
        let fields: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        let mut report = MigrationReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let batch = store
                .fetch_unmigrated(cursor.as_deref(), self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            let full_batch = batch.len() >= self.batch_size;

            for record in batch {
                report.scanned += 1;
                cursor = Some(record.id.clone());

                match self.upgrade(&record, &fields) {
                    Ok(upgraded) => match store.save_migrated(&upgraded).await {
                        Ok(()) => report.migrated += 1,
                        Err(e) => {
                            tracing::error!(id = %record.id, error = %e, "Failed to save migrated record");
                            report.failed += 1;
                        }
                    },
                    Err(e) => {
                        tracing::error!(id = %record.id, error = %e, "Failed to encrypt record");
                        report.failed += 1;
                    }
                }
            }

            tracing::info!(
                batches = report.batches,
                migrated = report.migrated,
                failed = report.failed,
                "Migration batch complete"
            );

            if !full_batch {
                break;
            }
        }

        Ok(report)
    }

    fn upgrade(&self, record: &PendingRecord, fields: &[&str]) -> Result<PendingRecord, CryptoError> {
        let mut upgraded = record.clone();
        self.cipher.encrypt_fields(&mut upgraded.fields, fields)?;

        // Every field must read back to what was there before.
        for name in fields {
            let (Some(Value::String(before)), Some(Value::String(after))) =
                (record.fields.get(*name), upgraded.fields.get(*name))
            else {
                continue;
            };
            if before == after {
                continue;
            }
            if &self.cipher.try_decrypt(after)? != before {
                return Err(CryptoError::Decrypt("round-trip mismatch"));
            }
        }
        Ok(upgraded)
    }
}

#[cfg(any(feature = "sqlite", test))]
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteRecordStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use rusqlite::types::Value as SqlValue;
    use std::path::Path;
    use std::sync::Mutex;

    /// Migrates one SQLite table that carries an `encryption_version` column.
    pub struct SqliteRecordStore {
        conn: Mutex<rusqlite::Connection>,
        table: String,
        fields: Vec<String>,
    }

    impl SqliteRecordStore {
        pub fn open(path: impl AsRef<Path>, table: &str, fields: &[&str]) -> Result<Self, MigrationError> {
            let conn = rusqlite::Connection::open(path).map_err(|e| MigrationError::Store(e.to_string()))?;
            Self::new(conn, table, fields)
        }

        pub fn new(conn: rusqlite::Connection, table: &str, fields: &[&str]) -> Result<Self, MigrationError> {
            if !is_identifier(table) {
                return Err(MigrationError::InvalidTarget(format!("table {table:?}")));
            }
            if let Some(bad) = fields.iter().find(|f| !is_identifier(f)) {
                return Err(MigrationError::InvalidTarget(format!("column {bad:?}")));
            }
            if fields.is_empty() {
                return Err(MigrationError::InvalidTarget("no columns".to_string()));
            }
            Ok(Self {
                conn: Mutex::new(conn),
                table: table.to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            })
        }

        fn with_conn<T, F>(&self, f: F) -> Result<T, MigrationError>
        where
            F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
        {
            let conn = self
                .conn
                .lock()
                .map_err(|e| MigrationError::Store(format!("failed to acquire lock: {e}")))?;
            f(&conn).map_err(|e| MigrationError::Store(e.to_string()))
        }
    }

    #[async_trait]
    impl RecordStore for SqliteRecordStore {
        async fn fetch_unmigrated(
            &self,
            after_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<PendingRecord>, MigrationError> {
            let after: i64 = match after_id {
                Some(id) => id
                    .parse()
                    .map_err(|_| MigrationError::InvalidTarget(format!("cursor {id:?}")))?,
                None => i64::MIN,
            };
            let sql = format!(
                "SELECT rowid, {} FROM {} WHERE encryption_version = 0 AND rowid > ?1 ORDER BY rowid LIMIT ?2",
                self.fields.join(", "),
                self.table
            );
            self.with_conn(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params![after, limit as i64], |row| {
                    let rowid: i64 = row.get(0)?;
                    let mut fields = Map::new();
                    for (i, name) in self.fields.iter().enumerate() {
                        let value = match row.get::<_, SqlValue>(i + 1)? {
                            SqlValue::Text(s) => Value::String(s),
                            SqlValue::Null => Value::Null,
                            SqlValue::Integer(n) => Value::from(n),
                            SqlValue::Real(f) => Value::from(f),
                            SqlValue::Blob(_) => Value::Null,
                        };
                        fields.insert(name.clone(), value);
                    }
                    Ok(PendingRecord { id: rowid.to_string(), fields })
                })?;
                rows.collect()
            })
        }

        async fn save_migrated(&self, record: &PendingRecord) -> Result<(), MigrationError> {
            let rowid: i64 = record
                .id
                .parse()
                .map_err(|_| MigrationError::InvalidTarget(format!("row id {:?}", record.id)))?;
            let assignments: Vec<String> = self
                .fields
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{name} = ?{}", i + 1))
                .collect();
            let sql = format!(
                "UPDATE {} SET {}, encryption_version = 1 WHERE rowid = ?{}",
                self.table,
                assignments.join(", "),
                self.fields.len() + 1
            );
            let mut params: Vec<SqlValue> = self
                .fields
                .iter()
                .map(|name| match record.fields.get(name) {
                    Some(Value::String(s)) => SqlValue::Text(s.clone()),
                    Some(Value::Number(n)) => n
                        .as_i64()
                        .map(SqlValue::Integer)
                        .unwrap_or_else(|| SqlValue::Real(n.as_f64().unwrap_or_default())),
                    _ => SqlValue::Null,
                })
                .collect();
            params.push(SqlValue::Integer(rowid));
            self.with_conn(|conn| conn.execute(&sql, rusqlite::params_from_iter(params)).map(|_| ()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_sqlite_migration_marks_rows() {
            let conn = rusqlite::Connection::open_in_memory().unwrap();
            conn.execute_batch(
                "CREATE TABLE kyc (name TEXT, id_number TEXT, encryption_version INTEGER NOT NULL DEFAULT 0);
                 INSERT INTO kyc (name, id_number) VALUES ('a', '111'), ('b', '222'), ('c', NULL);",
            )
            .unwrap();
            let store = SqliteRecordStore::new(conn, "kyc", &["id_number"]).unwrap();
            let cipher = FieldCipher::from_hex_key(&"0f".repeat(32)).unwrap();

            let report = FieldMigration::new(&cipher, &["id_number"], 2).run(&store).await.unwrap();
            assert_eq!(report.migrated, 3);
            assert!(store.fetch_unmigrated(None, 10).await.unwrap().is_empty());

            let stored: String = store
                .with_conn(|c| c.query_row("SELECT id_number FROM kyc WHERE name = 'a'", [], |r| r.get(0)))
                .unwrap();
            assert_eq!(cipher.try_decrypt(&stored).unwrap(), "111");
        }

        #[test]
        fn test_rejects_unsafe_identifiers() {
            let conn = rusqlite::Connection::open_in_memory().unwrap();
            assert!(SqliteRecordStore::new(conn, "kyc; DROP TABLE x", &["a"]).is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Rows keyed by numeric id: (fields, encryption_version).
    struct MemoryRecords {
        rows: Mutex<BTreeMap<u64, (Map<String, Value>, i64)>>,
        fail_save_for: Option<u64>,
    }

    impl MemoryRecords {
        fn with_rows(n: u64) -> Self {
            let rows = (1..=n)
                .map(|i| {
                    let fields = json!({ "id_number": format!("ID-{i}"), "phone_number": null })
                        .as_object()
                        .cloned()
                        .unwrap();
                    (i, (fields, 0))
                })
                .collect();
            Self { rows: Mutex::new(rows), fail_save_for: None }
        }

        fn version(&self, id: u64) -> i64 {
            self.rows.lock().unwrap()[&id].1
        }
    }

    #[async_trait]
    impl RecordStore for MemoryRecords {
        async fn fetch_unmigrated(
            &self,
            after_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<PendingRecord>, MigrationError> {
            let after: u64 = after_id.map(|s| s.parse().unwrap()).unwrap_or(0);
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .range(after + 1..)
                .filter(|(_, (_, version))| *version == 0)
                .take(limit)
                .map(|(id, (fields, _))| PendingRecord { id: id.to_string(), fields: fields.clone() })
                .collect())
        }

        async fn save_migrated(&self, record: &PendingRecord) -> Result<(), MigrationError> {
            let id: u64 = record.id.parse().unwrap();
            if self.fail_save_for == Some(id) {
                return Err(MigrationError::Store("disk full".into()));
            }
            self.rows.lock().unwrap().insert(id, (record.fields.clone(), 1));
            Ok(())
        }
    }

    fn cipher() -> FieldCipher {
        FieldCipher::from_hex_key(&"42".repeat(32)).unwrap()
    }

    #[tokio::test]
    async fn test_migrates_all_rows_in_batches() {
        let store = MemoryRecords::with_rows(7);
        let c = cipher();
        let report = FieldMigration::new(&c, &["id_number", "phone_number"], 3)
            .run(&store)
            .await
            .unwrap();

        assert_eq!(report, MigrationReport { scanned: 7, migrated: 7, failed: 0, batches: 3 });
        for id in 1..=7 {
            assert_eq!(store.version(id), 1);
        }
        let rows = store.rows.lock().unwrap();
        let stored = rows[&4].0["id_number"].as_str().unwrap().to_string();
        assert_eq!(c.try_decrypt(&stored).unwrap(), "ID-4");
        assert!(rows[&4].0["phone_number"].is_null());
    }

    #[tokio::test]
    async fn test_rerun_is_a_no_op() {
        let store = MemoryRecords::with_rows(4);
        let c = cipher();
        let migration = FieldMigration::new(&c, &["id_number"], 10);
        migration.run(&store).await.unwrap();

        let again = migration.run(&store).await.unwrap();
        assert_eq!(again.scanned, 0);
        assert_eq!(again.migrated, 0);
    }

    #[tokio::test]
    async fn test_failed_row_stays_unmigrated_and_run_continues() {
        let mut store = MemoryRecords::with_rows(5);
        store.fail_save_for = Some(2);
        let c = cipher();
        let report = FieldMigration::new(&c, &["id_number"], 2).run(&store).await.unwrap();

        assert_eq!(report.migrated, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(store.version(2), 0);
        assert_eq!(store.version(5), 1);
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("kyc_profiles"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("users where 1=1"));
    }
}
