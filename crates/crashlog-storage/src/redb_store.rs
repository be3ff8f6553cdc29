//! redb-backed log store
//!
//! One database file holds both record kinds in separate tables, keyed by
//! [`RecordId`], with postcard-encoded [`LogRecord`] values. A `meta` table
//! carries the id sequence so ids are never reused after deletions.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crashlog_core::{
    LogRecord, LogStore, RecordId, RecordKind, RecordPredicate, StorageError, StoredRecord,
};

// Key: record id, Value: serialized LogRecord
const EXCEPTIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("exceptions");

// Key: record id, Value: serialized LogRecord
const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");

// Key: counter name, Value: counter
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_record_id";

fn table_for(kind: RecordKind) -> TableDefinition<'static, u64, &'static [u8]> {
    match kind {
        RecordKind::Exception => EXCEPTIONS,
        RecordKind::Event => EVENTS,
    }
}

fn db_err(e: impl Display) -> StorageError {
    StorageError::Database(e.to_string())
}

/// Configuration for the redb log store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedbLogStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for RedbLogStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/crashlog.redb"),
            cache_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl RedbLogStoreConfig {
    /// Default configuration at a custom path
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}

/// Log store persisted in a single redb file
///
/// Transactions take the shared side of the lock; compaction and raw export
/// take the exclusive side so that no transaction is live while the file is
/// rewritten or copied.
pub struct RedbLogStore {
    db: RwLock<Database>,
    config: RedbLogStoreConfig,
}

impl RedbLogStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbLogStoreConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        }

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        info!("Opened crash log database");

        let store = Self {
            db: RwLock::new(db),
            config,
        };
        store.init_tables()?;

        Ok(store)
    }

    /// Create all tables so read transactions never see a missing table
    fn init_tables(&self) -> Result<(), StorageError> {
        let db = self.db.read();
        let write_txn = db.begin_write().map_err(db_err)?;

        write_txn.open_table(EXCEPTIONS).map_err(db_err)?;
        write_txn.open_table(EVENTS).map_err(db_err)?;
        write_txn.open_table(META).map_err(db_err)?;

        write_txn.commit().map_err(db_err)?;

        debug!("Initialized crash log tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbLogStoreConfig {
        &self.config
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    fn insert_record(&self, record: &LogRecord) -> Result<RecordId, StorageError> {
        let value =
            postcard::to_allocvec(record).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let db = self.db.read();
        let write_txn = db.begin_write().map_err(db_err)?;

        let id = {
            let mut meta = write_txn.open_table(META).map_err(db_err)?;
            let next = meta
                .get(NEXT_ID_KEY)
                .map_err(db_err)?
                .map(|guard| guard.value())
                .unwrap_or(1);
            meta.insert(NEXT_ID_KEY, next + 1).map_err(db_err)?;

            let mut table = write_txn
                .open_table(table_for(record.kind()))
                .map_err(db_err)?;
            table.insert(next, value.as_slice()).map_err(db_err)?;
            next
        };

        write_txn.commit().map_err(db_err)?;

        Ok(RecordId(id))
    }

    fn scan(
        &self,
        kind: RecordKind,
        predicate: Option<RecordPredicate<'_>>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let db = self.db.read();
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table_for(kind)).map_err(db_err)?;

        let mut results = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            let record: LogRecord = postcard::from_bytes(value.value())?;
            if predicate.is_none_or(|matches| matches(&record)) {
                results.push(StoredRecord::new(RecordId(key.value()), record));
            }
        }

        Ok(results)
    }

    fn remove_matching(
        &self,
        kinds: &[RecordKind],
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let db = self.db.read();
        let write_txn = db.begin_write().map_err(db_err)?;

        let mut removed = Vec::new();
        for kind in kinds {
            let mut table = write_txn.open_table(table_for(*kind)).map_err(db_err)?;

            let mut matching = Vec::new();
            for entry in table.iter().map_err(db_err)? {
                let (key, value) = entry.map_err(db_err)?;
                let record: LogRecord = postcard::from_bytes(value.value())?;
                if predicate(&record) {
                    matching.push(StoredRecord::new(RecordId(key.value()), record));
                }
            }

            for stored in &matching {
                table.remove(stored.id.0).map_err(db_err)?;
            }
            removed.extend(matching);
        }

        write_txn.commit().map_err(db_err)?;

        debug!(kinds = ?kinds, removed = removed.len(), "Deleted matching records");
        Ok(removed)
    }

    fn remove_ids(&self, kind: RecordKind, ids: &[RecordId]) -> Result<Vec<RecordId>, StorageError> {
        let db = self.db.read();
        let write_txn = db.begin_write().map_err(db_err)?;

        let removed = {
            let mut table = write_txn.open_table(table_for(kind)).map_err(db_err)?;
            let mut removed = Vec::new();
            for id in ids {
                if table.remove(id.0).map_err(db_err)?.is_some() {
                    removed.push(*id);
                }
            }
            removed
        };

        write_txn.commit().map_err(db_err)?;

        Ok(removed)
    }
}

#[async_trait]
impl LogStore for RedbLogStore {
    async fn insert(&self, record: LogRecord) -> Result<RecordId, StorageError> {
        self.insert_record(&record)
    }

    async fn scan_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StorageError> {
        self.scan(kind, None)
    }

    async fn scan_where(
        &self,
        kind: RecordKind,
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.scan(kind, Some(predicate))
    }

    async fn delete_by_id(&self, kind: RecordKind, id: RecordId) -> Result<bool, StorageError> {
        Ok(!self.remove_ids(kind, &[id])?.is_empty())
    }

    async fn delete_where_kinds(
        &self,
        kinds: &[RecordKind],
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.remove_matching(kinds, predicate)
    }

    async fn delete_ids(
        &self,
        kind: RecordKind,
        ids: &[RecordId],
    ) -> Result<Vec<RecordId>, StorageError> {
        self.remove_ids(kind, ids)
    }

    /// redb only returns freed pages to the file system on an explicit
    /// compaction, which needs exclusive access to the database.
    #[instrument(skip(self))]
    async fn compact(&self) -> Result<bool, StorageError> {
        let mut db = self.db.write();
        let compacted = db.compact().map_err(db_err)?;
        debug!(compacted, "Database compaction finished");
        Ok(compacted)
    }

    async fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(std::fs::metadata(&self.config.db_path)?.len())
    }

    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn export_raw(&self, dest: &Path) -> Result<u64, StorageError> {
        let _exclusive = self.db.write();
        let bytes = std::fs::copy(&self.config.db_path, dest)?;
        info!(bytes, "Exported raw database copy");
        Ok(bytes)
    }
}
