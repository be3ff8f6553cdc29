//! The storage collaborator contract
//!
//! A [`LogStore`] is durable keyed storage for both record kinds. Adapters
//! live in `crashlog-storage`; the engine only ever talks to this trait,
//! through an explicit handle passed into each operation.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{LogRecord, RecordId, RecordKind, StoredRecord};

/// Predicate over scanned records
pub type RecordPredicate<'a> = &'a (dyn Fn(&LogRecord) -> bool + Send + Sync);

/// Storage abstraction for exception reports and events
///
/// Every mutating call runs as exactly one write transaction: it either
/// lands completely or not at all, and readers never observe a partially
/// applied call. Reads observe some committed snapshot.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert a record, returning its newly assigned id
    async fn insert(&self, record: LogRecord) -> Result<RecordId, StorageError>;

    /// All records of a kind, in ascending id (insertion) order
    async fn scan_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StorageError>;

    /// Records of a kind matching a predicate, in ascending id order
    async fn scan_where(
        &self,
        kind: RecordKind,
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Delete one record, returning whether it existed
    async fn delete_by_id(&self, kind: RecordKind, id: RecordId) -> Result<bool, StorageError>;

    /// Delete every record of `kinds` matching a predicate in one transaction
    ///
    /// Returns the deleted records, grouped by kind in the order given.
    async fn delete_where_kinds(
        &self,
        kinds: &[RecordKind],
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Delete every record of a kind matching a predicate, returning the deleted records
    async fn delete_where(
        &self,
        kind: RecordKind,
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.delete_where_kinds(&[kind], predicate).await
    }

    /// Delete a batch of records in a single transaction
    ///
    /// Returns the ids that existed and were removed, in the order given.
    async fn delete_ids(
        &self,
        kind: RecordKind,
        ids: &[RecordId],
    ) -> Result<Vec<RecordId>, StorageError>;

    /// Reclaim space left behind by deletions
    ///
    /// Returns `true` if the store performed a compaction.
    async fn compact(&self) -> Result<bool, StorageError>;

    /// Size of the store's native representation in bytes
    async fn size_bytes(&self) -> Result<u64, StorageError>;

    /// Copy the store's native representation to `dest`, byte for byte
    ///
    /// Returns the number of bytes written.
    async fn export_raw(&self, dest: &Path) -> Result<u64, StorageError>;

    /// Number of records of a kind
    async fn count(&self, kind: RecordKind) -> Result<usize, StorageError> {
        Ok(self.scan_all(kind).await?.len())
    }
}
