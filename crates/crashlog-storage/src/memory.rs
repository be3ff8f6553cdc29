//! In-memory log store
//!
//! Suitable for tests, simulation and short-lived processes that do not need
//! records to survive a restart.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use crashlog_core::{
    LogRecord, LogStore, RecordId, RecordKind, RecordPredicate, StorageError, StoredRecord,
};

#[derive(Debug, Default, Serialize)]
struct MemoryState {
    next_id: u64,
    tables: BTreeMap<RecordKind, BTreeMap<RecordId, LogRecord>>,
}

impl MemoryState {
    fn table(&self, kind: RecordKind) -> impl Iterator<Item = (&RecordId, &LogRecord)> {
        self.tables.get(&kind).into_iter().flatten()
    }
}

/// In-memory implementation of [`LogStore`]
///
/// A single lock guards all tables, so every mutating call is applied
/// atomically with respect to readers. The native representation used for
/// [`size_bytes`](LogStore::size_bytes) and raw export is the postcard
/// encoding of the current contents.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    state: RwLock<MemoryState>,
    /// Number of compactions requested so far
    compactions: AtomicUsize,
}

impl InMemoryLogStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times [`compact`](LogStore::compact) has been called
    pub fn compaction_count(&self) -> usize {
        self.compactions.load(Ordering::SeqCst)
    }

    /// Total records across both kinds
    pub fn len(&self) -> usize {
        self.state.read().tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let state = self.state.read();
        postcard::to_allocvec(&*state).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn insert(&self, record: LogRecord) -> Result<RecordId, StorageError> {
        let mut state = self.state.write();
        state.next_id += 1;
        let id = RecordId(state.next_id);
        trace!(id = %id, kind = %record.kind(), "Inserting record");
        state
            .tables
            .entry(record.kind())
            .or_default()
            .insert(id, record);
        Ok(id)
    }

    async fn scan_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StorageError> {
        let state = self.state.read();
        Ok(state
            .table(kind)
            .map(|(id, record)| StoredRecord::new(*id, record.clone()))
            .collect())
    }

    async fn scan_where(
        &self,
        kind: RecordKind,
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let state = self.state.read();
        Ok(state
            .table(kind)
            .filter(|(_, record)| predicate(record))
            .map(|(id, record)| StoredRecord::new(*id, record.clone()))
            .collect())
    }

    async fn delete_by_id(&self, kind: RecordKind, id: RecordId) -> Result<bool, StorageError> {
        let mut state = self.state.write();
        Ok(state
            .tables
            .get_mut(&kind)
            .is_some_and(|table| table.remove(&id).is_some()))
    }

    async fn delete_where_kinds(
        &self,
        kinds: &[RecordKind],
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let mut state = self.state.write();
        let mut removed = Vec::new();
        for kind in kinds {
            let Some(table) = state.tables.get_mut(kind) else {
                continue;
            };

            let matching: Vec<RecordId> = table
                .iter()
                .filter(|(_, record)| predicate(record))
                .map(|(id, _)| *id)
                .collect();

            removed.extend(
                matching
                    .into_iter()
                    .filter_map(|id| table.remove(&id).map(|record| StoredRecord::new(id, record))),
            );
        }

        debug!(kinds = ?kinds, removed = removed.len(), "Deleted matching records");
        Ok(removed)
    }

    async fn delete_ids(
        &self,
        kind: RecordKind,
        ids: &[RecordId],
    ) -> Result<Vec<RecordId>, StorageError> {
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(&kind) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter(|id| table.remove(*id).is_some())
            .copied()
            .collect())
    }

    async fn compact(&self) -> Result<bool, StorageError> {
        self.compactions.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.snapshot_bytes()?.len() as u64)
    }

    async fn export_raw(&self, dest: &Path) -> Result<u64, StorageError> {
        let bytes = self.snapshot_bytes()?;
        std::fs::write(dest, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crashlog_core::{AppVersion, EventRecord, ExceptionReport, Priority};

    fn event(priority: Priority) -> LogRecord {
        EventRecord::new(priority, "msg", Utc::now(), AppVersion::new(1, 0, 0, 0)).into()
    }

    #[tokio::test]
    async fn test_kinds_are_separate_tables() {
        let store = InMemoryLogStore::new();
        store.insert(event(Priority::Info)).await.unwrap();
        store
            .insert(ExceptionReport::new("Foo", 1, Utc::now(), AppVersion::default()).into())
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.count(RecordKind::Event).await.unwrap(), 1);
        assert_eq!(store.count(RecordKind::Exception).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_where_returns_deleted() {
        let store = InMemoryLogStore::new();
        store.insert(event(Priority::Error)).await.unwrap();
        store.insert(event(Priority::Debug)).await.unwrap();
        store.insert(event(Priority::Error)).await.unwrap();

        let deleted = store
            .delete_where(RecordKind::Event, &|r| match r {
                LogRecord::Event(e) => e.priority == Priority::Error,
                LogRecord::Exception(_) => false,
            })
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.len(), 1);

        // Deleting from an empty kind is fine
        let none = store
            .delete_where(RecordKind::Exception, &|_| true)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_where_kinds_spans_both_tables() {
        let store = InMemoryLogStore::new();
        store.insert(event(Priority::Info)).await.unwrap();
        store
            .insert(ExceptionReport::new("Foo", 1, Utc::now(), AppVersion::default()).into())
            .await
            .unwrap();
        store.insert(event(Priority::Info)).await.unwrap();

        let deleted = store
            .delete_where_kinds(&RecordKind::ALL, &|_| true)
            .await
            .unwrap();
        let kinds: Vec<_> = deleted.iter().map(|r| r.record.kind()).collect();
        assert_eq!(kinds, vec![RecordKind::Exception, RecordKind::Event, RecordKind::Event]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_ids_and_compaction_count() {
        let store = InMemoryLogStore::new();
        let a = store.insert(event(Priority::Info)).await.unwrap();
        let b = store.insert(event(Priority::Info)).await.unwrap();

        assert_eq!(
            store.delete_ids(RecordKind::Event, &[a, b, a]).await.unwrap(),
            vec![a, b]
        );
        assert!(store.is_empty());

        assert_eq!(store.compaction_count(), 0);
        store.compact().await.unwrap();
        assert_eq!(store.compaction_count(), 1);
    }

    #[tokio::test]
    async fn test_raw_export_matches_size() {
        let store = InMemoryLogStore::new();
        store.insert(event(Priority::Warning)).await.unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("memory.bin");
        let written = store.export_raw(&dest).await.unwrap();
        assert_eq!(written, store.size_bytes().await.unwrap());
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), written);
    }
}
