//! Export of stored records
//!
//! Two forms are supported:
//!
//! - raw: a verbatim copy of the store's native file
//! - JSON: a document with per-kind counts and entries, newest first

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crashlog_core::{AppVersion, EventRecord, ExceptionReport, LogStore, StorageError};

use crate::aggregation::{EventFilter, ExceptionFilter, scan_records};
use crate::error::EngineResult;

/// One exception as written to a JSON export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExceptionEntry {
    pub exception_type: String,
    #[serde(rename = "HResult")]
    pub hresult: i32,
    pub message: Option<String>,
    pub source: Option<String>,
    pub stack_trace: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub app_version: AppVersion,
    pub used_memory: u64,
}

impl From<&ExceptionReport> for ExceptionEntry {
    fn from(report: &ExceptionReport) -> Self {
        Self {
            exception_type: report.exception_type.clone(),
            hresult: report.hresult,
            message: report.message.clone(),
            source: report.source.clone(),
            stack_trace: report.stack_trace.clone(),
            timestamp: report.timestamp,
            app_version: report.app_version,
            used_memory: report.used_memory,
        }
    }
}

/// One event as written to a JSON export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventEntry {
    /// Priority name, e.g. `"Warning"`
    pub priority: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub app_version: AppVersion,
}

impl From<&EventRecord> for EventEntry {
    fn from(event: &EventRecord) -> Self {
        Self {
            priority: event.priority.name().to_string(),
            message: event.message.clone(),
            timestamp: event.timestamp,
            app_version: event.app_version,
        }
    }
}

/// A JSON export; kinds that were not requested are omitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<Vec<ExceptionEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventEntry>>,
}

impl ExportDocument {
    /// Parse a previously exported document
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Pretty-printed JSON
    pub fn to_json_string(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Which kinds to export, each with its own filter
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub exceptions: Option<ExceptionFilter>,
    pub events: Option<EventFilter>,
}

impl ExportRequest {
    /// Both kinds, unfiltered
    pub fn all() -> Self {
        Self {
            exceptions: Some(ExceptionFilter::new()),
            events: Some(EventFilter::new()),
        }
    }

    pub fn exceptions(filter: ExceptionFilter) -> Self {
        Self {
            exceptions: Some(filter),
            events: None,
        }
    }

    pub fn events(filter: EventFilter) -> Self {
        Self {
            exceptions: None,
            events: Some(filter),
        }
    }
}

/// Build a JSON export document from the store
#[instrument(skip_all)]
pub async fn export_json<S: LogStore + ?Sized>(
    store: &S,
    request: &ExportRequest,
    now: DateTime<Utc>,
) -> Result<ExportDocument, StorageError> {
    let mut document = ExportDocument::default();

    if let Some(filter) = &request.exceptions {
        let mut reports: Vec<_> = scan_records::<ExceptionReport, S>(store, |r| filter.matches(r))
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| filter.is_recent(r.timestamp, now))
            .collect();
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let entries: Vec<ExceptionEntry> = reports.iter().map(ExceptionEntry::from).collect();
        document.exceptions_count = Some(entries.len());
        document.exceptions = Some(entries);
    }

    if let Some(filter) = &request.events {
        let mut events: Vec<_> = scan_records::<EventRecord, S>(store, |e| filter.matches(e))
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| filter.is_recent(e.timestamp, now))
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let entries: Vec<EventEntry> = events.iter().map(EventEntry::from).collect();
        document.events_count = Some(entries.len());
        document.events = Some(entries);
    }

    debug!(
        exceptions = ?document.exceptions_count,
        events = ?document.events_count,
        "Built export document"
    );
    Ok(document)
}

/// Write `document` as pretty JSON to `path`
pub fn write_json(document: &ExportDocument, path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, document.to_json_string()?)?;
    info!(path = %path.display(), "Wrote JSON export");
    Ok(())
}

/// Copy the store's native file verbatim to `path`
#[instrument(skip(store, path), fields(path = %path.display()))]
pub async fn export_raw<S: LogStore + ?Sized>(store: &S, path: &Path) -> EngineResult<u64> {
    let bytes = store.export_raw(path).await?;
    info!(bytes, "Exported raw store");
    Ok(bytes)
}

/// The store's native file as bytes, staged through a temporary directory
///
/// The staging directory is removed when this returns, on success or error.
pub async fn export_raw_bytes<S: LogStore + ?Sized>(store: &S) -> EngineResult<Vec<u8>> {
    let staging = tempfile::Builder::new()
        .prefix("crashlog-export-")
        .tempdir()?;
    let path = staging.path().join("store.bin");

    store.export_raw(&path).await?;
    let bytes = std::fs::read(&path)?;
    debug!(bytes = bytes.len(), "Read staged raw export");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crashlog_core::{
        LogRecord, Priority, RecordId, RecordKind, RecordPredicate, StoredRecord,
    };
    use crashlog_storage::{InMemoryLogStore, RedbLogStore, RedbLogStoreConfig};
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    async fn populated(store: &dyn LogStore) {
        let version = AppVersion::new(1, 2, 0, 0);
        let report = ExceptionReport::new("NullReference", -2147467261, at(5), version)
            .with_message("object was null")
            .with_stack_trace("at Main()")
            .with_used_memory(4096);
        store.insert(report.into()).await.unwrap();
        store
            .insert(ExceptionReport::new("Timeout", 1, at(9), version).into())
            .await
            .unwrap();
        store
            .insert(EventRecord::new(Priority::Warning, "disk low", at(7), version).into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_document_field_names() {
        let store = InMemoryLogStore::new();
        populated(&store).await;

        let document = export_json(&store, &ExportRequest::all(), at(10)).await.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&document.to_json_string().unwrap()).unwrap();

        assert_eq!(value["ExceptionsCount"], 2);
        assert_eq!(value["EventsCount"], 1);
        let first = &value["Exceptions"][0];
        assert_eq!(first["ExceptionType"], "Timeout");
        let second = &value["Exceptions"][1];
        assert_eq!(second["HResult"], -2147467261);
        assert_eq!(second["Message"], "object was null");
        assert_eq!(second["StackTrace"], "at Main()");
        assert_eq!(second["UsedMemory"], 4096);
        assert_eq!(second["AppVersion"], "1.2.0.0");
        assert_eq!(value["Events"][0]["Priority"], "Warning");
        assert_eq!(value["Events"][0]["Message"], "disk low");
    }

    #[tokio::test]
    async fn test_unrequested_kinds_are_omitted() {
        let store = InMemoryLogStore::new();
        populated(&store).await;

        let request = ExportRequest::events(EventFilter::new());
        let json = export_json(&store, &request, at(10))
            .await
            .unwrap()
            .to_json_string()
            .unwrap();
        assert!(!json.contains("Exceptions"));
        assert!(json.contains("EventsCount"));
    }

    #[tokio::test]
    async fn test_empty_store_exports_zero_counts() {
        let store = InMemoryLogStore::new();
        let document = export_json(&store, &ExportRequest::all(), at(0)).await.unwrap();
        assert_eq!(document.exceptions_count, Some(0));
        assert_eq!(document.events, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_write_json_reparses() {
        let store = InMemoryLogStore::new();
        populated(&store).await;
        let document = export_json(&store, &ExportRequest::all(), at(10)).await.unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("export.json");
        write_json(&document, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(ExportDocument::from_json(&text).unwrap(), document);
    }

    #[tokio::test]
    async fn test_raw_bytes_match_redb_file() {
        let dir = TempDir::new().unwrap();
        let config = RedbLogStoreConfig::with_path(dir.path().join("log.redb"));
        let store = RedbLogStore::open(config).unwrap();
        populated(&store).await;

        let bytes = export_raw_bytes(&store).await.unwrap();
        let on_disk = std::fs::read(store.path()).unwrap();
        assert_eq!(bytes, on_disk);

        let copy = dir.path().join("copy.redb");
        let written = export_raw(&store, &copy).await.unwrap();
        assert_eq!(written, bytes.len() as u64);
    }

    /// Store that writes its raw export and then reports a failure
    #[derive(Default)]
    struct TruncatedExportStore {
        inner: InMemoryLogStore,
        last_dest: parking_lot::Mutex<Option<std::path::PathBuf>>,
    }

    #[async_trait::async_trait]
    impl LogStore for TruncatedExportStore {
        async fn insert(&self, record: LogRecord) -> Result<RecordId, StorageError> {
            self.inner.insert(record).await
        }

        async fn scan_all(&self, kind: RecordKind) -> Result<Vec<StoredRecord>, StorageError> {
            self.inner.scan_all(kind).await
        }

        async fn scan_where(
            &self,
            kind: RecordKind,
            predicate: RecordPredicate<'_>,
        ) -> Result<Vec<StoredRecord>, StorageError> {
            self.inner.scan_where(kind, predicate).await
        }

        async fn delete_by_id(&self, kind: RecordKind, id: RecordId) -> Result<bool, StorageError> {
            self.inner.delete_by_id(kind, id).await
        }

        async fn delete_where_kinds(
            &self,
            kinds: &[RecordKind],
            predicate: RecordPredicate<'_>,
        ) -> Result<Vec<StoredRecord>, StorageError> {
            self.inner.delete_where_kinds(kinds, predicate).await
        }

        async fn delete_ids(
            &self,
            kind: RecordKind,
            ids: &[RecordId],
        ) -> Result<Vec<RecordId>, StorageError> {
            self.inner.delete_ids(kind, ids).await
        }

        async fn compact(&self) -> Result<bool, StorageError> {
            self.inner.compact().await
        }

        async fn size_bytes(&self) -> Result<u64, StorageError> {
            self.inner.size_bytes().await
        }

        async fn export_raw(&self, dest: &Path) -> Result<u64, StorageError> {
            self.inner.export_raw(dest).await?;
            *self.last_dest.lock() = Some(dest.to_path_buf());
            Err(StorageError::Database("copy interrupted".into()))
        }
    }

    #[tokio::test]
    async fn test_raw_bytes_staging_removed_on_failure() {
        let store = TruncatedExportStore::default();
        populated(&store).await;

        let err = export_raw_bytes(&store).await.unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Storage(_)));

        let staged = store.last_dest.lock().clone().unwrap();
        assert!(!staged.exists());
        assert!(!staged.parent().unwrap().exists());
    }
}
