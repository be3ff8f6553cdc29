//! The crash log handle
//!
//! [`CrashLog`] ties one store, one clock and one configuration together and
//! exposes the whole engine through a single value. It is cheap to share
//! behind an `Arc`; every method takes `&self`.
//!
//! The write path ([`log_exception`](CrashLog::log_exception),
//! [`log_error`](CrashLog::log_error), [`log_event`](CrashLog::log_event))
//! never fails from the caller's point of view. It is typically called while
//! the application is already handling a failure, so store errors and panics
//! raised during the insert are logged and reported as `None`.

use std::any::type_name;
use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crashlog_core::{
    AppVersion, Clock, EventRecord, ExceptionReport, LogRecord, LogStore, Priority, Record,
    RecordKind, SystemClock,
};
use crashlog_storage::RedbLogStore;

use crate::aggregation::{
    self, EventFilter, EventView, ExceptionFilter, ExceptionTypeSummary, ExceptionView,
    VersionGroup,
};
use crate::config::CrashLogConfig;
use crate::error::{EngineResult, FlushError};
use crate::export::{self, ExportDocument, ExportRequest};
use crate::flush::{self, FlushConfig, FlushMode, Uploader};
use crate::retention::{self, TrimReport};

/// Details of an exception to record
///
/// The uid, timestamp and app version are stamped by the crash log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub exception_type: String,
    pub hresult: i32,
    pub message: Option<String>,
    pub source: Option<String>,
    pub stack_trace: Option<String>,
    pub used_memory: u64,
}

impl ExceptionInfo {
    pub fn new(exception_type: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            ..Default::default()
        }
    }

    pub fn with_hresult(mut self, hresult: i32) -> Self {
        self.hresult = hresult;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_used_memory(mut self, bytes: u64) -> Self {
        self.used_memory = bytes;
        self
    }

    /// Describe a Rust error: its type name, message and source chain
    pub fn from_error<E: Error>(error: &E) -> Self {
        let mut info = Self::new(short_type_name::<E>()).with_message(error.to_string());

        let chain: Vec<String> = std::iter::successors(error.source(), |&e| e.source())
            .map(|e| format!("caused by: {e}"))
            .collect();
        if !chain.is_empty() {
            info.stack_trace = Some(chain.join("\n"));
        }
        info
    }

    fn into_report(self, timestamp: DateTime<Utc>, app_version: AppVersion) -> ExceptionReport {
        let mut report =
            ExceptionReport::new(self.exception_type, self.hresult, timestamp, app_version)
                .with_used_memory(self.used_memory);
        report.message = self.message;
        report.source = self.source;
        report.stack_trace = self.stack_trace;
        report
    }
}

/// Last path segment of a type name, generics left intact
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

/// A crash and event log over one store
pub struct CrashLog<S: LogStore + ?Sized = dyn LogStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: CrashLogConfig,
}

impl CrashLog {
    /// Open the redb store named by `config`
    pub fn open(config: CrashLogConfig) -> EngineResult<Self> {
        let store: Arc<dyn LogStore> = Arc::new(RedbLogStore::open(config.storage.clone())?);
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        })
    }
}

impl<S: LogStore + ?Sized> CrashLog<S> {
    /// Wrap an existing store; other settings take their defaults
    pub fn with_store(store: Arc<S>, app_version: AppVersion) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: CrashLogConfig::default().with_app_version(app_version),
        }
    }

    /// Replace the clock used for timestamps and age comparisons
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_flush_config(mut self, flush: FlushConfig) -> Self {
        self.config.flush = flush;
        self
    }

    pub fn with_retention(mut self, retention: retention::RetentionPolicy) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CrashLogConfig {
        &self.config
    }

    pub fn app_version(&self) -> AppVersion {
        self.config.app_version
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    // Write path

    /// Record an exception; returns its uid, or `None` if it could not be stored
    pub async fn log_exception(&self, info: ExceptionInfo) -> Option<Uuid> {
        let report = info.into_report(self.now(), self.app_version());
        self.write(report.into()).await
    }

    /// Record a Rust error as an exception
    pub async fn log_error<E: Error>(&self, error: &E) -> Option<Uuid> {
        self.log_exception(ExceptionInfo::from_error(error)).await
    }

    /// Record an event; returns its uid, or `None` if it could not be stored
    pub async fn log_event(&self, priority: Priority, message: impl Into<String>) -> Option<Uuid> {
        let event = EventRecord::new(priority, message, self.now(), self.app_version());
        self.write(event.into()).await
    }

    async fn write(&self, record: LogRecord) -> Option<Uuid> {
        let uid = record.uid();
        let kind = record.kind();
        match AssertUnwindSafe(self.store.insert(record)).catch_unwind().await {
            Ok(Ok(id)) => {
                debug!(id = %id, kind = %kind, "Logged record");
                Some(uid)
            }
            Ok(Err(e)) => {
                warn!(kind = %kind, error = %e, "Failed to store record");
                None
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(kind = %kind, reason = %reason, "Store panicked while logging record");
                None
            }
        }
    }

    // Queries

    pub async fn load_exceptions(
        &self,
        filter: &ExceptionFilter,
    ) -> EngineResult<Vec<VersionGroup<ExceptionView>>> {
        Ok(aggregation::load_exceptions(&*self.store, filter, self.now()).await?)
    }

    pub async fn load_exceptions_by_type(
        &self,
        exception_type: &str,
        max_age: Option<Duration>,
    ) -> EngineResult<Vec<ExceptionView>> {
        Ok(
            aggregation::load_exceptions_by_type(&*self.store, exception_type, max_age, self.now())
                .await?,
        )
    }

    pub async fn load_events(
        &self,
        filter: &EventFilter,
    ) -> EngineResult<Vec<VersionGroup<EventView>>> {
        Ok(aggregation::load_events(&*self.store, filter, self.now()).await?)
    }

    /// One line per exception type within the filtered set
    pub async fn exception_summary(
        &self,
        filter: &ExceptionFilter,
    ) -> EngineResult<Vec<ExceptionTypeSummary>> {
        let groups = self.load_exceptions(filter).await?;
        Ok(aggregation::exception_summary(&groups))
    }

    // Retention

    pub async fn trim_by_age(
        &self,
        kind: Option<RecordKind>,
        threshold: Duration,
    ) -> EngineResult<TrimReport> {
        retention::trim_by_age(&*self.store, kind, threshold, self.now()).await
    }

    pub async fn trim_by_version(
        &self,
        kind: Option<RecordKind>,
        version: AppVersion,
    ) -> EngineResult<TrimReport> {
        retention::trim_by_version(&*self.store, kind, version).await
    }

    pub async fn trim_to_count(&self, kind: RecordKind, max_count: i64) -> EngineResult<TrimReport> {
        retention::trim_to_count(&*self.store, kind, max_count).await
    }

    pub async fn reset(
        &self,
        kind: Option<RecordKind>,
        version: Option<AppVersion>,
    ) -> EngineResult<TrimReport> {
        retention::reset(&*self.store, kind, version).await
    }

    /// Apply the configured retention policy
    pub async fn apply_retention(&self) -> EngineResult<TrimReport> {
        retention::apply_policy(&*self.store, &self.config.retention, self.now()).await
    }

    // Export

    /// Copy the raw store to `path`
    pub async fn export(&self, path: &Path) -> EngineResult<u64> {
        export::export_raw(&*self.store, path).await
    }

    pub async fn export_bytes(&self) -> EngineResult<Vec<u8>> {
        export::export_raw_bytes(&*self.store).await
    }

    pub async fn export_as_json(&self, request: &ExportRequest) -> EngineResult<ExportDocument> {
        Ok(export::export_json(&*self.store, request, self.now()).await?)
    }

    /// Build a JSON export and write it to `path`
    pub async fn export_as_json_to(
        &self,
        path: &Path,
        request: &ExportRequest,
    ) -> EngineResult<ExportDocument> {
        let document = self.export_as_json(request).await?;
        export::write_json(&document, path)?;
        Ok(document)
    }

    // Flush

    /// Flush exceptions using the configured mode
    pub async fn flush_exceptions<U>(
        &self,
        uploader: &U,
        token: &CancellationToken,
    ) -> Result<usize, FlushError>
    where
        U: Uploader<ExceptionReport> + ?Sized,
    {
        flush::flush::<ExceptionReport, S, U>(&*self.store, uploader, token, &self.config.flush)
            .await
    }

    /// Flush events using the configured mode
    pub async fn flush_events<U>(
        &self,
        uploader: &U,
        token: &CancellationToken,
    ) -> Result<usize, FlushError>
    where
        U: Uploader<EventRecord> + ?Sized,
    {
        flush::flush::<EventRecord, S, U>(&*self.store, uploader, token, &self.config.flush).await
    }

    /// Flush one record kind with an explicit mode
    pub async fn flush_with_mode<R, U>(
        &self,
        uploader: &U,
        token: &CancellationToken,
        mode: FlushMode,
    ) -> Result<usize, FlushError>
    where
        R: Record,
        U: Uploader<R> + ?Sized,
    {
        let config = self.config.flush.clone().with_mode(mode);
        flush::flush::<R, S, U>(&*self.store, uploader, token, &config).await
    }

    /// Size of the store's native representation in bytes
    pub async fn size_bytes(&self) -> EngineResult<u64> {
        Ok(self.store.size_bytes().await?)
    }
}

impl<S: LogStore + ?Sized> Clone for CrashLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S: LogStore + ?Sized> std::fmt::Debug for CrashLog<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashLog")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use crashlog_core::{ManualClock, RecordId, RecordPredicate, StorageError, StoredRecord};
    use crashlog_storage::InMemoryLogStore;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn crash_log() -> (CrashLog<InMemoryLogStore>, ManualClock) {
        let clock = ManualClock::new(start());
        let log = CrashLog::with_store(Arc::new(InMemoryLogStore::new()), AppVersion::new(1, 0, 0, 0))
            .with_clock(Arc::new(clock.clone()));
        (log, clock)
    }

    /// Store whose inserts fail or panic
    struct BrokenStore {
        panic: bool,
    }

    #[async_trait]
    impl LogStore for BrokenStore {
        async fn insert(&self, _record: LogRecord) -> Result<RecordId, StorageError> {
            if self.panic {
                panic!("disk on fire");
            }
            Err(StorageError::unavailable("read-only file system"))
        }

        async fn scan_all(&self, _kind: RecordKind) -> Result<Vec<StoredRecord>, StorageError> {
            Err(StorageError::unavailable("read-only file system"))
        }

        async fn scan_where(
            &self,
            _kind: RecordKind,
            _predicate: RecordPredicate<'_>,
        ) -> Result<Vec<StoredRecord>, StorageError> {
            Err(StorageError::unavailable("read-only file system"))
        }

        async fn delete_by_id(&self, _kind: RecordKind, _id: RecordId) -> Result<bool, StorageError> {
            Ok(false)
        }

        async fn delete_where_kinds(
            &self,
            _kinds: &[RecordKind],
            _predicate: RecordPredicate<'_>,
        ) -> Result<Vec<StoredRecord>, StorageError> {
            Ok(Vec::new())
        }

        async fn delete_ids(
            &self,
            _kind: RecordKind,
            _ids: &[RecordId],
        ) -> Result<Vec<RecordId>, StorageError> {
            Ok(Vec::new())
        }

        async fn compact(&self) -> Result<bool, StorageError> {
            Ok(false)
        }

        async fn size_bytes(&self) -> Result<u64, StorageError> {
            Ok(0)
        }

        async fn export_raw(&self, _dest: &Path) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("config file unreadable")]
    struct ConfigUnreadable {
        #[source]
        source: std::io::Error,
    }

    #[tokio::test]
    async fn test_write_path_stamps_metadata() {
        let (log, _clock) = crash_log();
        let uid = log
            .log_exception(ExceptionInfo::new("Foo").with_hresult(-5).with_message("bad"))
            .await
            .unwrap();

        let groups = log.load_exceptions(&ExceptionFilter::new()).await.unwrap();
        let view = &groups[0].items[0];
        assert_eq!(view.report.uid, uid);
        assert_eq!(view.report.timestamp, start());
        assert_eq!(view.report.app_version, AppVersion::new(1, 0, 0, 0));
        assert_eq!(view.report.hresult, -5);
        assert_eq!(view.report.message.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn test_log_error_captures_chain() {
        let (log, _clock) = crash_log();
        let error = ConfigUnreadable {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        log.log_error(&error).await.unwrap();

        let views = log.load_exceptions_by_type("ConfigUnreadable", None).await.unwrap();
        assert_eq!(views.len(), 1);
        let report = &views[0].report;
        assert_eq!(report.message.as_deref(), Some("config file unreadable"));
        assert_eq!(report.stack_trace.as_deref(), Some("caused by: no such file"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("startup failed")]
    struct StartupFailed {
        #[source]
        source: ConfigUnreadable,
    }

    #[test]
    fn test_from_error_walks_nested_sources() {
        let error = StartupFailed {
            source: ConfigUnreadable {
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            },
        };
        let info = ExceptionInfo::from_error(&error);
        assert_eq!(info.exception_type, "StartupFailed");
        assert_eq!(
            info.stack_trace.as_deref(),
            Some("caused by: config file unreadable\ncaused by: denied")
        );
    }

    #[tokio::test]
    async fn test_events_with_equal_timestamps_keep_insertion_order() {
        let (log, _clock) = crash_log();
        log.log_event(Priority::Warning, "w").await.unwrap();
        log.log_event(Priority::Info, "i").await.unwrap();

        let groups = log.load_events(&EventFilter::new()).await.unwrap();
        assert_eq!(groups.len(), 1);
        let priorities: Vec<_> = groups[0].items.iter().map(|v| v.event.priority).collect();
        assert_eq!(priorities, vec![Priority::Warning, Priority::Info]);
    }

    #[tokio::test]
    async fn test_write_path_swallows_store_errors() {
        let log = CrashLog::with_store(Arc::new(BrokenStore { panic: false }), AppVersion::default());
        assert!(log.log_event(Priority::Error, "lost").await.is_none());
        assert!(log.log_exception(ExceptionInfo::new("Lost")).await.is_none());

        // Reads still surface the failure
        let err = log.load_events(&EventFilter::new()).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_write_path_swallows_panics() {
        let log = CrashLog::with_store(Arc::new(BrokenStore { panic: true }), AppVersion::default());
        assert!(log.log_event(Priority::Error, "lost").await.is_none());
    }

    #[tokio::test]
    async fn test_age_queries_follow_the_clock() {
        let (log, clock) = crash_log();
        log.log_event(Priority::Info, "old").await.unwrap();
        clock.advance(Duration::hours(2));
        log.log_event(Priority::Info, "new").await.unwrap();

        let recent = EventFilter::new().with_max_age(Duration::hours(1));
        let groups = log.load_events(&recent).await.unwrap();
        assert_eq!(groups[0].count(), 1);
        assert_eq!(groups[0].items[0].event.message, "new");

        let report = log.trim_by_age(None, Duration::hours(1)).await.unwrap();
        assert_eq!(report.deleted_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_retention_uses_config() {
        let (log, _clock) = crash_log();
        let log = log.with_retention(retention::RetentionPolicy::default().with_max_count(1));
        for i in 0..3 {
            log.log_event(Priority::Info, format!("e{i}")).await.unwrap();
        }

        let report = log.apply_retention().await.unwrap();
        assert_eq!(report.deleted_count(), 2);
        assert_eq!(log.store().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_with_mode_overrides_config() {
        let (log, _clock) = crash_log();
        for i in 0..3 {
            log.log_event(Priority::Info, format!("e{i}")).await.unwrap();
        }

        let uploader = |event: EventRecord, _token: CancellationToken| async move {
            Ok::<_, flush::UploadError>(event.message != "e0")
        };
        let token = CancellationToken::new();

        // Serial stops at the first decline
        assert_eq!(log.flush_events(&uploader, &token).await.unwrap(), 0);
        // Parallel skips it
        let flushed = log
            .flush_with_mode::<EventRecord, _>(&uploader, &token, FlushMode::Parallel)
            .await
            .unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(log.store().len(), 1);
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<ConfigUnreadable>(), "ConfigUnreadable");
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec<u8>");
    }
}
