//! Record types persisted by a log store
//!
//! Two record kinds exist: [`ExceptionReport`] and [`EventRecord`]. Both are
//! immutable once stored; the store offers insert and delete, never update.
//! The [`Record`] trait ties each concrete type to its [`RecordKind`] so the
//! engine can be written once, generic over the kind, and resolved at the
//! call site.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_more::Display as DeriveDisplay;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseKindError, ParsePriorityError};
use crate::version::AppVersion;

/// The closed set of record kinds a store holds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, DeriveDisplay,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[display("exception")]
    Exception,
    #[display("event")]
    Event,
}

impl RecordKind {
    /// Both kinds, in a fixed order
    pub const ALL: [RecordKind; 2] = [RecordKind::Exception, RecordKind::Event];

    /// Plural label used in export documents (`Exceptions`, `Events`)
    pub fn plural_label(&self) -> &'static str {
        match self {
            RecordKind::Exception => "Exceptions",
            RecordKind::Event => "Events",
        }
    }
}

impl FromStr for RecordKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exception" | "exceptions" => Ok(RecordKind::Exception),
            "event" | "events" => Ok(RecordKind::Event),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// Event priority, ordered by importance: `Error < Warning < Info < Verbose < Debug`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Priority {
    Error,
    Warning,
    /// Default priority for ad-hoc events
    #[default]
    Info,
    Verbose,
    Debug,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Error,
        Priority::Warning,
        Priority::Info,
        Priority::Verbose,
        Priority::Debug,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Priority::Error => "Error",
            Priority::Warning => "Warning",
            Priority::Info => "Info",
            Priority::Verbose => "Verbose",
            Priority::Debug => "Debug",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParsePriorityError(s.to_string()))
    }
}

/// Internal storage identity of a record
///
/// Assigned by the store on insert, never reused. Ascending ids follow
/// insertion order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    DeriveDisplay,
)]
#[display("#{_0}")]
pub struct RecordId(pub u64);

/// A captured exception
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionReport {
    /// Unique across all exception reports
    pub uid: Uuid,
    /// Type name of the exception, the key for occurrence statistics
    pub exception_type: String,
    /// Numeric error code reported with the exception
    pub hresult: i32,
    pub message: Option<String>,
    pub source: Option<String>,
    pub stack_trace: Option<String>,
    /// Process memory in use when the exception was captured, in bytes
    pub used_memory: u64,
    pub timestamp: DateTime<Utc>,
    pub app_version: AppVersion,
}

impl ExceptionReport {
    /// Create a new report with a fresh uid
    pub fn new(
        exception_type: impl Into<String>,
        hresult: i32,
        timestamp: DateTime<Utc>,
        app_version: AppVersion,
    ) -> Self {
        Self {
            uid: Uuid::new_v4(),
            exception_type: exception_type.into(),
            hresult,
            message: None,
            source: None,
            stack_trace: None,
            used_memory: 0,
            timestamp,
            app_version,
        }
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
}

/// A free-form application event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub uid: Uuid,
    pub priority: Priority,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub app_version: AppVersion,
}

impl EventRecord {
    /// Create a new event with a fresh uid
    pub fn new(
        priority: Priority,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        app_version: AppVersion,
    ) -> Self {
        Self {
            uid: Uuid::new_v4(),
            priority,
            message: message.into(),
            timestamp,
            app_version,
        }
    }
}

/// Either record kind, as stored and scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Exception(ExceptionReport),
    Event(EventRecord),
}

impl LogRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            LogRecord::Exception(_) => RecordKind::Exception,
            LogRecord::Event(_) => RecordKind::Event,
        }
    }

    pub fn uid(&self) -> Uuid {
        match self {
            LogRecord::Exception(r) => r.uid,
            LogRecord::Event(r) => r.uid,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogRecord::Exception(r) => r.timestamp,
            LogRecord::Event(r) => r.timestamp,
        }
    }

    pub fn app_version(&self) -> AppVersion {
        match self {
            LogRecord::Exception(r) => r.app_version,
            LogRecord::Event(r) => r.app_version,
        }
    }
}

impl From<ExceptionReport> for LogRecord {
    fn from(report: ExceptionReport) -> Self {
        LogRecord::Exception(report)
    }
}

impl From<EventRecord> for LogRecord {
    fn from(event: EventRecord) -> Self {
        LogRecord::Event(event)
    }
}

/// A scanned record together with its internal store id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: LogRecord,
}

impl StoredRecord {
    pub fn new(id: RecordId, record: LogRecord) -> Self {
        Self { id, record }
    }

    /// Narrow to a concrete record type, `None` if the kind does not match
    pub fn into_typed<R: Record>(self) -> Option<(RecordId, R)> {
        R::from_log(self.record).map(|r| (self.id, r))
    }
}

/// Compile-time record kind
///
/// Implemented by [`ExceptionReport`] and [`EventRecord`]. Engine operations
/// are generic over `R: Record` and use [`Record::KIND`] to address the
/// store, so the kind is fixed where the operation is called.
pub trait Record: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn uid(&self) -> Uuid;

    fn timestamp(&self) -> DateTime<Utc>;

    fn app_version(&self) -> AppVersion;

    fn into_log(self) -> LogRecord;

    fn from_log(record: LogRecord) -> Option<Self>;

    fn from_log_ref(record: &LogRecord) -> Option<&Self>;
}

impl Record for ExceptionReport {
    const KIND: RecordKind = RecordKind::Exception;

    fn uid(&self) -> Uuid {
        self.uid
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn app_version(&self) -> AppVersion {
        self.app_version
    }

    fn into_log(self) -> LogRecord {
        LogRecord::Exception(self)
    }

    fn from_log(record: LogRecord) -> Option<Self> {
        match record {
            LogRecord::Exception(r) => Some(r),
            LogRecord::Event(_) => None,
        }
    }

    fn from_log_ref(record: &LogRecord) -> Option<&Self> {
        match record {
            LogRecord::Exception(r) => Some(r),
            LogRecord::Event(_) => None,
        }
    }
}

impl Record for EventRecord {
    const KIND: RecordKind = RecordKind::Event;

    fn uid(&self) -> Uuid {
        self.uid
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn app_version(&self) -> AppVersion {
        self.app_version
    }

    fn into_log(self) -> LogRecord {
        LogRecord::Event(self)
    }

    fn from_log(record: LogRecord) -> Option<Self> {
        match record {
            LogRecord::Event(r) => Some(r),
            LogRecord::Exception(_) => None,
        }
    }

    fn from_log_ref(record: &LogRecord) -> Option<&Self> {
        match record {
            LogRecord::Event(r) => Some(r),
            LogRecord::Exception(_) => None,
        }
    }
}
