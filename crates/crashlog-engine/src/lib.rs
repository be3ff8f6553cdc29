//! # Crashlog Engine
//!
//! Aggregation, retention, export and flush over any [`LogStore`].
//!
//! Every operation takes the store explicitly, so several independent stores
//! (say, the live log and a copy loaded for export) can be used side by side.
//! [`CrashLog`] bundles a store, a clock and a [`CrashLogConfig`] for callers
//! that want a single handle.
//!
//! ## Modules
//!
//! - [`aggregation`]: version-grouped queries with per-type exception statistics
//! - [`retention`]: trimming by age, version and count; reset
//! - [`flush`]: upload records to a sink and delete the accepted ones
//! - [`export`]: raw store copies and JSON documents
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crashlog_core::{AppVersion, Priority};
//! use crashlog_engine::{CrashLog, EventFilter};
//! use crashlog_storage::InMemoryLogStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let log = CrashLog::with_store(Arc::new(InMemoryLogStore::new()), AppVersion::new(1, 0, 0, 0));
//!
//!     log.log_event(Priority::Warning, "disk almost full").await;
//!
//!     for group in log.load_events(&EventFilter::new()).await.unwrap() {
//!         println!("{} ({})", group.app_version, group.count());
//!     }
//! }
//! ```

pub mod aggregation;
pub mod config;
pub mod crash_log;
pub mod error;
pub mod export;
pub mod flush;
pub mod retention;

// Re-exports
pub use aggregation::{
    EventFilter, EventView, ExceptionFilter, ExceptionStats, ExceptionTypeSummary, ExceptionView,
    VersionGroup,
};
pub use config::CrashLogConfig;
pub use crash_log::{CrashLog, ExceptionInfo};
pub use error::{EngineError, EngineResult, FlushError};
pub use export::{EventEntry, ExceptionEntry, ExportDocument, ExportRequest};
pub use flush::{FlushConfig, FlushMode, UploadError, Uploader};
pub use retention::{RetentionPolicy, TrimReport};

pub use crashlog_core::LogStore;
