//! Upload stored records and delete the ones a sink accepted
//!
//! Two strategies are supported:
//!
//! - [`FlushMode::Serial`] uploads in stored order and stops at the first
//!   rejection, so a sink that needs ordered delivery never sees a gap.
//! - [`FlushMode::Parallel`] uploads every record independently with bounded
//!   concurrency and deletes all accepted records in one transaction.
//!
//! In both modes a record is deleted only when its upload returned
//! `Ok(true)`, and the store is compacted once at the end if anything was
//! deleted.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crashlog_core::{LogStore, Record, RecordId};

use crate::aggregation::scan_records;
use crate::error::{EngineError, FlushError};

/// Error raised by an uploader
pub type UploadError = Box<dyn std::error::Error + Send + Sync>;

/// Delivers one record to a remote sink
///
/// Returning `Ok(false)` means the sink declined the record; it stays in the
/// store. Any closure `Fn(R, CancellationToken) -> impl Future<Output =
/// Result<bool, UploadError>>` returning an owned future is an uploader.
#[async_trait]
pub trait Uploader<R: Record>: Send + Sync {
    async fn upload(&self, record: R, token: CancellationToken) -> Result<bool, UploadError>;
}

#[async_trait]
impl<R, F, Fut> Uploader<R> for F
where
    R: Record,
    F: Fn(R, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, UploadError>> + Send + 'static,
{
    async fn upload(&self, record: R, token: CancellationToken) -> Result<bool, UploadError> {
        self(record, token).await
    }
}

/// Flush strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Stop at the first record the sink does not accept
    #[default]
    Serial,
    /// Attempt every record; delete the accepted ones
    Parallel,
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::Serial => write!(f, "serial"),
            FlushMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for FlushMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(FlushMode::Serial),
            "parallel" => Ok(FlushMode::Parallel),
            other => Err(EngineError::validation(format!(
                "unknown flush mode '{other}', expected serial or parallel"
            ))),
        }
    }
}

/// Flush settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub mode: FlushMode,
    /// Upper bound on in-flight uploads in parallel mode (0 is treated as 1)
    pub max_concurrent_uploads: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            mode: FlushMode::Serial,
            max_concurrent_uploads: 8,
        }
    }
}

impl FlushConfig {
    pub fn with_mode(mut self, mode: FlushMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, limit: usize) -> Self {
        self.max_concurrent_uploads = limit;
        self
    }

    fn concurrency(&self) -> usize {
        self.max_concurrent_uploads.max(1)
    }
}

/// Upload every stored record of kind `R` and delete the accepted ones
///
/// Returns the number of records deleted. Cancellation is not an error: the
/// flush stops starting new uploads and reports what it managed.
#[instrument(skip_all, fields(kind = %R::KIND, mode = %config.mode))]
pub async fn flush<R, S, U>(
    store: &S,
    uploader: &U,
    token: &CancellationToken,
    config: &FlushConfig,
) -> Result<usize, FlushError>
where
    R: Record,
    S: LogStore + ?Sized,
    U: Uploader<R> + ?Sized,
{
    let records = scan_records::<R, S>(store, |_| true).await?;
    if records.is_empty() {
        debug!("Nothing to flush");
        return Ok(0);
    }

    let outcome = match config.mode {
        FlushMode::Serial => flush_serial(store, uploader, token, records).await,
        FlushMode::Parallel => {
            flush_parallel(store, uploader, token, records, config.concurrency()).await
        }
    };

    let flushed = match &outcome {
        Ok(flushed) => *flushed,
        Err(FlushError::Upload { flushed, .. }) => *flushed,
        Err(FlushError::Storage(_)) => return outcome,
    };

    // Deletions are already committed; a failed compaction must not hide them
    if flushed > 0
        && let Err(e) = store.compact().await
    {
        warn!(flushed, error = %e, "Compaction after flush failed");
    }
    info!(flushed, "Flush finished");
    outcome
}

async fn flush_serial<R, S, U>(
    store: &S,
    uploader: &U,
    token: &CancellationToken,
    records: Vec<(RecordId, R)>,
) -> Result<usize, FlushError>
where
    R: Record,
    S: LogStore + ?Sized,
    U: Uploader<R> + ?Sized,
{
    let mut flushed = 0;
    for (id, record) in records {
        if token.is_cancelled() {
            debug!(flushed, "Flush cancelled");
            break;
        }

        match uploader.upload(record, token.clone()).await {
            Ok(true) => {
                if store.delete_by_id(R::KIND, id).await? {
                    flushed += 1;
                } else {
                    debug!(id = %id, "Record already gone after upload");
                }
            }
            Ok(false) => {
                debug!(id = %id, flushed, "Upload declined, stopping");
                break;
            }
            Err(source) => {
                warn!(id = %id, flushed, error = %source, "Upload failed");
                return Err(FlushError::Upload { flushed, source });
            }
        }
    }
    Ok(flushed)
}

async fn flush_parallel<R, S, U>(
    store: &S,
    uploader: &U,
    token: &CancellationToken,
    records: Vec<(RecordId, R)>,
    limit: usize,
) -> Result<usize, FlushError>
where
    R: Record,
    S: LogStore + ?Sized,
    U: Uploader<R> + ?Sized,
{
    let results: Vec<(RecordId, Option<Result<bool, UploadError>>)> = stream::iter(records)
        .map(|(id, record)| async move {
            if token.is_cancelled() {
                return (id, None);
            }
            (id, Some(uploader.upload(record, token.clone()).await))
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut accepted = Vec::new();
    let mut first_error = None;
    for (id, result) in results {
        match result {
            Some(Ok(true)) => accepted.push(id),
            Some(Ok(false)) | None => {}
            Some(Err(e)) => {
                warn!(id = %id, error = %e, "Upload failed");
                first_error.get_or_insert(e);
            }
        }
    }

    // Store order, not completion order
    accepted.sort_unstable();
    let flushed = if accepted.is_empty() {
        0
    } else {
        store.delete_ids(R::KIND, &accepted).await?.len()
    };

    match first_error {
        Some(source) => Err(FlushError::Upload { flushed, source }),
        None => Ok(flushed),
    }
}
