//! Retention: trimming records by age, version and count
//!
//! Every call that may delete compacts the store at most once, after all of
//! its deletions have been committed.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crashlog_core::{AppVersion, LogRecord, LogStore, RecordId, RecordKind, StoredRecord};

use crate::error::{EngineError, EngineResult};

/// Outcome of a retention call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Records removed, in store order per kind
    pub deleted: Vec<StoredRecord>,
    /// Whether the store was compacted afterwards
    pub compacted: bool,
}

impl TrimReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    fn absorb(&mut self, other: TrimReport) {
        self.deleted.extend(other.deleted);
        self.compacted |= other.compacted;
    }
}

/// Retention limits applied together by [`apply_policy`]
///
/// ```toml
/// [retention]
/// max_age_secs = 2592000
/// min_version = "2.0"
/// max_count = 500
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Drop records older than this many seconds
    pub max_age_secs: Option<u64>,
    /// Drop records produced by versions below this one
    pub min_version: Option<AppVersion>,
    /// Keep at most this many records per kind
    pub max_count: Option<u64>,
}

impl RetentionPolicy {
    pub fn with_max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn with_min_version(mut self, version: AppVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn with_max_count(mut self, count: u64) -> Self {
        self.max_count = Some(count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.max_age_secs.is_none() && self.min_version.is_none() && self.max_count.is_none()
    }
}

fn kinds(kind: Option<RecordKind>) -> &'static [RecordKind] {
    match kind {
        Some(RecordKind::Exception) => &[RecordKind::Exception],
        Some(RecordKind::Event) => &[RecordKind::Event],
        None => &RecordKind::ALL,
    }
}

// One write transaction whether one kind or both are targeted
async fn delete_matching<S: LogStore + ?Sized>(
    store: &S,
    kind: Option<RecordKind>,
    predicate: &(dyn Fn(&LogRecord) -> bool + Send + Sync),
) -> EngineResult<Vec<StoredRecord>> {
    Ok(store.delete_where_kinds(kinds(kind), predicate).await?)
}

async fn compact_after<S: LogStore + ?Sized>(
    store: &S,
    deleted: Vec<StoredRecord>,
) -> EngineResult<TrimReport> {
    let compacted = store.compact().await?;
    Ok(TrimReport { deleted, compacted })
}

/// Delete records older than `threshold`, then compact
#[instrument(skip(store))]
pub async fn trim_by_age<S: LogStore + ?Sized>(
    store: &S,
    kind: Option<RecordKind>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> EngineResult<TrimReport> {
    let report = compact_after(store, age_pass(store, kind, threshold, now).await?).await?;
    info!(deleted = report.deleted_count(), "Trimmed by age");
    Ok(report)
}

async fn age_pass<S: LogStore + ?Sized>(
    store: &S,
    kind: Option<RecordKind>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> EngineResult<Vec<StoredRecord>> {
    delete_matching(store, kind, &|record| now - record.timestamp() > threshold).await
}

/// Delete records produced by versions below `version`, then compact
#[instrument(skip(store, version), fields(version = %version))]
pub async fn trim_by_version<S: LogStore + ?Sized>(
    store: &S,
    kind: Option<RecordKind>,
    version: AppVersion,
) -> EngineResult<TrimReport> {
    let report = compact_after(store, version_pass(store, kind, version).await?).await?;
    info!(deleted = report.deleted_count(), "Trimmed by version");
    Ok(report)
}

async fn version_pass<S: LogStore + ?Sized>(
    store: &S,
    kind: Option<RecordKind>,
    version: AppVersion,
) -> EngineResult<Vec<StoredRecord>> {
    delete_matching(store, kind, &|record| record.app_version() < version).await
}

/// Keep only the `max_count` most recent records of `kind`
///
/// A store already within the limit is left untouched and not compacted.
/// Returns [`EngineError::Validation`] for a negative count without touching
/// the store.
#[instrument(skip(store))]
pub async fn trim_to_count<S: LogStore + ?Sized>(
    store: &S,
    kind: RecordKind,
    max_count: i64,
) -> EngineResult<TrimReport> {
    let max_count = usize::try_from(max_count).map_err(|_| {
        EngineError::validation(format!("max_count must not be negative, got {max_count}"))
    })?;

    let deleted = count_pass(store, kind, max_count).await?;
    if deleted.is_empty() {
        debug!(max_count, "Already within count limit");
        return Ok(TrimReport::default());
    }

    let report = compact_after(store, deleted).await?;
    info!(deleted = report.deleted_count(), "Trimmed to count");
    Ok(report)
}

async fn count_pass<S: LogStore + ?Sized>(
    store: &S,
    kind: RecordKind,
    max_count: usize,
) -> EngineResult<Vec<StoredRecord>> {
    let mut records = store.scan_all(kind).await?;
    if records.len() <= max_count {
        return Ok(Vec::new());
    }

    records.sort_by(oldest_first);
    let excess = records.len() - max_count;
    records.truncate(excess);

    let ids: Vec<_> = records.iter().map(|r| r.id).collect();
    let removed = store.delete_ids(kind, &ids).await?;
    if removed.len() < records.len() {
        debug!(
            expected = records.len(),
            removed = removed.len(),
            "Some records were deleted concurrently"
        );
        let removed: HashSet<RecordId> = removed.into_iter().collect();
        records.retain(|r| removed.contains(&r.id));
    }
    Ok(records)
}

fn oldest_first(a: &StoredRecord, b: &StoredRecord) -> Ordering {
    a.record
        .timestamp()
        .cmp(&b.record.timestamp())
        .then(a.id.cmp(&b.id))
}

/// Delete every record of the kind(s), optionally only one app version
///
/// Always compacts, even when nothing matched.
#[instrument(skip(store))]
pub async fn reset<S: LogStore + ?Sized>(
    store: &S,
    kind: Option<RecordKind>,
    version: Option<AppVersion>,
) -> EngineResult<TrimReport> {
    let deleted = delete_matching(store, kind, &|record| {
        version.is_none_or(|v| record.app_version() == v)
    })
    .await?;

    let report = compact_after(store, deleted).await?;
    info!(deleted = report.deleted_count(), "Reset store");
    Ok(report)
}

/// Apply every configured limit of `policy` to both kinds
///
/// Age, then version, then count. Compacts once at the end if anything was
/// deleted.
#[instrument(skip(store, policy))]
pub async fn apply_policy<S: LogStore + ?Sized>(
    store: &S,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> EngineResult<TrimReport> {
    let max_count = policy
        .max_count
        .map(|count| usize::try_from(count).unwrap_or(usize::MAX));

    let mut report = TrimReport::default();
    if let Some(secs) = policy.max_age_secs {
        let threshold = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        report.deleted.extend(age_pass(store, None, threshold, now).await?);
    }
    if let Some(version) = policy.min_version {
        report.deleted.extend(version_pass(store, None, version).await?);
    }
    if let Some(max_count) = max_count {
        for kind in RecordKind::ALL {
            report.deleted.extend(count_pass(store, kind, max_count).await?);
        }
    }

    if !report.deleted.is_empty() {
        report.absorb(compact_after(store, Vec::new()).await?);
    }
    info!(deleted = report.deleted_count(), "Applied retention policy");
    Ok(report)
}
