//! Read-side aggregation over scanned records
//!
//! Turns a raw store scan into version-grouped views. Exception views carry
//! per-type statistics (occurrences, version range, crash-time range) that
//! are recomputed from the filtered record set on every query; nothing is
//! cached and nothing is written back to the store.
//!
//! The statistics and grouping steps are plain functions over slices so they
//! can be exercised without a store.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};

use crashlog_core::{
    AppVersion, EventRecord, ExceptionReport, LogRecord, LogStore, Priority, Record, RecordId,
    StorageError, StoredRecord,
};

/// Caller-supplied predicate over one record kind
pub type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Occurrence statistics for one exception type within a queried set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionStats {
    /// Number of reports sharing the exception type
    pub occurrences: usize,
    pub min_version: AppVersion,
    pub max_version: AppVersion,
    pub most_recent_crash: DateTime<Utc>,
    pub least_recent_crash: DateTime<Utc>,
}

impl ExceptionStats {
    fn first(report: &ExceptionReport) -> Self {
        Self {
            occurrences: 1,
            min_version: report.app_version,
            max_version: report.app_version,
            most_recent_crash: report.timestamp,
            least_recent_crash: report.timestamp,
        }
    }

    fn absorb(&mut self, report: &ExceptionReport) {
        self.occurrences += 1;
        self.min_version = self.min_version.min(report.app_version);
        self.max_version = self.max_version.max(report.app_version);
        self.most_recent_crash = self.most_recent_crash.max(report.timestamp);
        self.least_recent_crash = self.least_recent_crash.min(report.timestamp);
    }
}

/// An exception report together with the statistics of its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionView {
    pub id: RecordId,
    pub report: ExceptionReport,
    pub stats: ExceptionStats,
}

/// An event as returned by queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventView {
    pub id: RecordId,
    pub event: EventRecord,
}

/// Items that can be placed in a [`VersionGroup`]
pub trait Versioned {
    fn app_version(&self) -> AppVersion;
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Versioned for ExceptionView {
    fn app_version(&self) -> AppVersion {
        self.report.app_version
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.report.timestamp
    }
}

impl Versioned for EventView {
    fn app_version(&self) -> AppVersion {
        self.event.app_version
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.event.timestamp
    }
}

/// Records sharing one app version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGroup<T> {
    pub app_version: AppVersion,
    pub items: Vec<T>,
}

impl<T> VersionGroup<T> {
    /// Number of members, shown in the group header
    pub fn count(&self) -> usize {
        self.items.len()
    }
}

/// Filter for exception queries
#[derive(Clone, Default)]
pub struct ExceptionFilter {
    pub exception_type: Option<String>,
    pub app_version: Option<AppVersion>,
    /// Keep only reports younger than this
    pub max_age: Option<Duration>,
    predicate: Option<Predicate<ExceptionReport>>,
}

impl ExceptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, exception_type: impl Into<String>) -> Self {
        self.exception_type = Some(exception_type.into());
        self
    }

    pub fn with_version(mut self, version: AppVersion) -> Self {
        self.app_version = Some(version);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&ExceptionReport) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Type, version and custom predicate; age is checked separately
    pub fn matches(&self, report: &ExceptionReport) -> bool {
        self.exception_type
            .as_deref()
            .is_none_or(|t| report.exception_type == t)
            && self.app_version.is_none_or(|v| report.app_version == v)
            && self.predicate.as_ref().is_none_or(|p| p(report))
    }

    pub fn is_recent(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        within_age(self.max_age, timestamp, now)
    }
}

impl fmt::Debug for ExceptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionFilter")
            .field("exception_type", &self.exception_type)
            .field("app_version", &self.app_version)
            .field("max_age", &self.max_age)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Filter for event queries
#[derive(Clone, Default)]
pub struct EventFilter {
    /// Keep events at least as important as this (`priority <= max_priority`)
    pub max_priority: Option<Priority>,
    pub app_version: Option<AppVersion>,
    pub max_age: Option<Duration>,
    predicate: Option<Predicate<EventRecord>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_priority(mut self, priority: Priority) -> Self {
        self.max_priority = Some(priority);
        self
    }

    pub fn with_version(mut self, version: AppVersion) -> Self {
        self.app_version = Some(version);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&EventRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, event: &EventRecord) -> bool {
        self.max_priority.is_none_or(|p| event.priority <= p)
            && self.app_version.is_none_or(|v| event.app_version == v)
            && self.predicate.as_ref().is_none_or(|p| p(event))
    }

    pub fn is_recent(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        within_age(self.max_age, timestamp, now)
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("max_priority", &self.max_priority)
            .field("app_version", &self.app_version)
            .field("max_age", &self.max_age)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

fn within_age(max_age: Option<Duration>, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    max_age.is_none_or(|age| now - timestamp < age)
}

/// Scan one record kind, narrowed to its concrete type
pub async fn scan_records<R, S>(
    store: &S,
    matches: impl Fn(&R) -> bool + Send + Sync,
) -> Result<Vec<(RecordId, R)>, StorageError>
where
    R: Record,
    S: LogStore + ?Sized,
{
    let predicate = |record: &LogRecord| R::from_log_ref(record).is_some_and(&matches);
    let stored = store.scan_where(R::KIND, &predicate).await?;
    Ok(stored
        .into_iter()
        .filter_map(StoredRecord::into_typed::<R>)
        .collect())
}

/// Per-type statistics over a record set
pub fn compute_exception_stats<'a>(
    reports: impl IntoIterator<Item = &'a ExceptionReport>,
) -> HashMap<String, ExceptionStats> {
    let mut stats: HashMap<String, ExceptionStats> = HashMap::new();
    for report in reports {
        match stats.get_mut(&report.exception_type) {
            Some(existing) => existing.absorb(report),
            None => {
                stats.insert(report.exception_type.clone(), ExceptionStats::first(report));
            }
        }
    }
    stats
}

/// Pair every report with the statistics of its type within `records`
pub fn exception_views(records: Vec<(RecordId, ExceptionReport)>) -> Vec<ExceptionView> {
    let stats = compute_exception_stats(records.iter().map(|(_, r)| r));
    records
        .into_iter()
        .map(|(id, report)| {
            // Every type in `records` has an entry
            let stats = stats[&report.exception_type];
            ExceptionView { id, report, stats }
        })
        .collect()
}

/// Sort newest first; equal timestamps keep their incoming order
pub fn sort_newest_first<T: Versioned>(items: &mut [T]) {
    items.sort_by_key(|item| Reverse(item.timestamp()));
}

/// Partition items by app version
///
/// Groups are ordered by version descending, members by timestamp
/// descending. Every item lands in exactly one group.
pub fn group_by_version<T: Versioned>(items: Vec<T>) -> Vec<VersionGroup<T>> {
    let mut groups: BTreeMap<Reverse<AppVersion>, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(Reverse(item.app_version())).or_default().push(item);
    }

    groups
        .into_iter()
        .map(|(Reverse(app_version), mut items)| {
            sort_newest_first(&mut items);
            VersionGroup { app_version, items }
        })
        .collect()
}

/// Load exception reports grouped by app version, with per-type statistics
#[instrument(skip(store, filter))]
pub async fn load_exceptions<S: LogStore + ?Sized>(
    store: &S,
    filter: &ExceptionFilter,
    now: DateTime<Utc>,
) -> Result<Vec<VersionGroup<ExceptionView>>, StorageError> {
    let records: Vec<_> = scan_records::<ExceptionReport, S>(store, |r| filter.matches(r))
        .await?
        .into_iter()
        .filter(|(_, r)| filter.is_recent(r.timestamp, now))
        .collect();

    let groups = group_by_version(exception_views(records));
    debug!(groups = groups.len(), "Loaded exceptions");
    Ok(groups)
}

/// Load every report of one exception type, newest first, with statistics
pub async fn load_exceptions_by_type<S: LogStore + ?Sized>(
    store: &S,
    exception_type: &str,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Vec<ExceptionView>, StorageError> {
    let records: Vec<_> =
        scan_records::<ExceptionReport, S>(store, |r| r.exception_type == exception_type)
            .await?
            .into_iter()
            .filter(|(_, r)| within_age(max_age, r.timestamp, now))
            .collect();

    let mut views = exception_views(records);
    sort_newest_first(&mut views);
    Ok(views)
}

/// Load events grouped by app version
#[instrument(skip(store, filter))]
pub async fn load_events<S: LogStore + ?Sized>(
    store: &S,
    filter: &EventFilter,
    now: DateTime<Utc>,
) -> Result<Vec<VersionGroup<EventView>>, StorageError> {
    let views: Vec<EventView> = scan_records::<EventRecord, S>(store, |e| filter.matches(e))
        .await?
        .into_iter()
        .filter(|(_, e)| filter.is_recent(e.timestamp, now))
        .map(|(id, event)| EventView { id, event })
        .collect();

    let groups = group_by_version(views);
    debug!(groups = groups.len(), "Loaded events");
    Ok(groups)
}

/// One line of a per-type overview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTypeSummary {
    pub exception_type: String,
    pub stats: ExceptionStats,
}

/// Collapse grouped views into one summary per exception type
///
/// Sorted by occurrences descending, then type name.
pub fn exception_summary(groups: &[VersionGroup<ExceptionView>]) -> Vec<ExceptionTypeSummary> {
    let mut by_type: BTreeMap<&str, ExceptionStats> = BTreeMap::new();
    for view in groups.iter().flat_map(|g| &g.items) {
        by_type
            .entry(view.report.exception_type.as_str())
            .or_insert(view.stats);
    }

    let mut summary: Vec<_> = by_type
        .into_iter()
        .map(|(exception_type, stats)| ExceptionTypeSummary {
            exception_type: exception_type.to_string(),
            stats,
        })
        .collect();
    summary.sort_by(|a, b| {
        b.stats
            .occurrences
            .cmp(&a.stats.occurrences)
            .then_with(|| a.exception_type.cmp(&b.exception_type))
    });
    summary
}
