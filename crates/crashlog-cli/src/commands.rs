//! Command execution
//!
//! Output goes to the supplied writer so commands can be tested without a
//! terminal; diagnostics go through `tracing`.

use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crashlog_core::{EventRecord, ExceptionReport, RecordKind};
use crashlog_engine::{
    CrashLog, CrashLogConfig, EventFilter, ExceptionFilter, ExportRequest, FlushMode, TrimReport,
};

use crate::cli::{Cli, Command};
use crate::sink::DirectorySink;

/// Resolve the configuration from `--config` and `--db`
pub fn load_config(cli: &Cli) -> anyhow::Result<CrashLogConfig> {
    let config = match &cli.config {
        Some(path) => CrashLogConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CrashLogConfig::default(),
    };
    Ok(match &cli.db {
        Some(db) => config.with_db_path(db),
        None => config,
    })
}

/// Run one command against the configured store
pub async fn run<W: Write>(cli: Cli, out: &mut W) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let log = CrashLog::open(config.clone())
        .with_context(|| format!("opening {}", config.storage.db_path.display()))?;
    execute(&log, cli.command, out).await
}

/// Execute `command` against an open crash log
pub async fn execute<W: Write>(
    log: &CrashLog,
    command: Command,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Exceptions {
            exception_type,
            version,
            max_age_secs,
        } => {
            let mut filter = ExceptionFilter::new();
            filter.exception_type = exception_type;
            filter.app_version = version;
            filter.max_age = max_age_secs.map(age);

            let groups = log.load_exceptions(&filter).await?;
            if groups.is_empty() {
                writeln!(out, "No exceptions")?;
            }
            for group in groups {
                writeln!(out, "{} ({})", group.app_version, group.count())?;
                for view in group.items {
                    let report = &view.report;
                    let stats = &view.stats;
                    writeln!(
                        out,
                        "  {} {} {} hresult={} occurrences={} versions={}..{} crashes={}..{}",
                        view.id,
                        stamp(report.timestamp),
                        report.exception_type,
                        report.hresult,
                        stats.occurrences,
                        stats.min_version,
                        stats.max_version,
                        stamp(stats.least_recent_crash),
                        stamp(stats.most_recent_crash),
                    )?;
                    if let Some(message) = &report.message {
                        writeln!(out, "      {message}")?;
                    }
                }
            }
        }

        Command::Summary => {
            let summary = log.exception_summary(&ExceptionFilter::new()).await?;
            if summary.is_empty() {
                writeln!(out, "No exceptions")?;
            }
            for line in summary {
                let stats = line.stats;
                writeln!(
                    out,
                    "{}: {} occurrence(s), versions {}..{}, last seen {}",
                    line.exception_type,
                    stats.occurrences,
                    stats.min_version,
                    stats.max_version,
                    stamp(stats.most_recent_crash),
                )?;
            }
        }

        Command::Events {
            priority,
            version,
            max_age_secs,
        } => {
            let mut filter = EventFilter::new();
            filter.max_priority = priority;
            filter.app_version = version;
            filter.max_age = max_age_secs.map(age);

            let groups = log.load_events(&filter).await?;
            if groups.is_empty() {
                writeln!(out, "No events")?;
            }
            for group in groups {
                writeln!(out, "{} ({})", group.app_version, group.count())?;
                for view in group.items {
                    let event = &view.event;
                    writeln!(
                        out,
                        "  {} {} [{}] {}",
                        view.id,
                        stamp(event.timestamp),
                        event.priority,
                        event.message
                    )?;
                }
            }
        }

        Command::Log { message, priority } => match log.log_event(priority, message).await {
            Some(uid) => writeln!(out, "Logged {uid}")?,
            None => anyhow::bail!("event could not be stored"),
        },

        Command::Trim {
            kind,
            max_age_secs,
            below_version,
            max_count,
        } => {
            let report = if let Some(secs) = max_age_secs {
                log.trim_by_age(kind, age(secs)).await?
            } else if let Some(version) = below_version {
                log.trim_by_version(kind, version).await?
            } else if let Some(count) = max_count {
                let mut report = TrimReport::default();
                for kind in kinds(kind) {
                    let trimmed = log.trim_to_count(kind, count).await?;
                    report.compacted |= trimmed.compacted;
                    report.deleted.extend(trimmed.deleted);
                }
                report
            } else {
                anyhow::bail!("one of --max-age-secs, --below-version or --max-count is required");
            };
            print_report(out, &report)?;
        }

        Command::Retain => {
            let report = log.apply_retention().await?;
            print_report(out, &report)?;
        }

        Command::Reset { kind, version } => {
            let report = log.reset(kind, version).await?;
            print_report(out, &report)?;
        }

        Command::Export { path } => {
            let bytes = log.export(&path).await?;
            writeln!(out, "Wrote {bytes} bytes to {}", path.display())?;
        }

        Command::ExportJson { out: path, kind } => {
            let request = match kind {
                None => ExportRequest::all(),
                Some(RecordKind::Exception) => ExportRequest::exceptions(ExceptionFilter::new()),
                Some(RecordKind::Event) => ExportRequest::events(EventFilter::new()),
            };
            match path {
                Some(path) => {
                    let document = log.export_as_json_to(&path, &request).await?;
                    writeln!(
                        out,
                        "Exported {} exception(s) and {} event(s) to {}",
                        document.exceptions_count.unwrap_or(0),
                        document.events_count.unwrap_or(0),
                        path.display()
                    )?;
                }
                None => {
                    let document = log.export_as_json(&request).await?;
                    writeln!(out, "{}", document.to_json_string()?)?;
                }
            }
        }

        Command::Flush { to_dir, kind, mode } => {
            let sink = DirectorySink::new(&to_dir)
                .with_context(|| format!("creating {}", to_dir.display()))?;
            let mode = mode.unwrap_or(log.config().flush.mode);

            let token = CancellationToken::new();
            let interrupt = tokio::spawn({
                let token = token.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Interrupted, finishing in-flight uploads");
                        token.cancel();
                    }
                }
            });

            let result = flush_kinds(log, &sink, &token, kind, mode, out).await;
            interrupt.abort();
            result?;
        }

        Command::Size => {
            writeln!(out, "{}", log.size_bytes().await?)?;
        }
    }
    Ok(())
}

async fn flush_kinds<W: Write>(
    log: &CrashLog,
    sink: &DirectorySink,
    token: &CancellationToken,
    kind: Option<RecordKind>,
    mode: FlushMode,
    out: &mut W,
) -> anyhow::Result<()> {
    for kind in kinds(kind) {
        let flushed = match kind {
            RecordKind::Exception => {
                log.flush_with_mode::<ExceptionReport, _>(sink, token, mode).await?
            }
            RecordKind::Event => log.flush_with_mode::<EventRecord, _>(sink, token, mode).await?,
        };
        writeln!(out, "Flushed {flushed} {}", kind.plural_label().to_lowercase())?;
    }
    Ok(())
}

fn kinds(kind: Option<RecordKind>) -> Vec<RecordKind> {
    match kind {
        Some(kind) => vec![kind],
        None => RecordKind::ALL.to_vec(),
    }
}

fn age(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn stamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_report<W: Write>(out: &mut W, report: &TrimReport) -> anyhow::Result<()> {
    writeln!(
        out,
        "Deleted {} record(s){}",
        report.deleted_count(),
        if report.compacted { ", compacted" } else { "" }
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    async fn run_args(dir: &TempDir, args: &[&str]) -> anyhow::Result<String> {
        let db = dir.path().join("crashlog.redb");
        let db = db.to_str().unwrap();
        let mut argv = vec!["crashlog", "--db", db];
        argv.extend_from_slice(args);

        let mut out = Vec::new();
        run(Cli::try_parse_from(argv)?, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    #[tokio::test]
    async fn test_log_list_and_trim() {
        let dir = TempDir::new().unwrap();
        run_args(&dir, &["log", "--priority", "warning", "first"]).await.unwrap();
        run_args(&dir, &["log", "second"]).await.unwrap();

        let listing = run_args(&dir, &["events"]).await.unwrap();
        assert!(listing.starts_with("0.0.0.0 (2)"));
        assert!(listing.contains("[Warning] first"));

        let important = run_args(&dir, &["events", "--priority", "warning"]).await.unwrap();
        assert!(important.contains("0.0.0.0 (1)"));

        let trimmed = run_args(&dir, &["trim", "--kind", "events", "--max-count", "1"])
            .await
            .unwrap();
        assert!(trimmed.starts_with("Deleted 1 record(s)"));

        let err = run_args(&dir, &["trim", "--max-count", "-1"]).await.unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
    }

    #[tokio::test]
    async fn test_flush_to_directory() {
        let dir = TempDir::new().unwrap();
        run_args(&dir, &["log", "a"]).await.unwrap();
        run_args(&dir, &["log", "b"]).await.unwrap();

        let outbox = dir.path().join("outbox");
        let outbox_arg = outbox.to_str().unwrap();
        let output = run_args(&dir, &["flush", "--to-dir", outbox_arg, "--mode", "parallel"])
            .await
            .unwrap();
        assert!(output.contains("Flushed 0 exceptions"));
        assert!(output.contains("Flushed 2 events"));
        assert_eq!(std::fs::read_dir(&outbox).unwrap().count(), 2);

        assert!(run_args(&dir, &["events"]).await.unwrap().contains("No events"));
    }

    #[tokio::test]
    async fn test_export_json_to_stdout() {
        let dir = TempDir::new().unwrap();
        run_args(&dir, &["log", "exported"]).await.unwrap();

        let json = run_args(&dir, &["export-json", "--kind", "events"]).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["EventsCount"], 1);
        assert!(value.get("Exceptions").is_none());
    }

    #[tokio::test]
    async fn test_config_file_and_db_override() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("crashlog.toml");
        std::fs::write(&config_path, "app_version = \"5.1\"\n[storage]\ndb_path = \"ignored.redb\"\n")
            .unwrap();

        let db = dir.path().join("override.redb");
        let cli = Cli::try_parse_from([
            "crashlog",
            "--config",
            config_path.to_str().unwrap(),
            "--db",
            db.to_str().unwrap(),
            "size",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.app_version, "5.1".parse::<crashlog_core::AppVersion>().unwrap());
        assert_eq!(config.storage.db_path, db);
    }
}
