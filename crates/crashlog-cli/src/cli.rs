use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use crashlog_core::{AppVersion, Priority, RecordKind};
use crashlog_engine::FlushMode;

#[derive(Debug, Parser)]
#[command(name = "crashlog", about = "Inspect and maintain a local crash and event log")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Database file, overriding the configuration
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List exceptions grouped by app version, with per-type statistics
    Exceptions {
        /// Only this exception type
        #[arg(long = "type")]
        exception_type: Option<String>,
        /// Only this app version
        #[arg(long)]
        version: Option<AppVersion>,
        /// Only records younger than this many seconds
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// One line per exception type, most frequent first
    Summary,
    /// List events grouped by app version
    Events {
        /// Only events at least this important
        #[arg(long)]
        priority: Option<Priority>,
        /// Only this app version
        #[arg(long)]
        version: Option<AppVersion>,
        /// Only records younger than this many seconds
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Record an event
    Log {
        message: String,
        #[arg(long, default_value = "info")]
        priority: Priority,
    },
    /// Delete records by age, version or count
    #[command(group(
        ArgGroup::new("limit")
            .required(true)
            .args(["max_age_secs", "below_version", "max_count"])
    ))]
    Trim {
        /// Record kind (exceptions or events); both when omitted
        #[arg(long)]
        kind: Option<RecordKind>,
        /// Delete records older than this many seconds
        #[arg(long)]
        max_age_secs: Option<u64>,
        /// Delete records from versions below this one
        #[arg(long)]
        below_version: Option<AppVersion>,
        /// Keep only this many most recent records
        #[arg(long, allow_hyphen_values = true)]
        max_count: Option<i64>,
    },
    /// Apply the retention policy from the configuration
    Retain,
    /// Delete all records of a kind, optionally only one version
    Reset {
        #[arg(long)]
        kind: Option<RecordKind>,
        #[arg(long)]
        version: Option<AppVersion>,
    },
    /// Copy the raw database file
    Export {
        path: PathBuf,
    },
    /// Export records as a JSON document
    ExportJson {
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Only this record kind
        #[arg(long)]
        kind: Option<RecordKind>,
    },
    /// Upload records as JSON files into a directory and delete them
    Flush {
        #[arg(long)]
        to_dir: PathBuf,
        /// Record kind; both when omitted
        #[arg(long)]
        kind: Option<RecordKind>,
        /// Overrides the configured flush mode
        #[arg(long)]
        mode: Option<FlushMode>,
    },
    /// Print the store size in bytes
    Size,
}
