//! Tracing subscriber setup for Crashlog binaries
//!
//! Libraries in this workspace only emit `tracing` events; this crate decides
//! where they go.
//!
//! # Features
//!
//! - **Console Output**: pretty or JSONL lines on stderr
//! - **File Output**: JSONL files with daily/hourly rotation via tracing-appender
//! - **RUST_LOG**: the environment filter overrides the configured level
//!
//! # Quick Start
//!
//! ```ignore
//! use crashlog_logging::{LogConfig, SubscriberBuilder};
//!
//! // Keep the guard alive so buffered file output is flushed on exit
//! let _guard = SubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, LogConfig, RotationStrategy};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for configuring and initializing the logging subscriber
#[derive(Debug, Default)]
pub struct SubscriberBuilder {
    config: LogConfig,
}

impl SubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Initialize the subscriber globally
    ///
    /// Returns a guard that must be kept alive for the duration of the
    /// program when file output is configured.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been set or the log file
    /// cannot be created. Use [`try_init`](Self::try_init) to handle these.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => panic!("failed to initialize logging: {e}"),
        }
    }

    /// Initialize the subscriber globally, reporting failures
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if self.config.console.enabled {
            layers.push(console_layer(&self.config.console));
        }

        let mut guard = None;
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .flatten_event(true)
                    .with_writer(writer)
                    .boxed(),
            );
            guard = Some(file_guard);
        }

        Registry::default().with(layers).with(env_filter).try_init()?;
        Ok(guard)
    }
}

fn console_layer(config: &ConsoleConfig) -> BoxedLayer {
    if config.pretty {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.ansi)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .boxed()
    }
}

// Truncates for Never rotation, appends for the others
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::new(rotation, &config.directory, &config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_never_rotation_creates_single_file() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig {
            directory: dir.path().join("logs"),
            prefix: "unit".to_string(),
            rotation: RotationStrategy::Never,
        };

        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(dir.path().join("logs").join("unit.log").exists());
    }

    // Only test in this binary that installs a global subscriber
    #[test]
    fn test_try_init_writes_jsonl_and_rejects_second_install() {
        let dir = TempDir::new().unwrap();
        let file = FileConfig {
            directory: dir.path().to_path_buf(),
            prefix: "crashlog".to_string(),
            rotation: RotationStrategy::Never,
        };

        let guard = SubscriberBuilder::new()
            .with_config(LogConfig::testing())
            .with_console(false)
            .with_level("info")
            .with_file_output(file)
            .try_init()
            .unwrap();
        assert!(guard.is_some());

        tracing::error!(records = 3, "store unavailable");
        drop(guard);

        let contents = std::fs::read_to_string(dir.path().join("crashlog.log")).unwrap();
        let line = contents.lines().next().unwrap();
        assert!(line.contains("\"records\":3"));
        assert!(line.contains("store unavailable"));

        let second = SubscriberBuilder::new().with_console(false).try_init();
        assert!(matches!(second, Err(LoggingError::AlreadyInitialized(_))));
    }
}
