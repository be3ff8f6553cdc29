//! Configuration for a crash log instance

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crashlog_core::AppVersion;
use crashlog_storage::RedbLogStoreConfig;

use crate::error::{EngineError, EngineResult};
use crate::flush::FlushConfig;
use crate::retention::RetentionPolicy;

/// Configuration for a [`CrashLog`](crate::CrashLog)
///
/// Every section has defaults, so a TOML file only needs the keys it changes:
///
/// ```toml
/// app_version = "2.1.0.0"
///
/// [storage]
/// db_path = "/var/lib/myapp/crashlog.redb"
///
/// [flush]
/// mode = "parallel"
/// max_concurrent_uploads = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashLogConfig {
    /// Version stamped onto every record written through this instance
    pub app_version: AppVersion,
    pub storage: RedbLogStoreConfig,
    pub flush: FlushConfig,
    pub retention: RetentionPolicy,
}

impl CrashLogConfig {
    /// Parse a TOML document
    pub fn from_toml_str(toml: &str) -> EngineResult<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Default configuration storing the database under `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: RedbLogStoreConfig::with_path(data_dir.into().join("crashlog.redb")),
            ..Default::default()
        }
    }

    pub fn with_app_version(mut self, version: AppVersion) -> Self {
        self.app_version = version;
        self
    }

    pub fn with_storage(mut self, storage: RedbLogStoreConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Override only the database path
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.db_path = path.into();
        self
    }

    pub fn with_flush(mut self, flush: FlushConfig) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush::FlushMode;

    #[test]
    fn test_empty_document_is_default() {
        let config = CrashLogConfig::from_toml_str("").unwrap();
        assert_eq!(config, CrashLogConfig::default());
        assert_eq!(config.flush.max_concurrent_uploads, 8);
    }

    #[test]
    fn test_partial_document() {
        let config = CrashLogConfig::from_toml_str(
            r#"
            app_version = "2.1"

            [flush]
            mode = "parallel"

            [retention]
            max_count = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.app_version, AppVersion::new(2, 1, 0, 0));
        assert_eq!(config.flush.mode, FlushMode::Parallel);
        assert_eq!(config.flush.max_concurrent_uploads, 8);
        assert_eq!(config.retention.max_count, Some(100));
        assert_eq!(config.storage, RedbLogStoreConfig::default());
    }

    #[test]
    fn test_invalid_document() {
        let err = CrashLogConfig::from_toml_str("app_version = \"one.two\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = CrashLogConfig::from_toml_str("[flush]\nmode = \"sideways\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("crashlog.toml");
        let config = CrashLogConfig::with_data_dir(dir.path())
            .with_app_version(AppVersion::new(3, 0, 0, 1));
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        assert_eq!(CrashLogConfig::load(&path).unwrap(), config);
        assert!(matches!(
            CrashLogConfig::load(dir.path().join("missing.toml")),
            Err(EngineError::Config(_))
        ));
    }
}
