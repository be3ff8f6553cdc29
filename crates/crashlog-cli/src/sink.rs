//! Directory sink: a local stand-in for a remote collector

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crashlog_core::Record;
use crashlog_engine::{UploadError, Uploader};

/// Writes each uploaded record as `<kind>-<uid>.json` into a directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Create the sink, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl<R: Record + Serialize> Uploader<R> for DirectorySink {
    async fn upload(&self, record: R, token: CancellationToken) -> Result<bool, UploadError> {
        if token.is_cancelled() {
            return Ok(false);
        }

        let path = self.dir.join(format!("{}-{}.json", R::KIND, record.uid()));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?).await?;
        debug!(path = %path.display(), "Uploaded record");
        Ok(true)
    }
}
