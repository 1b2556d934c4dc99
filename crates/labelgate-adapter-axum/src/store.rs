//! Label store backends for hosts running on tokio.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use labelgate_core::label::{LabelError, LabelStore};
use labelgate_core::manifest::DEFAULT_LABEL_FILE_NAME;

/// Label kept in a single plain-text file.
///
/// The file holds the label bytes and nothing else. A missing file means no
/// label has been set; an empty file is an empty label. Writes truncate and
/// rewrite the file in place, with no locking and no atomic rename.
#[derive(Clone, Debug)]
pub struct FileLabelStore {
    path: PathBuf,
}

impl FileLabelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileLabelStore {
    /// `current_feature.txt` in the system temp directory.
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_LABEL_FILE_NAME))
    }
}

#[async_trait]
impl LabelStore for FileLabelStore {
    async fn load(&self) -> Result<Option<String>, LabelError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| LabelError::Encoding),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LabelError::Io(err)),
        }
    }

    async fn save(&self, label: &str) -> Result<(), LabelError> {
        tokio::fs::write(&self.path, label.as_bytes()).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Process-local label; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryLabelStore {
    label: Mutex<Option<String>>,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_label(&self) -> Result<MutexGuard<'_, Option<String>>, LabelError> {
        self.label
            .lock()
            .map_err(|_| LabelError::Internal(anyhow::anyhow!("label store lock poisoned")))
    }
}

#[async_trait]
impl LabelStore for MemoryLabelStore {
    async fn load(&self) -> Result<Option<String>, LabelError> {
        Ok(self.lock_label()?.clone())
    }

    async fn save(&self, label: &str) -> Result<(), LabelError> {
        *self.lock_label()? = Some(label.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
