//! Storage-neutral slot for the active feature label.
//!
//! # Architecture
//!
//! ```text
//!  Endpoints / hooks     LabelHandle (read -> String, write)
//!      │                       │
//!      └──────────────────────►│  sentinel + trimming
//!                              │
//!                      Arc<dyn LabelStore>  (object-safe)
//!                              │
//!                    ┌─────────┴─────────┐
//!                    ▼                   ▼
//!             FileLabelStore      MemoryLabelStore
//! ```
//!
//! # Consistency Model
//!
//! There is exactly one label per store and no locking. Concurrent writers
//! race and the last write wins; a reader observes whatever the backend holds
//! at the instant of the read. The label is best-effort attribution metadata.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EdgeError;

/// Value reported when no label has been written yet.
pub const NOT_SET: &str = "-not-set";

/// Label written by `POST /set-context` when the body carries no `feature` key.
pub const DEFAULT_FEATURE: &str = "default";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors returned by label store backends.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    /// The backing storage could not be read or written.
    #[error("label store io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored bytes are not valid UTF-8.
    #[error("label store contents are not valid UTF-8")]
    Encoding,

    /// A general internal error.
    #[error("label store error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LabelError> for EdgeError {
    fn from(err: LabelError) -> Self {
        match err {
            LabelError::Internal(e) => EdgeError::internal(e),
            other => EdgeError::internal(anyhow::Error::new(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Object-safe interface for label storage backends.
///
/// Backends store the label verbatim. Trimming and the "not set" fallback are
/// applied by [`LabelHandle`], so every backend behaves the same way to callers.
///
/// Implementations exist in the axum adapter:
/// - `FileLabelStore`: one plain-text file, survives restarts
/// - `MemoryLabelStore`: process-local cell
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Load the stored label. Returns `Ok(None)` if nothing was ever written.
    async fn load(&self) -> Result<Option<String>, LabelError>;

    /// Replace the stored label with `label`, byte for byte.
    async fn save(&self, label: &str) -> Result<(), LabelError>;

    /// Short description of where the label lives, used in log lines.
    fn describe(&self) -> String {
        "label store".to_string()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A cloneable handle to the label store shared by endpoints and hooks.
#[derive(Clone)]
pub struct LabelHandle {
    store: Arc<dyn LabelStore>,
}

impl fmt::Debug for LabelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelHandle")
            .field("store", &self.store.describe())
            .finish()
    }
}

impl LabelHandle {
    /// Create a new handle wrapping a store implementation.
    pub fn new(store: Arc<dyn LabelStore>) -> Self {
        Self { store }
    }

    /// Wrap a concrete store.
    pub fn with_store<S>(store: S) -> Self
    where
        S: LabelStore + 'static,
    {
        Self {
            store: Arc::new(store),
        }
    }

    /// Current label, trimmed of surrounding whitespace.
    ///
    /// Never fails: a missing label and a storage error both yield [`NOT_SET`].
    pub async fn read(&self) -> String {
        match self.try_read().await {
            Ok(Some(label)) => label,
            Ok(None) => NOT_SET.to_string(),
            Err(err) => {
                log::warn!(
                    "reading label from {} failed, reporting it as unset: {}",
                    self.store.describe(),
                    err
                );
                NOT_SET.to_string()
            }
        }
    }

    /// Trimmed label without the sentinel fallback.
    pub async fn try_read(&self) -> Result<Option<String>, LabelError> {
        Ok(self
            .store
            .load()
            .await?
            .map(|label| label.trim().to_string()))
    }

    /// Overwrite the label. No trimming, validation or size limit.
    pub async fn write(&self, label: &str) -> Result<(), LabelError> {
        self.store.save(label).await?;
        log::debug!("label set to {:?} in {}", label, self.store.describe());
        Ok(())
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }
}

// ---------------------------------------------------------------------------
// Contract test macro
// ---------------------------------------------------------------------------

/// Generate a suite of contract tests for any [`LabelStore`] implementation.
///
/// The macro takes the module name and a factory expression producing a fresh
/// store. The generated tests run on a tokio runtime, so the calling crate needs
/// `tokio` with the `macros` and `rt` features as a dev-dependency.
///
/// # Example
///
/// ```rust,ignore
/// labelgate_core::label_store_contract_tests!(file_label_contract, {
///     let dir = tempfile::tempdir().unwrap();
///     FileLabelStore::new(dir.keep().join("label.txt"))
/// });
/// ```
#[macro_export]
macro_rules! label_store_contract_tests {
    ($mod_name:ident, $factory:expr) => {
        mod $mod_name {
            use super::*;
            use $crate::label::{LabelHandle, LabelStore, NOT_SET};

            #[tokio::test]
            async fn contract_load_before_save_is_none() {
                let store = $factory;
                assert_eq!(store.load().await.unwrap(), None);
            }

            #[tokio::test]
            async fn contract_save_then_load_is_verbatim() {
                let store = $factory;
                store.save("  padded\n").await.unwrap();
                assert_eq!(store.load().await.unwrap().as_deref(), Some("  padded\n"));
            }

            #[tokio::test]
            async fn contract_save_overwrites() {
                let store = $factory;
                store.save("a-much-longer-first-label").await.unwrap();
                store.save("second").await.unwrap();
                assert_eq!(store.load().await.unwrap().as_deref(), Some("second"));
            }

            #[tokio::test]
            async fn contract_handle_reports_sentinel_then_trimmed_label() {
                let handle = LabelHandle::with_store($factory);
                assert_eq!(handle.read().await, NOT_SET);
                handle.write("\tauth-fix  \n").await.unwrap();
                assert_eq!(handle.read().await, "auth-fix");
            }

            #[tokio::test]
            async fn contract_empty_label_is_not_the_sentinel() {
                let handle = LabelHandle::with_store($factory);
                handle.write("").await.unwrap();
                assert_eq!(handle.read().await, "");
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
