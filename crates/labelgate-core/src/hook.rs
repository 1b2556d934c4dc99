//! Completion callbacks invoked by the host proxy after every forwarded call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};

use crate::error::EdgeError;
use crate::label::LabelHandle;
use crate::proxy::ProxyResponse;

/// Key under which call metadata travels in [`CallKwargs`].
pub const METADATA_KEY: &str = "metadata";

/// Metadata key carrying the active feature label.
pub const FEATURE_KEY: &str = "feature";

/// Keyword arguments describing one proxied call.
///
/// Built from the JSON object in the request body. Whatever a hook places
/// under `metadata` is preserved by the host and reported with the call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallKwargs {
    inner: Map<String, Value>,
    metadata: Option<Map<String, Value>>,
}

impl CallKwargs {
    /// Split `metadata` out of the call arguments.
    ///
    /// A `metadata` entry that is not a JSON object is discarded, so the first
    /// hook to write metadata starts from an empty mapping.
    pub fn new(mut inner: Map<String, Value>) -> Self {
        let metadata = match inner.remove(METADATA_KEY) {
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                log::debug!("replacing non-object call metadata {other}");
                None
            }
            None => None,
        };
        Self { inner, metadata }
    }

    /// Parse kwargs from a request body. Anything but a JSON object yields empty kwargs.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Self::new(map),
            _ => Self::default(),
        }
    }

    /// Call argument other than `metadata`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    /// Metadata mapping, created when missing.
    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        self.metadata.get_or_insert_with(Map::new)
    }
}

/// Final metadata of a completed call, attached to the proxied response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallMetadata(pub Map<String, Value>);

impl CallMetadata {
    pub fn feature(&self) -> Option<&str> {
        self.0.get(FEATURE_KEY).and_then(Value::as_str)
    }
}

/// Everything a hook sees about one finished call.
pub struct CompletionEvent<'a> {
    pub kwargs: &'a mut CallKwargs,
    pub outcome: Result<&'a ProxyResponse, &'a EdgeError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CompletionEvent<'_> {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Callback run by the host once per completed call, successful or not.
///
/// Hooks cannot fail; anything that goes wrong must be absorbed inside the hook.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completion(&self, event: &mut CompletionEvent<'_>);
}

/// Stamps the active feature label into every call's metadata.
#[derive(Clone, Debug)]
pub struct FeatureLabelHook {
    labels: LabelHandle,
}

impl FeatureLabelHook {
    pub fn new(labels: LabelHandle) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl CompletionHook for FeatureLabelHook {
    async fn on_completion(&self, event: &mut CompletionEvent<'_>) {
        let feature = self.labels.read().await;
        event
            .kwargs
            .metadata_mut()
            .insert(FEATURE_KEY.to_string(), Value::String(feature));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("a completion hook is already registered")]
    AlreadyRegistered,
}

/// Single-assignment completion hook slot owned by the host.
///
/// Registration happens once at startup; later attempts are rejected instead of
/// silently replacing or appending to the existing hook.
#[derive(Clone, Default)]
pub struct CompletionHooks {
    slot: Arc<OnceCell<Arc<dyn CompletionHook>>>,
}

impl fmt::Debug for CompletionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHooks")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl CompletionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&self, hook: H) -> Result<(), HookError>
    where
        H: CompletionHook + 'static,
    {
        self.register_arc(Arc::new(hook))
    }

    pub fn register_arc(&self, hook: Arc<dyn CompletionHook>) -> Result<(), HookError> {
        self.slot
            .set(hook)
            .map_err(|_| HookError::AlreadyRegistered)
    }

    pub fn is_registered(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Run the registered hook, if any.
    pub async fn notify(&self, event: &mut CompletionEvent<'_>) {
        if let Some(hook) = self.slot.get() {
            hook.on_completion(event).await;
        }
    }
}
