use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;

use crate::error::EdgeError;
use crate::hook::{CallKwargs, CallMetadata, CompletionEvent, CompletionHooks};
use crate::http::{Extensions, HeaderMap, Method, StatusCode, Uri};

/// Outbound request description for a proxied call.
pub struct ProxyRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    extensions: Extensions,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            extensions: Extensions::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Bytes {
        &mut self.body
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn into_parts(self) -> (Method, Uri, HeaderMap, Bytes, Extensions) {
        (
            self.method,
            self.uri,
            self.headers,
            self.body,
            self.extensions,
        )
    }
}

impl fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .finish()
    }
}

pub struct ProxyResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    extensions: Extensions,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            extensions: Extensions::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Bytes {
        &mut self.body
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Metadata stamped onto the call by the completion hook, if the call went through [`ProxyService`].
    pub fn call_metadata(&self) -> Option<&CallMetadata> {
        self.extensions.get::<CallMetadata>()
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes, Extensions) {
        (self.status, self.headers, self.body, self.extensions)
    }
}

impl fmt::Debug for ProxyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyResponse")
            .field("status", &self.status)
            .finish()
    }
}

#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError>;
}

/// Minimal host: forwards calls through a [`ProxyClient`] and notifies the
/// completion hook once each call has finished.
#[derive(Clone)]
pub struct ProxyService {
    client: Arc<dyn ProxyClient>,
    hooks: CompletionHooks,
}

impl fmt::Debug for ProxyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyService")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl ProxyService {
    pub fn new(client: Arc<dyn ProxyClient>, hooks: CompletionHooks) -> Self {
        Self { client, hooks }
    }

    pub fn with_client<C>(client: C, hooks: CompletionHooks) -> Self
    where
        C: ProxyClient + 'static,
    {
        Self::new(Arc::new(client), hooks)
    }

    pub fn hooks(&self) -> &CompletionHooks {
        &self.hooks
    }

    pub async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let mut kwargs = CallKwargs::from_body(request.body());

        let started_at = Utc::now();
        let result = self.client.send(request).await;
        let finished_at = Utc::now();

        {
            let mut event = CompletionEvent {
                kwargs: &mut kwargs,
                outcome: result.as_ref(),
                started_at,
                finished_at,
            };
            self.hooks.notify(&mut event).await;
        }

        let metadata = CallMetadata(kwargs.metadata().cloned().unwrap_or_default());
        let elapsed = (finished_at - started_at).num_milliseconds();
        let metadata_json = Value::Object(metadata.0.clone());

        match result {
            Ok(mut response) => {
                log::info!(
                    "call completed method={} path={} status={} elapsed_ms={} metadata={}",
                    method,
                    path,
                    response.status().as_u16(),
                    elapsed,
                    metadata_json
                );
                response.extensions_mut().insert(metadata);
                Ok(response)
            }
            Err(err) => {
                log::error!(
                    "call failed method={} path={} error={} elapsed_ms={} metadata={}",
                    method,
                    path,
                    err.message(),
                    elapsed,
                    metadata_json
                );
                Err(err)
            }
        }
    }
}
