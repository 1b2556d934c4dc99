//! axum routes for the context endpoints and the upstream passthrough.

use std::time::Instant;

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::Response;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post, MethodRouter};
use axum::Router;

use labelgate_core::endpoints::{self, ErrorStatusPolicy, GET_CONTEXT_PATH, SET_CONTEXT_PATH};
use labelgate_core::error::EdgeError;
use labelgate_core::label::LabelHandle;
use labelgate_core::proxy::ProxyService;

use crate::request::{into_proxy_request, UpstreamTarget};
use crate::response::{into_axum_response, ErrorReply, Reply};

/// Upstream client plus the base URL it forwards to.
#[derive(Clone, Debug)]
pub struct Passthrough {
    pub service: ProxyService,
    pub target: UpstreamTarget,
}

/// Shared state behind every route.
#[derive(Clone, Debug)]
pub struct LabelGateState {
    pub labels: LabelHandle,
    pub passthrough: Option<Passthrough>,
    pub policy: ErrorStatusPolicy,
}

impl LabelGateState {
    pub fn new(labels: LabelHandle) -> Self {
        Self {
            labels,
            passthrough: None,
            policy: ErrorStatusPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_passthrough(mut self, service: ProxyService, target: UpstreamTarget) -> Self {
        self.passthrough = Some(Passthrough { service, target });
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ErrorStatusPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Just the two context endpoints, for mounting into an existing router.
pub fn context_routes(state: LabelGateState) -> Router {
    Router::new()
        .route(SET_CONTEXT_PATH, set_context_route())
        .route(GET_CONTEXT_PATH, get(get_context))
        .with_state(state)
}

/// Context endpoints, passthrough fallback and request logging.
pub fn build_router(state: LabelGateState) -> Router {
    Router::new()
        .route(SET_CONTEXT_PATH, set_context_route())
        .route(GET_CONTEXT_PATH, get(get_context))
        .fallback(forward)
        .with_state(state)
        .layer(middleware::from_fn(log_request))
}

/// Labels are stored verbatim, so the label body is not size-capped.
fn set_context_route() -> MethodRouter<LabelGateState> {
    post(set_context).layer(DefaultBodyLimit::disable())
}

async fn set_context(State(state): State<LabelGateState>, body: Bytes) -> Reply {
    Reply(endpoints::set_context(&state.labels, &body, state.policy).await)
}

async fn get_context(State(state): State<LabelGateState>) -> Reply {
    Reply(endpoints::get_context(&state.labels).await)
}

async fn forward(State(state): State<LabelGateState>, request: Request) -> Response<AxumBody> {
    let Some(passthrough) = state.passthrough else {
        return ErrorReply(EdgeError::not_found(request.uri().path())).into_response();
    };

    let proxy_request = match into_proxy_request(request, &passthrough.target).await {
        Ok(proxy_request) => proxy_request,
        Err(err) => return ErrorReply(err).into_response(),
    };

    match passthrough.service.forward(proxy_request).await {
        Ok(response) => into_axum_response(response),
        Err(err) => ErrorReply(err).into_response(),
    }
}

async fn log_request(request: Request, next: Next) -> Response<AxumBody> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    log::info!(
        "request method={} path={} status={} elapsed_ms={}",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLabelStore;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use labelgate_core::hook::{CallMetadata, CompletionHooks, FeatureLabelHook};
    use labelgate_core::proxy::{ProxyClient, ProxyRequest, ProxyResponse};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    fn state() -> LabelGateState {
        LabelGateState::new(LabelHandle::with_store(MemoryLabelStore::new()))
    }

    async fn call(router: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Bytes) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(AxumBody::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    fn json(body: &Bytes) -> serde_json::Value {
        serde_json::from_slice(body).expect("json body")
    }

    #[tokio::test]
    async fn set_and_get_through_router() {
        let router = build_router(state());

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/set-context",
            r#"{"feature":"auth-fix"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "success");

        let (status, body) = call(router, Method::GET, "/get-context", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["active_feature"], "auth-fix");
    }

    #[tokio::test]
    async fn context_routes_work_without_fallback() {
        let router = context_routes(state());
        let (status, body) = call(router.clone(), Method::GET, "/get-context", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["active_feature"], "-not-set");

        let (status, _) = call(router, Method::GET, "/v1/models", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn context_routes_accept_labels_over_default_body_limit() {
        let router = context_routes(state());
        let feature = "b".repeat(3 * 1024 * 1024);
        let body = serde_json::json!({ "feature": feature }).to_string();

        let (status, reply) = call(router.clone(), Method::POST, "/set-context", &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&reply)["status"], "success");

        let (_, reply) = call(router, Method::GET, "/get-context", "").await;
        assert_eq!(json(&reply)["active_feature"], feature.as_str());
    }

    #[tokio::test]
    async fn strict_policy_surfaces_bad_request() {
        let router = build_router(state().with_policy(ErrorStatusPolicy::Strict));
        let (status, body) = call(router, Method::POST, "/set-context", "nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["status"], "error");
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let router = build_router(state());
        let (status, _) = call(router, Method::GET, "/set-context", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_path_without_upstream_is_404_json() {
        let router = build_router(state());
        let (status, body) = call(router, Method::POST, "/v1/chat/completions", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["error"]["status"], 404);
    }

    struct RecordingClient(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl ProxyClient for RecordingClient {
        async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
            self.0.lock().unwrap().push(request.uri().to_string());
            Ok(ProxyResponse::new(
                axum::http::StatusCode::OK,
                request.body().clone(),
            ))
        }
    }

    #[tokio::test]
    async fn fallback_forwards_to_upstream_with_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = state();
        state.labels.write("checkout-bug").await.unwrap();
        let hooks = CompletionHooks::new();
        hooks
            .register(FeatureLabelHook::new(state.labels.clone()))
            .unwrap();
        let service = ProxyService::with_client(RecordingClient(Arc::clone(&seen)), hooks);
        let target = UpstreamTarget::parse("http://upstream.test").unwrap();
        let router = build_router(state.with_passthrough(service, target));

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/v1/chat/completions?x=1")
            .body(AxumBody::from(r#"{"model":"m"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .extensions()
                .get::<CallMetadata>()
                .and_then(CallMetadata::feature),
            Some("checkout-bug")
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), br#"{"model":"m"}"#);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["http://upstream.test/v1/chat/completions?x=1".to_string()]
        );
    }

    struct DownClient;

    #[async_trait]
    impl ProxyClient for DownClient {
        async fn send(&self, _request: ProxyRequest) -> Result<ProxyResponse, EdgeError> {
            Err(EdgeError::upstream("connection refused"))
        }
    }

    #[tokio::test]
    async fn upstream_failure_is_502_json() {
        let service = ProxyService::with_client(DownClient, CompletionHooks::new());
        let target = UpstreamTarget::parse("http://upstream.test").unwrap();
        let router = build_router(state().with_passthrough(service, target));

        let (status, body) = call(router, Method::GET, "/v1/models", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(json(&body)["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }
}
