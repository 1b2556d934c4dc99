use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::routing::post;
use axum::Router;
use labelgate_adapter_axum::{
    build_router, FileLabelStore, LabelGateServer, LabelGateState, Overrides,
};
use labelgate_core::endpoints::ErrorStatusPolicy;
use labelgate_core::label::LabelHandle;
use labelgate_core::manifest::ManifestLoader;
use serde_json::{json, Value};
use tower::ServiceExt;

fn file_state(dir: &tempfile::TempDir) -> LabelGateState {
    let store = FileLabelStore::new(dir.path().join("current_feature.txt"));
    LabelGateState::new(LabelHandle::with_store(store))
}

async fn send(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).expect("json response"))
}

#[tokio::test]
async fn fresh_store_reports_not_set() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir));

    let (status, body) = send(&router, Method::GET, "/get-context", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"active_feature": "-not-set"}));
}

#[tokio::test]
async fn set_context_then_get_context() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir));

    let (status, body) = send(
        &router,
        Method::POST,
        "/set-context",
        r#"{"feature": "auth-fix"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["message"].as_str().unwrap().contains("auth-fix"));

    let (_, body) = send(&router, Method::GET, "/get-context", "").await;
    assert_eq!(body, json!({"active_feature": "auth-fix"}));

    let on_disk = std::fs::read_to_string(dir.path().join("current_feature.txt")).unwrap();
    assert_eq!(on_disk, "auth-fix");
}

#[tokio::test]
async fn empty_object_sets_default_feature() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir));

    let (_, body) = send(&router, Method::POST, "/set-context", "{}").await;
    assert_eq!(body["status"], "success");

    let (_, body) = send(&router, Method::GET, "/get-context", "").await;
    assert_eq!(body["active_feature"], "default");
}

#[tokio::test]
async fn non_json_body_is_error_with_200() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir));

    let (status, body) = send(&router, Method::POST, "/set-context", "feature=auth").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(!body["message"].as_str().unwrap().is_empty());

    let (_, body) = send(&router, Method::GET, "/get-context", "").await;
    assert_eq!(body["active_feature"], "-not-set");
}

#[tokio::test]
async fn strict_policy_returns_400_for_malformed_body() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir).with_policy(ErrorStatusPolicy::Strict));

    let (status, body) = send(&router, Method::POST, "/set-context", r#"{"feature": 7}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn large_feature_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir));
    let feature = "a".repeat(3 * 1024 * 1024);

    let body = json!({ "feature": feature }).to_string();
    let (status, reply) = send(&router, Method::POST, "/set-context", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "success");

    let (_, reply) = send(&router, Method::GET, "/get-context", "").await;
    assert_eq!(reply["active_feature"].as_str().unwrap().len(), feature.len());
}

#[tokio::test]
async fn label_written_by_editor_is_served_trimmed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("current_feature.txt"), "  billing-v2 \n").unwrap();
    let router = build_router(file_state(&dir));

    let (_, body) = send(&router, Method::GET, "/get-context", "").await;
    assert_eq!(body["active_feature"], "billing-v2");
}

#[tokio::test]
async fn concurrent_writers_leave_one_of_their_labels() {
    let dir = tempfile::tempdir().unwrap();
    let router = build_router(file_state(&dir));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            let body = format!(r#"{{"feature": "writer-{i}"}}"#);
            send(&router, Method::POST, "/set-context", &body).await
        }));
    }
    for task in tasks {
        let (status, _) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&router, Method::GET, "/get-context", "").await;
    let active = body["active_feature"].as_str().unwrap().to_string();
    assert!(
        active.is_empty() || active.starts_with("writer-"),
        "unexpected label {active:?}"
    );
}

// -- End to end through a real upstream --------------------------------------

async fn start_upstream(seen: Arc<Mutex<Vec<Bytes>>>) -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |body: Bytes| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(body);
                (
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    r#"{"choices":[]}"#,
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn send_with_retry<F>(client: &reqwest::Client, mut make_request: F) -> reqwest::Response
where
    F: FnMut(&reqwest::Client) -> reqwest::RequestBuilder,
{
    let start = Instant::now();
    loop {
        match make_request(client).send().await {
            Ok(response) => return response,
            Err(err) => {
                if start.elapsed() >= Duration::from_secs(2) {
                    panic!("gateway did not respond before timeout: {}", err);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn gateway_forwards_calls_to_upstream() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let upstream = start_upstream(Arc::clone(&seen)).await;
    let dir = tempfile::tempdir().unwrap();

    let loader = ManifestLoader::load_from_str("[upstream]\ntimeout_secs = 5\n").unwrap();
    let overrides = Overrides {
        upstream: Some(upstream),
        state_file: Some(dir.path().join("feature.txt")),
        ..Overrides::default()
    };
    let server = LabelGateServer::from_manifest(loader.manifest(), &overrides)
        .unwrap()
        .with_ctrl_c(false);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let _ = server.run_with_listener(listener).await;
    });

    let client = reqwest::Client::new();
    let set_url = format!("{base_url}/set-context");
    let response = send_with_retry(&client, |client| {
        client
            .post(set_url.as_str())
            .body(r#"{"feature":"checkout-bug"}"#)
    })
    .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let chat_url = format!("{base_url}/v1/chat/completions");
    let payload = r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
    let response = send_with_retry(&client, |client| {
        client.post(chat_url.as_str()).body(payload)
    })
    .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), r#"{"choices":[]}"#);

    // The upstream sees the caller's body untouched.
    assert_eq!(*seen.lock().unwrap(), vec![Bytes::from(payload)]);

    let missing_url = format!("{base_url}/v1/unknown");
    let response = send_with_retry(&client, |client| client.post(missing_url.as_str())).await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}
