//! Integration tests for the dev server.
//!
//! A mock backend built with axum stands in for the API process; requests
//! go through a real `DevServer` bound on an ephemeral port.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serial_test::serial;
use sluice_core::config::ProxyRule;
use sluice_core::dev::{DevError, DevServer, ProxyClient};
use sluice_core::{resolve_defaults, BuildMode, ResolvedConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use url::Url;

/// Echo the request back as JSON and count hits.
async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);

    if uri.path() == "/api/slow" {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    if uri.path() == "/api/cors" {
        return (
            StatusCode::NO_CONTENT,
            [
                ("access-control-allow-origin", "https://app.example"),
                ("access-control-allow-credentials", "true"),
                ("x-method", method.as_str()),
            ],
        )
            .into_response();
    }
    if uri.path() == "/api/created" {
        return (
            StatusCode::CREATED,
            [("x-backend", "yes"), ("location", "/api/items/7")],
            "created",
        )
            .into_response();
    }

    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let json = serde_json::json!({
        "method": method.as_str(),
        "uri": uri.to_string(),
        "body": String::from_utf8_lossy(&body),
        "host": get("host"),
        "custom": get("x-custom"),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        json.to_string(),
    )
        .into_response()
}

async fn start_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/*path", any(echo))
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn project(backend: SocketAddr, change_origin: bool) -> (TempDir, ResolvedConfig) {
    let dir = tempdir().unwrap();
    let mut config = resolve_defaults(BuildMode::Development, dir.path()).unwrap();
    let root = &config.build.root;
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join("client.ts"), "export const answer: number = 42;\n").unwrap();
    std::fs::write(root.join("tailwind.css"), ".a { color: red; }\n").unwrap();

    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.proxy = vec![ProxyRule {
        prefix: "/api".to_string(),
        target: Url::parse(&format!("http://{backend}")).unwrap(),
        change_origin,
    }];
    (dir, config)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_proxied_request_is_forwarded() {
    let (backend, hits) = start_backend().await;
    let (_dir, config) = project(backend, false);
    let server = DevServer::bind(&config).await.unwrap().spawn();

    let response = client()
        .post(format!("{}/api/items?page=2", server.url()))
        .header("x-custom", "abc")
        .body("payload bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/api/items?page=2");
    assert_eq!(echoed["body"], "payload bytes");
    assert_eq!(echoed["custom"], "abc");
    // Host is kept without change_origin.
    assert_eq!(echoed["host"], server.local_addr().to_string());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upstream_status_and_headers_are_relayed() {
    let (backend, _hits) = start_backend().await;
    let (_dir, config) = project(backend, true);
    let server = DevServer::bind(&config).await.unwrap().spawn();

    let response = client()
        .put(format!("{}/api/created", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-backend"], "yes");
    // Redirect-like headers are relayed, not followed.
    assert_eq!(response.headers()["location"], "/api/items/7");
    assert_eq!(response.text().await.unwrap(), "created");

    let echoed: serde_json::Value = client()
        .get(format!("{}/api/whoami", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["host"], backend.to_string());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_local_requests_are_never_forwarded() {
    let (backend, hits) = start_backend().await;
    let (_dir, config) = project(backend, false);
    let server = DevServer::bind(&config).await.unwrap().spawn();
    let http = client();

    let module = http
        .get(format!("{}/client.ts", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(module.status(), 200);
    assert!(module.headers()[header::CONTENT_TYPE.as_str()]
        .to_str()
        .unwrap()
        .starts_with("application/javascript"));
    let code = module.text().await.unwrap();
    assert!(code.contains("answer"));
    assert!(!code.contains(": number"));

    let style = http
        .get(format!("{}/@style/tailwind.css", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(style.status(), 200);

    let index = http.get(server.url()).send().await.unwrap();
    assert_eq!(index.status(), 200);
    assert!(index.text().await.unwrap().contains("/client.ts"));

    let missing = http
        .get(format!("{}/missing.ts", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let post = http
        .post(format!("{}/client.ts", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 405);

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Reserve a port, then free it so nothing listens there.
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = unused.local_addr().unwrap();
    drop(unused);

    let (_dir, config) = project(dead, false);
    let server = DevServer::bind(&config).await.unwrap().spawn();
    let http = client();

    let response = http
        .get(format!("{}/api/items", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert!(response.text().await.unwrap().starts_with("PROXY_CONNECT_ERROR"));

    // The server keeps serving after a failed proxy request.
    let module = http
        .get(format!("{}/client.ts", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(module.status(), 200);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upstream_timeout_is_gateway_timeout() {
    let (backend, hits) = start_backend().await;
    let (_dir, config) = project(backend, false);
    let proxy = ProxyClient::with_timeouts(Duration::from_secs(1), Duration::from_millis(300)).unwrap();
    let server = DevServer::bind(&config)
        .await
        .unwrap()
        .with_proxy_client(proxy)
        .spawn();

    let response = client()
        .get(format!("{}/api/slow", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
    // No retry.
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_strict_port_does_not_fall_back() {
    let (backend, _hits) = start_backend().await;
    let (_dir, mut config) = project(backend, false);

    let first = DevServer::bind(&config).await.unwrap();
    config.server.port = first.local_addr().port();
    config.server.strict_port = true;

    let err = DevServer::bind(&config).await.err().unwrap();
    assert!(matches!(err, DevError::PortUnavailable { .. }), "{err}");
    drop(first);
}

#[tokio::test]
#[serial]
async fn test_cors_headers() {
    let (backend, _hits) = start_backend().await;
    let (_dir, config) = project(backend, false);
    let server = DevServer::bind(&config).await.unwrap().spawn();

    let response = client()
        .get(format!("{}/client.ts", server.url()))
        .header("origin", "http://example.test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    server.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_upstream_cors_is_relayed_untouched() {
    let (backend, hits) = start_backend().await;
    let (_dir, config) = project(backend, false);
    let server = DevServer::bind(&config).await.unwrap().spawn();

    let response = client()
        .get(format!("{}/api/cors", server.url()))
        .header("origin", "http://example.test")
        .send()
        .await
        .unwrap();
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "https://app.example");
    assert_eq!(headers["access-control-allow-credentials"], "true");
    assert_eq!(headers["x-method"], "GET");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Preflight belongs to the backend too.
    let response = client()
        .request(reqwest::Method::OPTIONS, format!("{}/api/cors", server.url()))
        .header("origin", "http://example.test")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let headers = response.headers();
    assert_eq!(headers["x-method"], "OPTIONS");
    assert_eq!(headers["access-control-allow-origin"], "https://app.example");
    assert!(headers.get("access-control-allow-methods").is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Local files still get the permissive policy.
    let response = client()
        .get(format!("{}/client.ts", server.url()))
        .header("origin", "http://example.test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    server.shutdown().await.unwrap();
}
