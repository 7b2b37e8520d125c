//! The gate lets traffic through when the counter store is unavailable.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use turnstile::config::StoreConfig;
use turnstile::error::StoreError;
use turnstile::http::router;
use turnstile::ratelimit::{AdmissionGate, Outcome, RateLimitConfig, Reason};
use turnstile::store::{CounterStore, RedisStore};

/// A store whose every call is refused.
struct RefusingStore;

#[async_trait]
impl CounterStore for RefusingStore {
    async fn incr(&self, _key: &str) -> Result<u64, StoreError> {
        Err(StoreError::Connection(
            "redis.internal:6379 connection refused".to_string(),
        ))
    }

    async fn expire(&self, _key: &str, _seconds: u64) -> Result<bool, StoreError> {
        Err(StoreError::Connection(
            "redis.internal:6379 connection refused".to_string(),
        ))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Connection(
            "redis.internal:6379 connection refused".to_string(),
        ))
    }
}

/// Collects formatted log output.
#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl CaptureWriter {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn get(path: &str) -> Request {
    Request::builder()
        .uri(path)
        .extension(ConnectInfo(SocketAddr::from(([1, 2, 3, 4], 40000))))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_store_failure_allows_request_and_warns() {
    let logs = CaptureWriter::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let gate = AdmissionGate::new(Arc::new(RefusingStore), RateLimitConfig::new(1, 60)).unwrap();

    let decision = gate.admit("1.2.3.4", "/notes").await;
    assert!(decision.allow);
    assert_eq!(decision.reason, Reason::StoreUnavailable);

    let output = logs.contents();
    assert!(output.contains("WARN"), "expected a warning, got: {}", output);
    assert!(output.contains("Counter store unavailable"));
    assert!(output.contains("connection refused"));
}

#[tokio::test]
async fn test_failed_store_response_does_not_leak_details() {
    let gate = AdmissionGate::new(Arc::new(RefusingStore), RateLimitConfig::new(1, 60)).unwrap();
    let app = router(Arc::new(gate));

    for _ in 0..3 {
        let response = app.clone().oneshot(get("/test-limit")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!body.contains("redis.internal"));
    }
}

#[tokio::test]
async fn test_health_reports_degraded_when_store_down() {
    let gate = AdmissionGate::new(Arc::new(RefusingStore), RateLimitConfig::new(1, 60)).unwrap();
    let app = router(Arc::new(gate));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["store"], false);
}

#[tokio::test]
async fn test_unreachable_redis_fails_open() {
    let config = StoreConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..Default::default()
    };
    let store = Arc::new(RedisStore::open(&config).unwrap());
    let gate = Arc::new(
        AdmissionGate::new(store, RateLimitConfig::new(1, 60))
            .unwrap()
            .with_store_timeout(Duration::from_millis(500)),
    );
    let app = router(gate.clone());

    for _ in 0..3 {
        let response = app.clone().oneshot(get("/test-limit")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(gate.metrics().count(Outcome::FailOpen), 3);

    // Exempt paths answer without touching the store.
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(gate.metrics().count(Outcome::Exempt), 1);
}
