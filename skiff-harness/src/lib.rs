//! In-process Runtime API server for testing runtime clients
//!
//! Queues invocations for a client to poll on `/invocation/next` and
//! records everything the client posts back, so tests can assert on the
//! exact wire traffic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

/// Deadline applied to queued invocations, relative to enqueue time
const DEFAULT_DEADLINE_MS: i64 = 3_000;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Timed out waiting for {0} record(s)")]
    Timeout(usize),
}

/// An invocation waiting to be polled
#[derive(Debug, Clone)]
struct QueuedInvocation {
    /// None makes the harness omit the request id header on delivery
    request_id: Option<String>,
    deadline_ms: i64,
    payload: Vec<u8>,
}

/// A successful response posted by the runtime
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub request_id: String,
    /// Request headers as delivered, names lowercased
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// An error report posted by the runtime
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub request_id: String,
    pub report: Value,
}

struct HarnessState {
    queue_rx: Mutex<mpsc::Receiver<QueuedInvocation>>,
    responses: RwLock<Vec<RecordedResponse>>,
    errors: RwLock<Vec<RecordedError>>,
    init_errors: RwLock<Vec<Value>>,
    poll_count: AtomicU64,
}

/// A running in-process Runtime API server
pub struct RuntimeApiHarness {
    addr: SocketAddr,
    queue_tx: mpsc::Sender<QueuedInvocation>,
    state: Arc<HarnessState>,
    server: tokio::task::JoinHandle<()>,
}

impl RuntimeApiHarness {
    /// Bind to an ephemeral local port and start serving
    pub async fn start() -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(64);
        let state = Arc::new(HarnessState {
            queue_rx: Mutex::new(queue_rx),
            responses: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
            init_errors: RwLock::new(Vec::new()),
            poll_count: AtomicU64::new(0),
        });

        let router = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next_invocation))
            .route(
                "/2018-06-01/runtime/invocation/:request_id/response",
                post(post_invocation_response),
            )
            .route(
                "/2018-06-01/runtime/invocation/:request_id/error",
                post(post_invocation_error),
            )
            .route("/2018-06-01/runtime/init/error", post(post_init_error))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind harness listener");
        let addr = listener.local_addr().expect("harness local addr");

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        debug!(addr = %addr, "Runtime API harness listening");

        Self {
            addr,
            queue_tx,
            state,
            server,
        }
    }

    /// Base URL including the API version path segment
    pub fn base_url(&self) -> String {
        format!("http://{}/2018-06-01/runtime", self.addr)
    }

    /// `host:port` value suitable for `AWS_LAMBDA_RUNTIME_API`
    pub fn api_addr(&self) -> String {
        self.addr.to_string()
    }

    /// Queue an invocation; returns its request id
    pub async fn enqueue_payload(&self, payload: Value) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.enqueue(QueuedInvocation {
            request_id: Some(request_id.clone()),
            deadline_ms: chrono::Utc::now().timestamp_millis() + DEFAULT_DEADLINE_MS,
            payload: payload.to_string().into_bytes(),
        })
        .await;
        request_id
    }

    /// Queue a raw payload that is delivered as-is, valid JSON or not
    pub async fn enqueue_raw(&self, payload: Vec<u8>) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.enqueue(QueuedInvocation {
            request_id: Some(request_id.clone()),
            deadline_ms: chrono::Utc::now().timestamp_millis() + DEFAULT_DEADLINE_MS,
            payload,
        })
        .await;
        request_id
    }

    /// Queue an invocation whose delivery omits the request id header
    pub async fn enqueue_missing_request_id(&self, payload: Value) {
        self.enqueue(QueuedInvocation {
            request_id: None,
            deadline_ms: chrono::Utc::now().timestamp_millis() + DEFAULT_DEADLINE_MS,
            payload: payload.to_string().into_bytes(),
        })
        .await;
    }

    async fn enqueue(&self, invocation: QueuedInvocation) {
        self.queue_tx
            .send(invocation)
            .await
            .expect("harness queue closed");
    }

    /// Responses recorded so far
    pub async fn responses(&self) -> Vec<RecordedResponse> {
        self.state.responses.read().await.clone()
    }

    /// Invocation errors recorded so far
    pub async fn errors(&self) -> Vec<RecordedError> {
        self.state.errors.read().await.clone()
    }

    /// Init errors recorded so far
    pub async fn init_errors(&self) -> Vec<Value> {
        self.state.init_errors.read().await.clone()
    }

    /// Number of polls served on `/invocation/next`
    pub fn poll_count(&self) -> u64 {
        self.state.poll_count.load(Ordering::SeqCst)
    }

    /// Wait until the runtime has posted `count` responses
    pub async fn wait_for_responses(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<RecordedResponse>, WaitError> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            let responses = self.responses().await;
            if responses.len() >= count {
                return Ok(responses);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(WaitError::Timeout(count))
    }

    /// Wait until the runtime has posted `count` invocation errors
    pub async fn wait_for_errors(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<RecordedError>, WaitError> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            let errors = self.errors().await;
            if errors.len() >= count {
                return Ok(errors);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(WaitError::Timeout(count))
    }
}

impl Drop for RuntimeApiHarness {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// GET /invocation/next
///
/// Blocks until an invocation is queued, then delivers it with the request
/// id and deadline headers.
async fn next_invocation(State(state): State<Arc<HarnessState>>) -> Response {
    state.poll_count.fetch_add(1, Ordering::SeqCst);

    let invocation = {
        let mut rx = state.queue_rx.lock().await;
        match rx.recv().await {
            Some(invocation) => invocation,
            None => {
                return Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from("Invocation queue closed"))
                    .unwrap();
            }
        }
    };

    debug!(request_id = ?invocation.request_id, "Delivering invocation");

    let mut builder = Response::builder().status(StatusCode::OK).header(
        "Lambda-Runtime-Deadline-Ms",
        invocation.deadline_ms.to_string(),
    );
    if let Some(request_id) = &invocation.request_id {
        builder = builder.header("Lambda-Runtime-Aws-Request-Id", request_id);
    }
    builder.body(Body::from(invocation.payload)).unwrap()
}

/// POST /invocation/{requestId}/response
async fn post_invocation_response(
    State(state): State<Arc<HarnessState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    debug!(request_id = %request_id, "Recording response");

    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();

    state.responses.write().await.push(RecordedResponse {
        request_id,
        headers,
        body,
    });
    StatusCode::ACCEPTED
}

/// POST /invocation/{requestId}/error
async fn post_invocation_error(
    State(state): State<Arc<HarnessState>>,
    Path(request_id): Path<String>,
    body: Bytes,
) -> StatusCode {
    debug!(request_id = %request_id, "Recording invocation error");

    let report = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .errors
        .write()
        .await
        .push(RecordedError { request_id, report });
    StatusCode::ACCEPTED
}

/// POST /init/error
async fn post_init_error(State(state): State<Arc<HarnessState>>, body: Bytes) -> StatusCode {
    debug!("Recording init error");

    let report = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.init_errors.write().await.push(report);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_delivers_queued_invocation() {
        let harness = RuntimeApiHarness::start().await;
        let request_id = harness.enqueue_payload(json!({"key": "value"})).await;

        let response = reqwest::get(format!("{}/invocation/next", harness.base_url()))
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get("lambda-runtime-aws-request-id")
                .unwrap(),
            &request_id
        );
        assert!(response.headers().contains_key("lambda-runtime-deadline-ms"));
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"key": "value"}));
        assert_eq!(harness.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_omits_request_id_when_asked() {
        let harness = RuntimeApiHarness::start().await;
        harness.enqueue_missing_request_id(json!({})).await;

        let response = reqwest::get(format!("{}/invocation/next", harness.base_url()))
            .await
            .unwrap();

        assert!(!response
            .headers()
            .contains_key("lambda-runtime-aws-request-id"));
    }

    #[tokio::test]
    async fn test_records_posted_response_and_error() {
        let harness = RuntimeApiHarness::start().await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/invocation/req-1/response", harness.base_url()))
            .header("content-type", "application/json")
            .body(r#"{"ok":true}"#)
            .send()
            .await
            .unwrap();
        client
            .post(format!("{}/invocation/req-2/error", harness.base_url()))
            .json(&json!({"errorType": "Error", "errorMessage": "boom"}))
            .send()
            .await
            .unwrap();

        let responses = harness
            .wait_for_responses(1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(responses[0].request_id, "req-1");
        assert_eq!(&responses[0].body[..], br#"{"ok":true}"#);

        let errors = harness
            .wait_for_errors(1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(errors[0].request_id, "req-2");
        assert_eq!(errors[0].report["errorMessage"], "boom");
    }

    #[tokio::test]
    async fn test_records_init_error() {
        let harness = RuntimeApiHarness::start().await;

        reqwest::Client::new()
            .post(format!("{}/init/error", harness.base_url()))
            .json(&json!({"errorType": "Runtime.HandlerNotFound"}))
            .send()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let init_errors = harness.init_errors().await;
        assert_eq!(init_errors.len(), 1);
        assert_eq!(init_errors[0]["errorType"], "Runtime.HandlerNotFound");
    }
}
