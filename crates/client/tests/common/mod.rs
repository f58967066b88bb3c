//! In-process mock of the processing service.
//!
//! Serves the REST endpoints and the push channel on `127.0.0.1:0`. Tests
//! script the mock through [`MockState`] and inspect what the client did
//! through its counters.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use engage_client::api::JobApi;
use engage_client::client::PushClient;
use engage_client::config::{ClientConfig, MonitorConfig};
use engage_client::events::EVENT_CHANNEL_CAPACITY;
use engage_client::monitor::JobMonitor;
use engage_core::retry::RetryPolicy;
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// One step of a scripted push connection.
#[derive(Debug, Clone)]
pub enum WsStep {
    /// Hold until the service has answered at least this many polls.
    WaitForPolls(u32),
    Send(String),
    Sleep(u64),
    /// Send a close frame with this code and drop the connection.
    Close(u16),
}

#[derive(Default)]
pub struct MockState {
    pub healthy: AtomicBool,
    /// The readiness check answers `ready` from this check number on.
    pub ready_after: AtomicU32,
    pub delete_status: AtomicU16,
    /// Answer push-channel upgrades with 500 instead of accepting them.
    pub refuse_ws: AtomicBool,

    pub jobs: Mutex<HashMap<String, Value>>,
    pub poll_delays_ms: Mutex<HashMap<String, u64>>,
    pub create_response: Mutex<Value>,
    pub ws_scripts: Mutex<VecDeque<Vec<WsStep>>>,
    pub default_ws_script: Mutex<Vec<WsStep>>,

    pub health_checks: AtomicU32,
    pub creates: AtomicU32,
    pub polls: Mutex<HashMap<String, u32>>,
    pub ready_checks: AtomicU32,
    pub deletes: AtomicU32,
    /// Upgrade requests received, accepted or not.
    pub ws_attempts: AtomicU32,
    pub ws_connections: AtomicU32,
    pub client_frames: Mutex<Vec<String>>,
    pub client_close_codes: Mutex<Vec<u16>>,
    pub uploads: Mutex<Vec<(String, usize)>>,
}

impl MockState {
    pub fn set_job(&self, job_id: &str, snapshot: Value) {
        self.jobs.lock().unwrap().insert(job_id.to_string(), snapshot);
    }

    pub fn polls(&self, job_id: &str) -> u32 {
        self.polls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }

    pub fn total_polls(&self) -> u32 {
        self.polls.lock().unwrap().values().sum()
    }

    pub fn client_frame_types(&self) -> Vec<String> {
        self.client_frames
            .lock()
            .unwrap()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter_map(|value| value["type"].as_str().map(str::to_string))
            .collect()
    }

    fn next_script(&self) -> Vec<WsStep> {
        self.ws_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_ws_script.lock().unwrap().clone())
    }
}

pub struct MockService {
    pub state: Arc<MockState>,
    pub addr: SocketAddr,
}

impl MockService {
    /// Start a healthy mock that is immediately ready for push channels.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        state.healthy.store(true, Ordering::SeqCst);
        state.delete_status.store(200, Ordering::SeqCst);

        let app = Router::new()
            .route("/api/health", get(health))
            .route("/api/jobs", post(create_job))
            .route("/api/jobs/{id}", get(get_job).delete(delete_job))
            .route("/api/jobs/{id}/ready", get(check_ready))
            .route("/api/jobs/{id}/download", get(download))
            .route("/api/jobs/{id}/logs", get(job_logs))
            .route("/api/files", get(list_files))
            .route("/api/upload", post(upload))
            .route("/api/result-files", get(list_result_files))
            .route("/api/result-files/{name}/results", get(result_page))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, addr }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration with millisecond-scale timing.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.url());
        config.request_timeout_secs = 5;
        config.monitor = fast_monitor_config();
        config
    }

    pub fn api(&self) -> JobApi {
        JobApi::new(self.url(), Duration::from_secs(5)).unwrap()
    }

    pub fn monitor(&self) -> JobMonitor {
        let config = self.config();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        JobMonitor::new(
            self.api(),
            PushClient::new(config.ws_url),
            config.monitor,
            event_tx,
            None,
        )
    }
}

pub fn fast_monitor_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(100),
        readiness: RetryPolicy {
            base_delay: Duration::from_millis(20),
            multiplier: 1.5,
            max_delay: Duration::from_millis(50),
            max_attempts: 10,
            delay_first_attempt: false,
        },
        reconnect: RetryPolicy {
            base_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_delay: Duration::from_millis(80),
            max_attempts: 3,
            delay_first_attempt: true,
        },
    }
}

/// Poll `cond` every 10 ms until it holds or `timeout_ms` elapses.
pub async fn wait_until<F>(timeout_ms: u64, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn status_frame(data: Value) -> String {
    json!({ "type": "status", "data": data }).to_string()
}

pub fn log_frame(message: &str) -> String {
    json!({ "type": "log", "data": { "timestamp": "10:00:00", "message": message } }).to_string()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type Shared = State<Arc<MockState>>;

async fn health(State(state): Shared) -> StatusCode {
    state.health_checks.fetch_add(1, Ordering::SeqCst);
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn create_job(State(state): Shared, Json(_body): Json<Value>) -> Json<Value> {
    state.creates.fetch_add(1, Ordering::SeqCst);
    Json(state.create_response.lock().unwrap().clone())
}

async fn get_job(State(state): Shared, Path(id): Path<String>) -> Response {
    let delay = state.poll_delays_ms.lock().unwrap().get(&id).copied();
    if let Some(ms) = delay {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let snapshot = state.jobs.lock().unwrap().get(&id).cloned();
    *state.polls.lock().unwrap().entry(id).or_default() += 1;

    match snapshot {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Job not found" }))).into_response(),
    }
}

async fn check_ready(State(state): Shared, Path(id): Path<String>) -> Json<Value> {
    let check = state.ready_checks.fetch_add(1, Ordering::SeqCst) + 1;
    let ready = check >= state.ready_after.load(Ordering::SeqCst);
    let status = state
        .jobs
        .lock()
        .unwrap()
        .get(&id)
        .and_then(|job| job["status"].as_str().map(str::to_string))
        .unwrap_or_else(|| "pending".to_string());
    Json(json!({ "ready": ready, "status": status }))
}

async fn delete_job(State(state): Shared, Path(id): Path<String>) -> Response {
    state.deletes.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.delete_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::OK);
    if status.is_success() {
        Json(json!({ "terminated": true, "message": format!("Job {id} terminated") })).into_response()
    } else {
        (status, "termination failed").into_response()
    }
}

async fn download(Path(id): Path<String>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}_results.csv\""),
            ),
        ],
        "brand,score\nacme,0.91\n",
    )
        .into_response()
}

async fn job_logs(
    ws: WebSocketUpgrade,
    Path(_id): Path<String>,
    State(state): Shared,
) -> Response {
    state.ws_attempts.fetch_add(1, Ordering::SeqCst);
    if state.refuse_ws.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "push channel unavailable").into_response();
    }
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(mut socket: WebSocket, state: Arc<MockState>) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);

    for step in state.next_script() {
        match step {
            WsStep::WaitForPolls(n) => {
                let state = Arc::clone(&state);
                wait_until(5_000, move || state.total_polls() >= n).await;
            }
            WsStep::Send(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            WsStep::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            WsStep::Close(code) => {
                let frame = CloseFrame {
                    code,
                    reason: Utf8Bytes::from_static(""),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
                return;
            }
        }
    }

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => state
                .client_frames
                .lock()
                .unwrap()
                .push(text.as_str().to_string()),
            Message::Close(frame) => {
                let code = frame.map_or(1005, |f| f.code);
                state.client_close_codes.lock().unwrap().push(code);
                break;
            }
            _ => {}
        }
    }
}

async fn list_files() -> Json<Value> {
    Json(json!({
        "files": [
            { "name": "posts.txt", "path": "dataset/posts.txt", "size": 2048, "modified": "2024-05-01T10:00:00" }
        ]
    }))
}

async fn upload(State(state): Shared, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default();
        state.uploads.lock().unwrap().push((filename.clone(), bytes.len()));
        return Json(json!({
            "filename": filename,
            "path": format!("dataset/{filename}"),
            "size": bytes.len(),
        }))
        .into_response();
    }
    (StatusCode::BAD_REQUEST, "missing file").into_response()
}

async fn list_result_files() -> Json<Value> {
    Json(json!({
        "files": [
            { "filename": "run_b.csv", "file_path": "results/run_b.csv", "size": 300, "modified_time": 1714557600.0 },
            { "filename": "run_a.csv", "file_path": "results/run_a.csv", "size": 200, "modified_time": 1714471200.0 }
        ]
    }))
}

async fn result_page(
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, u32>>,
) -> Response {
    if name != "run_a.csv" {
        return (StatusCode::NOT_FOUND, "Result file not found").into_response();
    }
    let page = params.get("page").copied().unwrap_or(1);
    let limit = params.get("limit").copied().unwrap_or(10);
    Json(json!({
        "results": [ { "brand": "acme", "score": 0.91 } ],
        "pagination": {
            "current_page": page,
            "total_pages": 3,
            "total_items": 25,
            "items_per_page": limit,
            "has_next": page < 3,
            "has_previous": page > 1,
        }
    }))
    .into_response()
}
