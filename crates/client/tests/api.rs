//! Integration tests for the REST wrapper and the connectivity probe.

mod common;

use std::io::Write;
use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{wait_until, MockService};
use engage_client::api::ApiError;
use engage_client::events::{MonitorEvent, EVENT_CHANNEL_CAPACITY};
use engage_client::probe::ConnectivityProbe;
use engage_core::job::JobStatus;
use engage_core::request::JobRequest;
use serde_json::json;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Test: job endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_fetch_job() {
    let mock = MockService::start().await;
    *mock.state.create_response.lock().unwrap() =
        json!({ "job_id": "j1", "status": "pending", "message": "Job created successfully" });
    mock.state.set_job(
        "j1",
        json!({ "job_id": "j1", "status": "running", "progress": 12.5, "logs": ["a", "b"] }),
    );
    let api = mock.api();

    let created = api.create_job(&JobRequest::new("eco-friendly")).await.unwrap();
    assert_eq!(created.job_id, "j1");
    assert_eq!(created.status, JobStatus::Pending);

    let update = api.get_job("j1").await.unwrap();
    assert_eq!(update.status, Some(JobStatus::Running));
    assert_eq!(update.progress, Some(12.5));

    let readiness = api.check_ready("j1").await.unwrap();
    assert!(readiness.ready);
    assert_eq!(readiness.status, "running");

    let termination = api.delete_job("j1").await.unwrap();
    assert!(termination.terminated);
    assert_eq!(mock.state.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let mock = MockService::start().await;
    let err = mock.api().get_job("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn download_reports_filename() {
    let mock = MockService::start().await;
    let download = mock.api().download_result("j7").await.unwrap();
    assert_eq!(download.filename.as_deref(), Some("j7_results.csv"));
    assert_eq!(download.bytes, b"brand,score\nacme,0.91\n");
}

// ---------------------------------------------------------------------------
// Test: collaborator endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_files_and_results() {
    let mock = MockService::start().await;
    let api = mock.api();

    let files = api.list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "posts.txt");
    assert_eq!(files[0].size, 2048);

    let results = api.list_result_files().await.unwrap();
    let names: Vec<_> = results.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, ["run_b.csv", "run_a.csv"]);

    let page = api.result_page("run_a.csv", 2, 10).await.unwrap();
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0]["brand"], "acme");
    assert_eq!(page.pagination.current_page, 2);
    assert!(page.pagination.has_next);
    assert!(page.pagination.has_previous);

    assert_matches!(
        api.result_page("nope.csv", 1, 10).await,
        Err(ApiError::Status { status: 404, .. })
    );
}

#[tokio::test]
async fn upload_sends_multipart_file() {
    let mock = MockService::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "post one").unwrap();
    writeln!(file, "post two").unwrap();
    drop(file);

    let uploaded = mock.api().upload_file(&path).await.unwrap();

    assert_eq!(uploaded.filename, "posts.txt");
    assert_eq!(uploaded.path, "dataset/posts.txt");
    assert_eq!(uploaded.size, 18);
    assert_eq!(
        mock.state.uploads.lock().unwrap().as_slice(),
        [("posts.txt".to_string(), 18)]
    );
}

// ---------------------------------------------------------------------------
// Test: connectivity probe follows the health endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn probe_tracks_service_health() {
    let mock = MockService::start().await;
    let (event_tx, mut events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let probe = ConnectivityProbe::start(mock.api(), Duration::from_millis(50), event_tx);
    assert!(wait_until(1_000, || probe.is_connected()).await);

    mock.state.healthy.store(false, Ordering::SeqCst);
    assert!(wait_until(1_000, || !probe.is_connected()).await);

    probe.stop();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let checks = mock.state.health_checks.load(Ordering::SeqCst);

    mock.state.healthy.store(true, Ordering::SeqCst);
    assert!(probe.check_now().await);
    assert!(probe.is_connected());

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::ConnectivityChanged { connected } = event {
            transitions.push(connected);
        }
    }
    assert_eq!(transitions, [true, false, true]);

    // Only the explicit check ran after stop().
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.state.health_checks.load(Ordering::SeqCst), checks + 1);
}
