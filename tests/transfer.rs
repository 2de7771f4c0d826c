// tests/transfer.rs
//
// End-to-end transfers against a local mock HTTP server: submission,
// strategy selection, segmented fetch and merge, naming, and the
// queued-job lifecycle.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;

use qfetch::config::EngineConfig;
use qfetch::control::JobControl;
use qfetch::engine::TransferEngine;
use qfetch::fetch::DownloadError;
use qfetch::limiter::SpeedLimiter;
use qfetch::manager::{DownloadManager, ManagerError};
use qfetch::models::{ActiveWindow, JobStatus, QueueConfig};
use qfetch::split::split_ranges;
use qfetch::store::MemoryStore;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn test_queue(dir: &tempfile::TempDir) -> QueueConfig {
    QueueConfig {
        storage_folder: dir.path().to_path_buf(),
        ..QueueConfig::default()
    }
}

fn manager_with(
    queue: QueueConfig,
    config: EngineConfig,
) -> Arc<DownloadManager> {
    DownloadManager::with_queues(Arc::new(MemoryStore::new()), config, vec![queue])
        .expect("manager construction")
}

#[tokio::test]
async fn small_file_takes_the_single_stream_path() {
    let mut server = mockito::Server::new_async().await;
    let body = pattern(4_096);
    let _m = server
        .mock("GET", "/song.mp3")
        .with_header("accept-ranges", "bytes")
        .with_body(&body)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), EngineConfig::default());

    let job = manager
        .submit(&format!("{}/song.mp3", server.url()), "default", None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.content_length, 4_096);
    manager.wait(job.id).await.unwrap();

    let done = manager.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 4_096);
    assert_eq!(done.percent(), 100);

    let path = done.file_name.expect("resolved path");
    assert_eq!(path.file_name().unwrap(), "song.mp3");
    assert_eq!(tokio::fs::read(&path).await.unwrap(), body);
}

#[tokio::test]
async fn large_file_is_fetched_in_parts_and_merged() {
    let mut server = mockito::Server::new_async().await;
    let body = pattern(5_000);

    // The metadata probe carries no Range header.
    let _probe = server
        .mock("GET", "/blob.bin")
        .match_header("range", Matcher::Missing)
        .with_header("accept-ranges", "bytes")
        .with_body(&body)
        .create_async()
        .await;

    let config = EngineConfig {
        multipart_threshold: 1_000,
        chunk_size: 1_000,
        max_parts: 3,
        ..EngineConfig::default()
    };
    let ranges = split_ranges(body.len() as u64, config.chunk_size, config.max_parts);
    assert_eq!(ranges.len(), 3);
    let mut range_mocks = Vec::new();
    for range in &ranges {
        range_mocks.push(
            server
                .mock("GET", "/blob.bin")
                .match_header("range", range.header_value().as_str())
                .with_status(206)
                .with_body(&body[range.start as usize..=range.end as usize])
                .create_async()
                .await,
        );
    }

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), config);

    let job = manager
        .submit(&format!("{}/blob.bin", server.url()), "default", None)
        .await
        .unwrap();
    manager.wait(job.id).await.unwrap();

    for mock in &range_mocks {
        mock.assert_async().await;
    }
    let done = manager.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, body.len() as u64);

    let path = done.file_name.expect("resolved path");
    assert_eq!(tokio::fs::read(&path).await.unwrap(), body);
    // No temp part files survive the merge.
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name());
    }
    assert_eq!(names, vec![std::ffi::OsString::from("blob.bin")]);
}

#[tokio::test]
async fn missing_content_length_falls_back_to_single_stream() {
    let mut server = mockito::Server::new_async().await;
    let body = pattern(2_048);
    let _m = server
        .mock("GET", "/stream")
        .with_header("accept-ranges", "bytes")
        .with_chunked_body(move |w| w.write_all(&pattern(2_048)))
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    // Threshold of zero: anything with a known length would go multi-part,
    // so completing proves the unknown length forced one stream.
    let config = EngineConfig {
        multipart_threshold: 0,
        ..EngineConfig::default()
    };
    let manager = manager_with(test_queue(&dir), config);

    let job = manager
        .submit(&format!("{}/stream", server.url()), "default", None)
        .await
        .unwrap();
    assert_eq!(job.content_length, 0);
    manager.wait(job.id).await.unwrap();

    let done = manager.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 2_048);
    // Percentage stays at zero without a known total.
    assert_eq!(done.percent(), 0);
    assert_eq!(
        tokio::fs::read(done.file_name.unwrap()).await.unwrap(),
        body
    );
}

#[tokio::test]
async fn colliding_names_get_a_numbered_suffix() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/data.bin")
        .with_body(b"fresh")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("data.bin"), b"already here")
        .await
        .unwrap();

    let manager = manager_with(test_queue(&dir), EngineConfig::default());
    let job = manager
        .submit(&format!("{}/data.bin", server.url()), "default", None)
        .await
        .unwrap();
    manager.wait(job.id).await.unwrap();

    let done = manager.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    let path = done.file_name.unwrap();
    assert_eq!(path.file_name().unwrap(), "data(1).bin");
    assert_eq!(tokio::fs::read(&path).await.unwrap(), b"fresh");
    // The pre-existing file is untouched.
    assert_eq!(
        tokio::fs::read(dir.path().join("data.bin")).await.unwrap(),
        b"already here"
    );
}

#[tokio::test]
async fn failed_probe_records_a_failed_job() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/gone")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), EngineConfig::default());

    let job = manager
        .submit(&format!("{}/gone", server.url()), "default", None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    assert!(job.id > 0);

    // No runner was spawned; waiting is a no-op and the status sticks.
    manager.wait(job.id).await.unwrap();
    assert_eq!(
        manager.job(job.id).await.unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn submitting_to_an_unknown_queue_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), EngineConfig::default());
    let err = manager
        .submit("http://localhost:9/x", "nightly", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownQueue(name) if name == "nightly"));
}

#[tokio::test]
async fn job_queued_outside_the_window_can_be_canceled() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/later.bin")
        .with_body(b"payload")
        .create_async()
        .await;

    // A window nowhere near the current time keeps the job queued.
    let now = chrono::Local::now().time();
    let window = ActiveWindow {
        start: now + chrono::Duration::hours(6),
        end: now + chrono::Duration::hours(7),
    };
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueConfig {
        active_window: Some(window),
        ..test_queue(&dir)
    };
    let manager = manager_with(queue, EngineConfig::default());

    let job = manager
        .submit(&format!("{}/later.bin", server.url()), "default", None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    manager.cancel(job.id).await.unwrap();
    manager.wait(job.id).await.unwrap();

    let done = manager.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Canceled);
    // Nothing was ever written for it.
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn canceled_transfer_leaves_no_output_file() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/big.bin")
        .with_header("accept-ranges", "bytes")
        .with_body(pattern(4_096))
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let engine = TransferEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default())
        .expect("engine construction");
    let job = engine
        .create_job(&format!("{}/big.bin", server.url()), &test_queue(&dir), None)
        .await
        .unwrap();
    let record = Arc::new(tokio::sync::Mutex::new(job));

    let ctl = JobControl::new();
    ctl.cancel();
    let err = engine
        .execute(&record, &ctl, &SpeedLimiter::new(0))
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Canceled));

    // The reserved output file was removed on the way out.
    let path = record.lock().await.file_name.clone().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn cancel_mid_transfer_stops_every_fetch_and_removes_output() {
    let mut server = mockito::Server::new_async().await;
    let body = pattern(5_000);
    let _probe = server
        .mock("GET", "/big.bin")
        .match_header("range", Matcher::Missing)
        .with_header("accept-ranges", "bytes")
        .with_body(&body)
        .create_async()
        .await;

    let config = EngineConfig {
        multipart_threshold: 1_000,
        chunk_size: 1_000,
        max_parts: 3,
        ..EngineConfig::default()
    };
    let ranges = split_ranges(body.len() as u64, config.chunk_size, config.max_parts);
    let mut range_mocks = Vec::new();
    for range in &ranges {
        range_mocks.push(
            server
                .mock("GET", "/big.bin")
                .match_header("range", range.header_value().as_str())
                .with_status(206)
                .with_body(&body[range.start as usize..=range.end as usize])
                .create_async()
                .await,
        );
    }

    let dir = tempfile::tempdir().unwrap();
    let engine = TransferEngine::new(Arc::new(MemoryStore::new()), config)
        .expect("engine construction");
    let job = engine
        .create_job(&format!("{}/big.bin", server.url()), &test_queue(&dir), None)
        .await
        .unwrap();
    let record = Arc::new(tokio::sync::Mutex::new(job));
    let ctl = JobControl::new();
    // A tight bucket: the first chunk passes on the initial burst, the
    // remaining fetches sit in the limiter until tokens refill.
    let limiter = SpeedLimiter::new(10);

    let runner = {
        let record = Arc::clone(&record);
        let ctl = ctl.clone();
        tokio::spawn(async move { engine.execute(&record, &ctl, &limiter).await })
    };

    // Wait until bytes have actually landed, so the remaining fetches are
    // genuinely in flight when the token fires.
    let mut polls = 0;
    while ctl.progress().written() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        polls += 1;
        assert!(polls < 1_000, "transfer never started streaming");
    }
    ctl.cancel();

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(DownloadError::Canceled)));
    // Neither the final file nor any temp part survives.
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_chunk_fails_the_job_and_cleans_up() {
    let mut server = mockito::Server::new_async().await;
    let body = pattern(5_000);
    let _probe = server
        .mock("GET", "/flaky.bin")
        .match_header("range", Matcher::Missing)
        .with_header("accept-ranges", "bytes")
        .with_body(&body)
        .create_async()
        .await;

    let config = EngineConfig {
        multipart_threshold: 1_000,
        chunk_size: 1_000,
        max_parts: 3,
        ..EngineConfig::default()
    };
    let ranges = split_ranges(body.len() as u64, config.chunk_size, config.max_parts);
    // Two ranges succeed, the last always errors.
    let mut mocks = Vec::new();
    for range in &ranges[..ranges.len() - 1] {
        mocks.push(
            server
                .mock("GET", "/flaky.bin")
                .match_header("range", range.header_value().as_str())
                .with_status(206)
                .with_body(&body[range.start as usize..=range.end as usize])
                .create_async()
                .await,
        );
    }
    let last = ranges.last().unwrap();
    let _broken = server
        .mock("GET", "/flaky.bin")
        .match_header("range", last.header_value().as_str())
        .with_status(500)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), config);
    let job = manager
        .submit(&format!("{}/flaky.bin", server.url()), "default", None)
        .await
        .unwrap();
    manager.wait(job.id).await.unwrap();

    let done = manager.job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error.is_some());
    // The reserved output file and every temp part are gone.
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn history_keeps_terminal_jobs() {
    let mut server = mockito::Server::new_async().await;
    let _ok = server
        .mock("GET", "/a.bin")
        .with_body(b"aaaa")
        .create_async()
        .await;
    let _gone = server
        .mock("GET", "/b.bin")
        .with_status(500)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), EngineConfig::default());

    let a = manager
        .submit(&format!("{}/a.bin", server.url()), "default", None)
        .await
        .unwrap();
    manager.wait(a.id).await.unwrap();
    let b = manager
        .submit(&format!("{}/b.bin", server.url()), "default", None)
        .await
        .unwrap();

    let history = manager.history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, a.id);
    assert_eq!(history[0].status, JobStatus::Completed);
    assert_eq!(history[1].id, b.id);
    assert_eq!(history[1].status, JobStatus::Failed);
}

#[tokio::test]
async fn explicit_file_name_overrides_resolution() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/ignored-name")
        .with_body(b"named")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let manager = manager_with(test_queue(&dir), EngineConfig::default());
    let job = manager
        .submit(
            &format!("{}/ignored-name", server.url()),
            "default",
            Some("chosen.dat".to_string()),
        )
        .await
        .unwrap();
    manager.wait(job.id).await.unwrap();

    let done = manager.job(job.id).await.unwrap();
    let path: PathBuf = done.file_name.unwrap();
    assert_eq!(path, dir.path().join("chosen.dat"));
    assert_eq!(tokio::fs::read(&path).await.unwrap(), b"named");
}

#[tokio::test]
async fn removing_a_queue_with_live_jobs_is_refused() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/slow.bin")
        .with_body(b"bytes")
        .create_async()
        .await;

    let now = chrono::Local::now().time();
    let window = ActiveWindow {
        start: now + chrono::Duration::hours(6),
        end: now + chrono::Duration::hours(7),
    };
    let dir = tempfile::tempdir().unwrap();
    let queue = QueueConfig {
        name: "night".to_string(),
        active_window: Some(window),
        ..test_queue(&dir)
    };
    let manager = manager_with(queue, EngineConfig::default());

    let job = manager
        .submit(&format!("{}/slow.bin", server.url()), "night", None)
        .await
        .unwrap();
    assert!(matches!(
        manager.remove_queue("night").await,
        Err(ManagerError::QueueBusy(_))
    ));

    manager.cancel(job.id).await.unwrap();
    manager.wait(job.id).await.unwrap();
    manager.remove_queue("night").await.unwrap();
    assert!(manager.queue("night").await.is_none());
}
