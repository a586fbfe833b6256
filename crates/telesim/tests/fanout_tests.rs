mod common;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use common::{fast_config, refused_url, start_sink, wait_for_closes, wait_for_frames};
use telesim::{Fanout, FanoutError, SensorRecord, SensorTemplate};
use telesim_common::FailureMode;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_three_devices_against_local_sink() {
    let (url, sink, stop) = start_sink().await;
    let mut config = fast_config(&url, 3);
    config.session.hold_ms = 300;
    let mut fields = BTreeMap::new();
    fields.insert("temperature".to_string(), 20);
    fields.insert("humidity".to_string(), 50);
    config.payload.fields = Some(fields);

    let summary = Fanout::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert_eq!(summary.devices, 3);
    assert_eq!(summary.succeeded, 3);
    assert!(summary.is_success());
    assert!(summary.elapsed >= Duration::from_millis(300));

    wait_for_frames(&sink, 3).await;
    assert_eq!(sink.connections(), 3);
    assert_eq!(sink.device_ids(), vec!["device_1", "device_2", "device_3"]);
    for id in sink.device_ids() {
        let frames = sink.frames_for(&id);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["temperature"], 20);
        assert_eq!(frames[0]["humidity"], 50);
    }

    wait_for_closes(&sink, 3).await;
    assert_eq!(sink.closes(), 3);
    stop.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_devices_keep_their_own_identity() {
    let (url, sink, stop) = start_sink().await;
    let config = fast_config(&url, 50);

    let summary = Fanout::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert_eq!(summary.succeeded, 50);
    wait_for_frames(&sink, 50).await;
    assert_eq!(sink.frames_received(), 50);

    let template = SensorTemplate::with_prefix("device_").unwrap();
    for n in 1..=50 {
        let id = format!("device_{}", n);
        let frames = sink.frames_for(&id);
        assert_eq!(frames.len(), 1, "{} sent {} frames", id, frames.len());

        let record: SensorRecord = serde_json::from_value(frames[0].clone()).unwrap();
        assert_eq!(record.device_id, id);
        assert_eq!(&record.readings, template.readings());
    }

    wait_for_closes(&sink, 50).await;
    assert_eq!(sink.closes(), 50);
    stop.cancel();
}

#[tokio::test]
async fn test_unbounded_run_does_not_scale_with_device_count() {
    let (url, _sink, stop) = start_sink().await;
    let mut config = fast_config(&url, 20);
    config.session.hold_ms = 250;

    let fanout = Fanout::new(&config).unwrap();
    assert_eq!(fanout.slots(), 20);
    let summary = fanout.run(CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 20);
    assert!(summary.elapsed >= Duration::from_millis(250));
    // Sequential execution would need 20 * 250ms.
    assert!(summary.elapsed < Duration::from_millis(2_500));
    assert!(summary.peak_sessions > 1);
    stop.cancel();
}

#[tokio::test]
async fn test_bounded_pool_queues_devices() {
    let (url, sink, stop) = start_sink().await;
    let mut config = fast_config(&url, 6);
    config.fleet.concurrency = 2;
    config.session.hold_ms = 200;

    let fanout = Fanout::new(&config).unwrap();
    assert_eq!(fanout.slots(), 2);
    let summary = fanout.run(CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 6);
    assert!(summary.peak_sessions <= 2);
    // Three waves of two devices each.
    assert!(summary.elapsed >= Duration::from_millis(600));

    wait_for_frames(&sink, 6).await;
    assert_eq!(sink.device_ids().len(), 6);
    stop.cancel();
}

#[tokio::test]
async fn test_peak_sessions_is_per_run() {
    let (url, _sink, stop) = start_sink().await;
    let fanout = Fanout::new(&fast_config(&url, 5)).unwrap();

    let first = fanout.run(CancellationToken::new()).await;
    assert_eq!(first.succeeded, 5);
    assert!(first.peak_sessions >= 1);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let second = fanout.run(cancelled).await;

    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(second.peak_sessions, 0);
    stop.cancel();
}

#[tokio::test]
async fn test_unreachable_endpoint_still_completes() {
    let url = refused_url().await;
    let config = fast_config(&url, 5);

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        Fanout::new(&config).unwrap().run(CancellationToken::new()),
    )
    .await
    .expect("run must not hang");

    assert_eq!(summary.devices, 5);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 5);
    assert_eq!(summary.failures.len(), 5);
    assert!(summary.failures.iter().all(|f| f.device.is_some()));
    assert!(!summary.is_success());
    assert!(!summary.exit_ok(true));
    assert!(summary.exit_ok(false));
    assert!(summary.to_string().starts_with("All 5 devices completed"));
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_devices() {
    let url = refused_url().await;
    let mut config = fast_config(&url, 10);
    config.fleet.concurrency = 1;
    config.policy.failure_mode = FailureMode::FailFast;

    let summary = Fanout::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 9);
    assert_eq!(summary.succeeded, 0);
}

#[tokio::test]
async fn test_best_effort_runs_every_device() {
    let url = refused_url().await;
    let mut config = fast_config(&url, 4);
    config.fleet.concurrency = 1;

    let summary = Fanout::new(&config)
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert_eq!(summary.failed, 4);
    assert_eq!(summary.skipped, 0);
}

#[tokio::test]
async fn test_external_cancellation_ends_run_promptly() {
    let (url, _sink, stop) = start_sink().await;
    let mut config = fast_config(&url, 4);
    config.fleet.concurrency = 2;
    config.session.hold_ms = 30_000;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let summary = Fanout::new(&config).unwrap().run(token).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    // The first two devices had sent before the hold was interrupted.
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 2);
    assert!(!summary.is_success());
    stop.cancel();
}

#[test]
fn test_rejects_zero_devices() {
    let mut config = fast_config("ws://localhost:3001", 1);
    config.fleet.devices = 0;
    assert!(matches!(Fanout::new(&config), Err(FanoutError::NoDevices)));
}

#[test]
fn test_rejects_bad_endpoints() {
    let config = fast_config("http://localhost:3001", 1);
    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::UnsupportedScheme(s)) if s == "http"
    ));

    let config = fast_config("wss://localhost:3001", 1);
    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::UnsupportedScheme(_))
    ));

    let config = fast_config("localhost:3001", 1);
    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::InvalidEndpoint { .. })
    ));

    let config = fast_config("not a url", 1);
    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::InvalidEndpoint { .. })
    ));
}

#[test]
fn test_rejects_template_with_identity_field() {
    let mut config = fast_config("ws://localhost:3001", 1);
    let mut fields = BTreeMap::new();
    fields.insert("device_id".to_string(), 1);
    config.payload.fields = Some(fields);

    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::Template(_))
    ));
}

#[test]
fn test_rejects_zero_timeouts() {
    let mut config = fast_config("ws://localhost:3001", 1);
    config.session.connect_timeout_ms = 0;
    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::ZeroTimeout("connect_timeout_ms"))
    ));

    let mut config = fast_config("ws://localhost:3001", 1);
    config.session.close_timeout_ms = 0;
    assert!(matches!(
        Fanout::new(&config),
        Err(FanoutError::ZeroTimeout("close_timeout_ms"))
    ));

    let mut config = fast_config("ws://localhost:3001", 1);
    config.session.hold_ms = 0;
    assert!(Fanout::new(&config).is_ok());
}
