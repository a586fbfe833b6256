#![allow(dead_code)]

use std::time::Duration;
use telesim::{Sink, SinkHandle};
use telesim_common::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Starts an ingestion sink on an ephemeral port.
pub async fn start_sink() -> (String, SinkHandle, CancellationToken) {
    let sink = Sink::bind("127.0.0.1:0").await.unwrap();
    let url = sink.url().unwrap();
    let handle = sink.handle();
    let token = CancellationToken::new();
    tokio::spawn(sink.run(token.clone()));
    (url, handle, token)
}

/// A ws:// URL nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

pub fn fast_config(url: &str, devices: u32) -> Config {
    let mut config = Config::default();
    config.target.url = url.to_string();
    config.fleet.devices = devices;
    config.session.hold_ms = 100;
    config.session.connect_timeout_ms = 1_000;
    config.session.send_timeout_ms = 1_000;
    config.session.close_timeout_ms = 500;
    config
}

/// Waits until the sink has accepted `n` frames or two seconds pass.
pub async fn wait_for_frames(handle: &SinkHandle, n: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handle.frames_received() < n && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until the sink has seen `n` close frames or two seconds pass.
pub async fn wait_for_closes(handle: &SinkHandle, n: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handle.closes() < n && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
