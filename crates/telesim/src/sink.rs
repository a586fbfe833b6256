//! Local telemetry ingestion endpoint.
//!
//! Accepts WebSocket clients, decodes every text frame as JSON and files it
//! under its `device_id`. Frames that are not JSON are logged and dropped;
//! the connection stays open.

use crate::payload::DEVICE_ID_FIELD;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key used for frames that carry no string `device_id`.
pub const UNKNOWN_DEVICE: &str = "<unknown>";

#[derive(Debug, Default)]
struct Ledger {
    frames: DashMap<String, Vec<Value>>,
    connections: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
    closes: AtomicU64,
}

/// Read access to what a [`Sink`] has received so far.
#[derive(Debug, Clone, Default)]
pub struct SinkHandle {
    ledger: Arc<Ledger>,
}

impl SinkHandle {
    /// Connections whose WebSocket handshake completed.
    pub fn connections(&self) -> u64 {
        self.ledger.connections.load(Ordering::SeqCst)
    }

    /// JSON frames accepted.
    pub fn frames_received(&self) -> u64 {
        self.ledger.received.load(Ordering::SeqCst)
    }

    /// Text frames that failed to parse.
    pub fn frames_rejected(&self) -> u64 {
        self.ledger.rejected.load(Ordering::SeqCst)
    }

    /// Close frames received from clients.
    pub fn closes(&self) -> u64 {
        self.ledger.closes.load(Ordering::SeqCst)
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ledger.frames.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn frames_for(&self, device_id: &str) -> Vec<Value> {
        self.ledger
            .frames
            .get(device_id)
            .map(|frames| frames.value().clone())
            .unwrap_or_default()
    }

    fn record(&self, frame: Value) {
        let key = frame
            .get(DEVICE_ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_DEVICE)
            .to_string();
        self.ledger.frames.entry(key).or_default().push(frame);
        self.ledger.received.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Sink {
    listener: TcpListener,
    handle: SinkHandle,
}

impl Sink {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handle: SinkHandle::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// `ws://` URL clients can use to reach this sink.
    pub fn url(&self) -> io::Result<String> {
        Ok(format!("ws://{}", self.local_addr()?))
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Serves clients until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let addr = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        info!(listen_addr = %addr, "Ingestion sink online");

        loop {
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((socket, peer)) => {
                        let handle = self.handle.clone();
                        let token = shutdown.clone();
                        tokio::spawn(async move {
                            serve_client(socket, peer, handle, token).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.cancelled() => {
                    info!("Ingestion sink shutting down");
                    break;
                }
            }
        }
    }
}

async fn serve_client(
    socket: TcpStream,
    peer: SocketAddr,
    handle: SinkHandle,
    shutdown: CancellationToken,
) {
    let mut ws = match tokio_tungstenite::accept_async(socket).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(client = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    handle.ledger.connections.fetch_add(1, Ordering::SeqCst);
    info!(client = %peer, "New client connected");

    loop {
        let msg = tokio::select! {
            msg = ws.next() => msg,
            _ = shutdown.cancelled() => break,
        };

        match msg {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                Ok(frame) => {
                    info!(client = %peer, payload = %frame, "Received sensor data");
                    handle.record(frame);
                }
                Err(e) => {
                    handle.ledger.rejected.fetch_add(1, Ordering::SeqCst);
                    warn!(client = %peer, error = %e, "Error parsing sensor data");
                }
            },
            // Keep polling so the close reply gets flushed.
            Some(Ok(Message::Close(_))) => {
                handle.ledger.closes.fetch_add(1, Ordering::SeqCst);
                debug!(client = %peer, "Close frame received");
            }
            None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(client = %peer, error = %e, "Client stream error");
                break;
            }
        }
    }

    info!(client = %peer, "Client disconnected");
}
