use crate::payload::{DeviceId, SensorTemplate};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use telesim_common::SessionConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type DeviceStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

/// Timing knobs for a single device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub hold: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub close_timeout: Duration,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            hold: cfg.hold(),
            connect_timeout: cfg.connect_timeout(),
            send_timeout: cfg.send_timeout(),
            close_timeout: cfg.close_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Live and peak counts of open device connections.
///
/// Create one per run; peaks from earlier runs must not leak into a new
/// summary.
#[derive(Debug, Default)]
pub struct SessionGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SessionGauge {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> SessionGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        SessionGuard { gauge: self }
    }
}

struct SessionGuard<'a> {
    gauge: &'a SessionGauge,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Read-only state shared by every session of a run.
#[derive(Debug)]
pub struct SessionContext {
    pub endpoint: String,
    pub template: SensorTemplate,
    pub settings: SessionSettings,
}

impl SessionContext {
    pub fn new(
        endpoint: impl Into<String>,
        template: SensorTemplate,
        settings: SessionSettings,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            template,
            settings,
        }
    }
}

/// What a device did during a successful session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub device: DeviceId,
    pub bytes_sent: usize,
    pub connect_time: Duration,
    pub held_for: Duration,
    /// The hold was cut short by cancellation after the frame went out.
    pub hold_interrupted: bool,
}

/// Runs one device: connect, send its record once, hold, then close.
///
/// Failures are logged here with the device identity and returned to the
/// caller; nothing is retried. The connection counts towards `gauge` while
/// it is open.
pub async fn run_session(
    device: DeviceId,
    ctx: &SessionContext,
    gauge: &SessionGauge,
    shutdown: &CancellationToken,
) -> Result<SessionOutcome, SessionError> {
    let result = session(device, ctx, gauge, shutdown).await;
    match &result {
        Err(e) if e.is_cancelled() => debug!(device = %device, "Session cancelled"),
        Err(e) => {
            warn!(device = %device, endpoint = %ctx.endpoint, error = %e, "Session failed")
        }
        Ok(_) => {}
    }
    result
}

async fn session(
    device: DeviceId,
    ctx: &SessionContext,
    gauge: &SessionGauge,
    shutdown: &CancellationToken,
) -> Result<SessionOutcome, SessionError> {
    let started = Instant::now();
    let mut ws = connect_device(device, ctx, shutdown).await?;
    let connect_time = started.elapsed();
    let _guard = gauge.enter();

    info!(device = %device, endpoint = %ctx.endpoint, "Connected");

    let result = transmit_and_hold(device, &mut ws, ctx, shutdown).await;

    // Close on every path that opened a connection, success or not.
    close_device(device, &mut ws, ctx.settings.close_timeout).await;

    let (bytes_sent, held_for, hold_interrupted) = result?;
    Ok(SessionOutcome {
        device,
        bytes_sent,
        connect_time,
        held_for,
        hold_interrupted,
    })
}

async fn connect_device(
    device: DeviceId,
    ctx: &SessionContext,
    shutdown: &CancellationToken,
) -> Result<DeviceStream, SessionError> {
    let connect_timeout = ctx.settings.connect_timeout;
    debug!(device = %device, endpoint = %ctx.endpoint, "Attempting connect");

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(SessionError::Cancelled),
        res = timeout(connect_timeout, connect_async(ctx.endpoint.as_str())) => match res {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(SessionError::Connect(e)),
            Err(_) => Err(SessionError::ConnectTimeout(connect_timeout)),
        },
    }
}

async fn transmit_and_hold(
    device: DeviceId,
    ws: &mut DeviceStream,
    ctx: &SessionContext,
    shutdown: &CancellationToken,
) -> Result<(usize, Duration, bool), SessionError> {
    let record = ctx.template.build(device);
    let frame = record.to_json()?;
    let bytes_sent = frame.len();
    let send_timeout = ctx.settings.send_timeout;

    info!(device = %device, bytes = bytes_sent, payload = %frame, "Sending sensor record");

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Err(SessionError::Cancelled),
        res = timeout(send_timeout, ws.send(Message::Text(frame))) => match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::Send(e)),
            Err(_) => return Err(SessionError::SendTimeout(send_timeout)),
        },
    }

    debug!(device = %device, "Sensor record flushed");

    let hold_started = Instant::now();
    let interrupted = tokio::select! {
        _ = sleep(ctx.settings.hold) => false,
        _ = shutdown.cancelled() => {
            debug!(device = %device, "Hold interrupted by cancellation");
            true
        }
    };

    Ok((bytes_sent, hold_started.elapsed(), interrupted))
}

async fn close_device(device: DeviceId, ws: &mut DeviceStream, close_timeout: Duration) {
    match timeout(close_timeout, ws.close(None)).await {
        Ok(Ok(())) => debug!(device = %device, "Connection closed"),
        Ok(Err(e)) => debug!(device = %device, error = %e, "Close handshake failed"),
        Err(_) => warn!(device = %device, "Timed out sending close frame"),
    }
}
