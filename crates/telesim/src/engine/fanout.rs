use crate::engine::session::{
    run_session, SessionContext, SessionError, SessionGauge, SessionOutcome, SessionSettings,
};
use crate::payload::{DeviceId, SensorTemplate, TemplateError};
use crate::report::RunSummary;
use std::sync::Arc;
use std::time::Instant;
use telesim_common::{Config, FailureMode, SessionConfig};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SessionResult = (DeviceId, Result<SessionOutcome, SessionError>);

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("device count must be at least 1")]
    NoDevices,

    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("unsupported endpoint scheme `{0}` (expected ws)")]
    UnsupportedScheme(String),

    #[error("invalid payload template: {0}")]
    Template(#[from] TemplateError),

    #[error("session.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Launches one session per device and joins them all.
#[derive(Debug)]
pub struct Fanout {
    devices: u32,
    concurrency: usize,
    failure_mode: FailureMode,
    context: Arc<SessionContext>,
}

impl Fanout {
    pub fn new(config: &Config) -> Result<Self, FanoutError> {
        let template = match &config.payload.fields {
            Some(fields) => {
                SensorTemplate::new(config.payload.device_prefix.clone(), fields.clone())?
            }
            None => SensorTemplate::with_prefix(config.payload.device_prefix.clone())?,
        };
        Self::with_template(config, template)
    }

    pub fn with_template(config: &Config, template: SensorTemplate) -> Result<Self, FanoutError> {
        if config.fleet.devices == 0 {
            return Err(FanoutError::NoDevices);
        }
        validate_endpoint(&config.target.url)?;
        validate_timeouts(&config.session)?;

        let settings = SessionSettings::from(&config.session);
        Ok(Self {
            devices: config.fleet.devices,
            concurrency: config.fleet.concurrency,
            failure_mode: config.policy.failure_mode,
            context: Arc::new(SessionContext::new(
                config.target.url.clone(),
                template,
                settings,
            )),
        })
    }

    pub fn devices(&self) -> u32 {
        self.devices
    }

    /// Simultaneous session slots. Zero in the config means one per device.
    pub fn slots(&self) -> usize {
        let devices = self.devices as usize;
        match self.concurrency {
            0 => devices,
            n => n.min(devices),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.context.endpoint
    }

    /// Runs every device and waits for all of them.
    ///
    /// Cancelling `shutdown` aborts sessions at their next suspension point
    /// and stops new ones from starting; the summary is still produced.
    pub async fn run(&self, shutdown: CancellationToken) -> RunSummary {
        let run_token = shutdown.child_token();
        let slots = self.slots();
        let mut summary = RunSummary::new(self.devices);
        let mut in_flight = JoinSet::new();
        let gauge = Arc::new(SessionGauge::default());

        info!(
            devices = self.devices,
            slots = slots,
            endpoint = %self.context.endpoint,
            mode = ?self.failure_mode,
            "Starting fanout"
        );

        let started = Instant::now();
        for n in 1..=self.devices {
            while in_flight.len() >= slots {
                match in_flight.join_next().await {
                    Some(res) => self.collect(res, &mut summary, &run_token),
                    None => break,
                }
            }

            if run_token.is_cancelled() {
                summary.skipped = self.devices - n + 1;
                debug!(skipped = summary.skipped, "Run cancelled before all devices started");
                break;
            }

            let device = DeviceId::new(n);
            let ctx = Arc::clone(&self.context);
            let gauge = Arc::clone(&gauge);
            let token = run_token.clone();
            in_flight.spawn(async move {
                let result = run_session(device, &ctx, &gauge, &token).await;
                (device, result)
            });
        }

        while let Some(res) = in_flight.join_next().await {
            self.collect(res, &mut summary, &run_token);
        }

        summary.elapsed = started.elapsed();
        summary.peak_sessions = gauge.peak();

        info!(
            devices = summary.devices,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Fanout complete"
        );
        summary
    }

    fn collect(
        &self,
        res: Result<SessionResult, JoinError>,
        summary: &mut RunSummary,
        run_token: &CancellationToken,
    ) {
        let failed = match res {
            Ok((device, result)) => {
                summary.record(device, &result);
                matches!(&result, Err(e) if !e.is_cancelled())
            }
            Err(e) => {
                warn!(error = %e, "Session task died");
                summary.record_lost_worker(format!("session task died: {}", e));
                true
            }
        };

        if failed && self.failure_mode == FailureMode::FailFast && !run_token.is_cancelled() {
            warn!("Failing fast: cancelling remaining sessions");
            run_token.cancel();
        }
    }
}

// Hold may be zero; timeouts may not.
fn validate_timeouts(session: &SessionConfig) -> Result<(), FanoutError> {
    let timeouts = [
        ("connect_timeout_ms", session.connect_timeout_ms),
        ("send_timeout_ms", session.send_timeout_ms),
        ("close_timeout_ms", session.close_timeout_ms),
    ];
    match timeouts.iter().find(|(_, ms)| *ms == 0) {
        Some((name, _)) => Err(FanoutError::ZeroTimeout(*name)),
        None => Ok(()),
    }
}

fn validate_endpoint(url: &str) -> Result<(), FanoutError> {
    let uri = url.parse::<Uri>().map_err(|e| FanoutError::InvalidEndpoint {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match uri.scheme_str() {
        Some("ws") => {}
        Some(other) => return Err(FanoutError::UnsupportedScheme(other.to_string())),
        None => {
            return Err(FanoutError::InvalidEndpoint {
                url: url.to_string(),
                reason: "missing scheme".to_string(),
            })
        }
    }

    if uri.host().map_or(true, str::is_empty) {
        return Err(FanoutError::InvalidEndpoint {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}
