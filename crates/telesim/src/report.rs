//! End-of-run accounting.

use crate::engine::session::{SessionError, SessionOutcome};
use crate::payload::DeviceId;
use std::fmt;
use std::time::Duration;

/// A device that did not complete its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    /// `None` when the worker task itself died and its identity was lost.
    pub device: Option<DeviceId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub devices: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
    /// Devices never started because the run was cancelled first.
    pub skipped: u32,
    pub peak_sessions: usize,
    pub bytes_sent: u64,
    pub elapsed: Duration,
    pub failures: Vec<DeviceFailure>,
}

impl RunSummary {
    pub(crate) fn new(devices: u32) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    pub(crate) fn record(
        &mut self,
        device: DeviceId,
        result: &Result<SessionOutcome, SessionError>,
    ) {
        match result {
            Ok(outcome) => {
                self.succeeded += 1;
                self.bytes_sent += outcome.bytes_sent as u64;
            }
            Err(e) if e.is_cancelled() => self.cancelled += 1,
            Err(e) => {
                self.failed += 1;
                self.failures.push(DeviceFailure {
                    device: Some(device),
                    error: e.to_string(),
                });
            }
        }
    }

    pub(crate) fn record_lost_worker(&mut self, error: String) {
        self.failed += 1;
        self.failures.push(DeviceFailure {
            device: None,
            error,
        });
    }

    /// Every device connected, sent its record and held.
    pub fn is_success(&self) -> bool {
        self.succeeded == self.devices
    }

    /// Whether the process should exit cleanly. Lenient runs always do.
    pub fn exit_ok(&self, strict: bool) -> bool {
        !strict || self.is_success()
    }

    pub fn print_summary(&self) {
        println!("{}", self);
        println!(
            "   Succeeded: {} | Failed: {} | Cancelled: {} | Skipped: {}",
            self.succeeded, self.failed, self.cancelled, self.skipped
        );
        println!(
            "   Peak sessions: {} | Bytes sent: {}",
            self.peak_sessions, self.bytes_sent
        );
        for failure in &self.failures {
            match failure.device {
                Some(device) => println!("   Device {}: {}", device, failure.error),
                None => println!("   Worker lost: {}", failure.error),
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "All {} devices completed sending data points in {:.2} seconds",
            self.devices,
            self.elapsed.as_secs_f64()
        )
    }
}
