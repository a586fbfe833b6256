//! Simulated IoT device fleet for load-testing telemetry ingestion.
//!
//! Each device opens a WebSocket connection, sends one JSON sensor record,
//! lingers for a configurable hold and disconnects. [`Fanout`] runs the
//! whole fleet concurrently and returns a [`RunSummary`].

pub mod engine;
pub mod logging;
pub mod payload;
pub mod report;
pub mod sink;

pub use engine::fanout::{Fanout, FanoutError};
pub use engine::session::{
    run_session, SessionContext, SessionError, SessionGauge, SessionOutcome,
};
pub use payload::{DeviceId, SensorRecord, SensorTemplate};
pub use report::RunSummary;
pub use sink::{Sink, SinkHandle};
