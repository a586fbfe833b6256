//! Sensor payload construction.
//!
//! Every simulated device sends the same set of readings; only the
//! `device_id` differs. The readings live in an immutable [`SensorTemplate`]
//! shared by all sessions, and [`SensorTemplate::build`] hands each session
//! its own [`SensorRecord`].

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use telesim_common::DEFAULT_DEVICE_PREFIX;
use thiserror::Error;

/// Name of the identity field in every transmitted record.
pub const DEVICE_ID_FIELD: &str = "device_id";

const DEFAULT_READINGS: &[(&str, i64)] = &[
    ("temperature", 20),
    ("humidity", 50),
    ("AB12cdEF", 45),
    ("LMnopq34", 78),
    ("uvWxyZ56", 12),
    ("pqrS78XY", 90),
    ("fgHiJK90", 67),
    ("mnOPqr12", 34),
    ("aBCdEF34", 88),
    ("UVwxYZ89", 14),
    ("qrstUV90", 23),
    ("stUvWX56", 49),
    ("XYzAbc78", 65),
    ("CD23efGH", 19),
    ("ijKlmN67", 33),
    ("lmNopQ23", 57),
    ("aBC45def", 80),
    ("DE67ghIJ", 22),
    ("gHjkL789", 95),
    ("mnO56PQr", 41),
    ("UVWX34yz", 31),
    ("rsTuv567", 13),
    ("tUVwXY23", 28),
    ("zAbcDE78", 62),
    ("EF56ghIJ", 79),
    ("ijKlM123", 85),
    ("LMnOpQ90", 54),
    ("pqRsTU56", 71),
    ("AbCD23ef", 47),
    ("WXyZ45mn", 91),
    ("Yz78abCD", 16),
    ("cdEF67gh", 74),
    ("iJKl89mn", 21),
    ("opQR56st", 50),
    ("uvWX90yz", 32),
    ("xYZ23efG", 43),
    ("hIJkL56m", 29),
    ("NOqR78st", 66),
    ("TUvwX23y", 55),
    ("efGh45IJ", 87),
    ("opQR56uv", 58),
    ("wXYz78AB", 97),
    ("noPQR67s", 25),
    ("TUvWX34Y", 72),
    ("GHiJ56kl", 37),
    ("pqrS45UV", 48),
    ("STuv89Wx", 86),
    ("noPQ23ST", 39),
    ("KLmN67op", 96),
    ("rsUV45WX", 53),
];

/// Template used when no readings are configured.
pub static DEFAULT_TEMPLATE: Lazy<SensorTemplate> = Lazy::new(|| SensorTemplate {
    prefix: DEFAULT_DEVICE_PREFIX.to_string(),
    readings: DEFAULT_READINGS
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect(),
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("reading name `{0}` collides with the identity field")]
    ReservedField(String),

    #[error("device prefix must not be empty")]
    EmptyPrefix,
}

/// Identity of one simulated device, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn label(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One device's payload: the identity field followed by its readings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub device_id: String,
    #[serde(flatten)]
    pub readings: BTreeMap<String, i64>,
}

impl SensorRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Read-only source of sensor records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorTemplate {
    prefix: String,
    readings: BTreeMap<String, i64>,
}

impl SensorTemplate {
    pub fn new(
        prefix: impl Into<String>,
        readings: BTreeMap<String, i64>,
    ) -> Result<Self, TemplateError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(TemplateError::EmptyPrefix);
        }
        if readings.contains_key(DEVICE_ID_FIELD) {
            return Err(TemplateError::ReservedField(DEVICE_ID_FIELD.to_string()));
        }
        Ok(Self { prefix, readings })
    }

    /// Default readings under a custom device prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Result<Self, TemplateError> {
        Self::new(prefix, DEFAULT_TEMPLATE.readings.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn readings(&self) -> &BTreeMap<String, i64> {
        &self.readings
    }

    /// Builds an independently owned record for `device`.
    pub fn build(&self, device: DeviceId) -> SensorRecord {
        SensorRecord {
            device_id: device.label(&self.prefix),
            readings: self.readings.clone(),
        }
    }
}
