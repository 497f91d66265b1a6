use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Telemetry signal carried by an OTLP payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Traces,
    Metrics,
    Logs,
}

impl SignalType {
    /// All signal types, in replay tie-break order.
    pub const ALL: [SignalType; 3] = [SignalType::Traces, SignalType::Metrics, SignalType::Logs];

    /// Key segment and wire name of the signal.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Traces => "traces",
            SignalType::Metrics => "metrics",
            SignalType::Logs => "logs",
        }
    }

    /// Dense index used for per-signal arrays.
    pub fn index(&self) -> usize {
        match self {
            SignalType::Traces => 0,
            SignalType::Metrics => 1,
            SignalType::Logs => 2,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traces" => Ok(SignalType::Traces),
            "metrics" => Ok(SignalType::Metrics),
            "logs" => Ok(SignalType::Logs),
            other => Err(Error::invalid_request(format!("unknown signal type '{}'", other))),
        }
    }
}
