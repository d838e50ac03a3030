//! Data types returned to the client as JSON.
//! Keep this module minimal and stable: it defines the wire format.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::RequestError;

/// Share of elapsed CPU time since the previous sampling point, in percent.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
    pub idle: f64,
}

/// Memory usage in bytes, `percent` in 0..=100.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceCounters {
    // cumulative totals since boot (client should diff to get rates)
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Interface name -> counters. Ordered so the JSON is stable between samples.
pub type NetworkCounters = BTreeMap<String, InterfaceCounters>;

/// Simulated power draw, not a hardware measurement.
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PowerReading {
    pub current_value: f64,
    pub max_value: f64,
}

/// A telemetry field that is either present or explicitly marked unavailable.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Reading<T> {
    Available(T),
    Unavailable { unavailable: String },
}

impl<T> Reading<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Reading::Unavailable {
            unavailable: reason.into(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Reading::Available(v) => Some(v),
            Reading::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Available(_))
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for Reading<T> {
    fn from(r: Result<T, E>) -> Self {
        match r {
            Ok(v) => Reading::Available(v),
            Err(e) => Reading::unavailable(e.to_string()),
        }
    }
}

/// One point of the time series.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: OffsetDateTime,
    // monotonic offset from run start; wall clock may jump, this does not
    pub offset_ms: u64,
    pub cpu: Reading<CpuTimes>,
    pub memory: Reading<MemoryUsage>,
    pub network: Reading<NetworkCounters>,
    pub power: Reading<PowerReading>,
}

fn rfc3339<S: Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    let text = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    s.serialize_str(&text)
}

/// A validated load request. Construct with [`LoadRequest::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    utilization_percent: u8,
    duration_secs: u64,
}

impl LoadRequest {
    pub fn new(utilization_percent: i64, duration_secs: i64) -> Result<Self, RequestError> {
        if !(0..=100).contains(&utilization_percent) {
            return Err(RequestError::InvalidArgument(format!(
                "utilization must be between 0 and 100, got {utilization_percent}"
            )));
        }
        if duration_secs < 1 {
            return Err(RequestError::InvalidArgument(format!(
                "duration must be at least 1 second, got {duration_secs}"
            )));
        }
        Ok(Self {
            utilization_percent: utilization_percent as u8,
            duration_secs: duration_secs as u64,
        })
    }

    pub fn utilization_percent(&self) -> u8 {
        self.utilization_percent
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.duration_secs)
    }
}

/// How the load generator fared during one run.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub execution_units: usize,
    pub workers_requested: usize,
    pub workers_started: usize,
    pub workers_panicked: usize,
    pub partial_start: bool,
    pub cancelled: bool,
}

/// Result of one completed run: the series plus load metadata.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub load: LoadSummary,
    pub samples: Vec<TelemetrySample>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn load_request_bounds() {
        assert!(LoadRequest::new(0, 1).is_ok());
        assert!(LoadRequest::new(100, 3600).is_ok());
        assert!(LoadRequest::new(-1, 5).is_err());
        assert!(LoadRequest::new(101, 5).is_err());
        assert!(LoadRequest::new(50, 0).is_err());
        let r = LoadRequest::new(42, 7).unwrap();
        assert_eq!(r.utilization_percent(), 42);
        assert_eq!(r.duration(), std::time::Duration::from_secs(7));
    }

    #[test]
    fn sample_json_shape() {
        let mut network = NetworkCounters::new();
        network.insert(
            "eth0".into(),
            InterfaceCounters {
                bytes_sent: 10,
                bytes_received: 20,
            },
        );
        let sample = TelemetrySample {
            timestamp: datetime!(2024-05-01 12:00:00 UTC),
            offset_ms: 1000,
            cpu: Reading::Available(CpuTimes {
                user: 12.5,
                system: 2.5,
                idle: 85.0,
            }),
            memory: Reading::unavailable("boom"),
            network: Reading::Available(network),
            power: Reading::Available(PowerReading {
                current_value: 12.34,
                max_value: 25.0,
            }),
        };
        let v = serde_json::to_value(&sample).unwrap();
        assert_eq!(v["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(v["offsetMs"], 1000);
        assert_eq!(v["cpu"]["idle"], 85.0);
        assert_eq!(v["memory"]["unavailable"], "boom");
        assert_eq!(v["network"]["eth0"]["bytesSent"], 10);
        assert_eq!(v["network"]["eth0"]["bytesReceived"], 20);
        assert_eq!(v["power"]["currentValue"], 12.34);
        assert_eq!(v["power"]["maxValue"], 25.0);
    }

    #[test]
    fn reading_from_result() {
        let ok: Reading<u32> = Ok::<_, String>(3).into();
        assert_eq!(ok.value(), Some(&3));
        let err: Reading<u32> = Err::<u32, _>("nope").into();
        assert!(!err.is_available());
    }
}
