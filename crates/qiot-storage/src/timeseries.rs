//! Time-series backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use qiot_core::Result;

/// Parameters of one time-series read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesQuery {
    pub bucket: String,
    pub experiment_id: String,
    pub device_address: String,
    pub measurement: String,
    /// Empty means every field of the measurement.
    pub field: String,
    /// Look-back window in seconds.
    pub window_secs: u64,
}

/// Points of a series, as parallel vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// RFC 3339 timestamps.
    pub timestamps: Vec<String>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn push(&mut self, timestamp: String, value: f64) {
        self.timestamps.push(timestamp);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read access to stored telemetry.
///
/// Only float and integer values are returned; other value types are dropped.
#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    async fn query(&self, query: &SeriesQuery) -> Result<TimeSeries>;
}
