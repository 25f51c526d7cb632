//! Dashboard query compilation.
//!
//! Measurement descriptors become query descriptors: structured sources are
//! kept when they belong to the requested service, whiteboard sources always.

use serde::Serialize;

use qiot_devices::parser::GATEWAY_FIELDS;
use qiot_devices::MeasurementDescriptor;

use crate::timeseries::{SeriesQuery, TimeSeries};

/// One dashboard series to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
    /// `<display name><measurement><field>`
    pub id: String,
    /// `<display name> - <measurement> - <field>`
    pub label: String,
    pub bucket: String,
    pub device_address: String,
    pub measurement: String,
    pub field: String,
}

impl From<&MeasurementDescriptor> for QueryDescriptor {
    fn from(d: &MeasurementDescriptor) -> Self {
        Self {
            id: format!("{}{}{}", d.display_name, d.measurement, d.field),
            label: format!("{} - {} - {}", d.display_name, d.measurement, d.field),
            bucket: d.bucket.clone(),
            device_address: d.device_address.clone(),
            measurement: d.measurement.clone(),
            field: d.field.clone(),
        }
    }
}

impl QueryDescriptor {
    /// Backend query for this descriptor.
    pub fn to_series_query(&self, experiment_id: &str, window_secs: u64) -> SeriesQuery {
        SeriesQuery {
            bucket: self.bucket.clone(),
            experiment_id: experiment_id.to_string(),
            device_address: self.device_address.clone(),
            measurement: self.measurement.clone(),
            field: self.field.clone(),
            window_secs,
        }
    }
}

/// Select and convert the descriptors a dashboard for `service_uuid` shows.
pub fn compile_queries(
    descriptors: &[MeasurementDescriptor],
    service_uuid: &str,
) -> Vec<QueryDescriptor> {
    descriptors
        .iter()
        .filter(|d| match &d.service_uuid {
            Some(uuid) => uuid == service_uuid,
            None => true,
        })
        .filter(|d| !GATEWAY_FIELDS.contains(&d.field.as_str()))
        .map(QueryDescriptor::from)
        .collect()
}

/// A fetched dashboard series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub id: String,
    pub label: String,
    pub timestamps: Vec<String>,
    pub values: Vec<f64>,
}

impl QueryResult {
    pub fn new(descriptor: &QueryDescriptor, series: TimeSeries) -> Self {
        Self {
            id: descriptor.id.clone(),
            label: descriptor.label.clone(),
            timestamps: series.timestamps,
            values: series.values,
        }
    }
}
