//! Measurement descriptors.
//!
//! A descriptor names one physical field as stored in InfluxDB. Dashboards
//! query by descriptor; broker rules write the same measurement names.

use serde::Serialize;

use crate::model::CompleteExperiment;
use crate::walker::{sources, MeasurementSource, SourceBranch};

/// One queryable field of a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementDescriptor {
    pub bucket: String,
    pub measurement: String,
    pub device_address: String,
    pub display_name: String,
    pub field: String,
    /// Service the field belongs to; `None` for whiteboard measures.
    pub service_uuid: Option<String>,
}

impl MeasurementDescriptor {
    pub fn is_whiteboard(&self) -> bool {
        self.service_uuid.is_none()
    }
}

impl MeasurementSource<'_> {
    /// Human label of the source.
    ///
    /// Characteristics are labelled `<device name>_<characteristic>`,
    /// whiteboard measures by their own name, both lowercased.
    pub fn display_name(&self) -> String {
        match self.branch {
            SourceBranch::Structured { .. } => format!(
                "{}_{}",
                self.device.name.to_lowercase(),
                self.name.to_lowercase().replace(' ', "")
            ),
            SourceBranch::Whiteboard => self.name.to_lowercase(),
        }
    }

    /// One descriptor per declared parser field. Gateway telemetry is not
    /// declared and therefore never described.
    pub fn descriptors(&self, bucket: &str) -> Vec<MeasurementDescriptor> {
        let display_name = self.display_name();
        let service_uuid = match self.branch {
            SourceBranch::Structured { service_uuid } => Some(service_uuid.to_string()),
            SourceBranch::Whiteboard => None,
        };
        self.parser
            .fields()
            .iter()
            .map(|field| MeasurementDescriptor {
                bucket: bucket.to_string(),
                measurement: self.measurement.clone(),
                device_address: self.device.address.clone(),
                display_name: display_name.clone(),
                field: field.name.clone(),
                service_uuid: service_uuid.clone(),
            })
            .collect()
    }
}

/// Every descriptor of an experiment, structured sources first.
pub fn descriptors(experiment: &CompleteExperiment, bucket: &str) -> Vec<MeasurementDescriptor> {
    sources(experiment)
        .flat_map(|source| source.descriptors(bucket))
        .collect()
}
