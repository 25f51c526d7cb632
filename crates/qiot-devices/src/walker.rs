//! Schema walker.
//!
//! Flattens a [`CompleteExperiment`] into the measurement sources that get a
//! broker rule and dashboard queries: one per characteristic of an enabled
//! service, and one per whiteboard measure.

use tracing::{debug, warn};

use crate::model::{Characteristic, CompleteDevice, CompleteExperiment, Service, WhiteboardMeasure};
use crate::naming::measurement_name;
use crate::parser::{dispatch, Dispatched, ParserVariant};

/// Which part of the device document a source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBranch<'a> {
    /// A characteristic of an enabled service.
    Structured { service_uuid: &'a str },
    /// A Movesense whiteboard measure.
    Whiteboard,
}

impl SourceBranch<'_> {
    pub fn is_whiteboard(&self) -> bool {
        matches!(self, SourceBranch::Whiteboard)
    }
}

/// One named stream of telemetry published by a device.
#[derive(Debug, Clone)]
pub struct MeasurementSource<'a> {
    pub device: &'a CompleteDevice,
    pub branch: SourceBranch<'a>,
    /// Characteristic or measure name as written in the document.
    pub name: &'a str,
    /// Canonical `<short>_<name>`.
    pub measurement: String,
    pub topic: &'a str,
    pub parser: ParserVariant<'a>,
}

impl<'a> MeasurementSource<'a> {
    /// Selection and write fragments for the source's parser.
    pub fn dispatch(&self) -> Dispatched {
        dispatch(self.parser)
    }

    /// The device slot key, e.g. `sensor_0`.
    pub fn slot(&self) -> &'a str {
        &self.device.slot
    }
}

/// Sources from the characteristics of enabled services.
pub fn structured_sources(
    experiment: &CompleteExperiment,
) -> impl Iterator<Item = MeasurementSource<'_>> {
    experiment.devices.iter().flat_map(|device| {
        device.services.iter().flat_map(move |service| {
            service
                .characteristics
                .iter()
                .filter_map(move |c| structured_source(device, service, c))
        })
    })
}

/// Sources from whiteboard measures.
pub fn whiteboard_sources(
    experiment: &CompleteExperiment,
) -> impl Iterator<Item = MeasurementSource<'_>> {
    experiment.devices.iter().flat_map(|device| {
        device
            .whiteboard
            .iter()
            .filter_map(move |m| whiteboard_source(device, m))
    })
}

/// Structured sources followed by whiteboard sources.
pub fn sources(experiment: &CompleteExperiment) -> impl Iterator<Item = MeasurementSource<'_>> {
    structured_sources(experiment).chain(whiteboard_sources(experiment))
}

fn structured_source<'a>(
    device: &'a CompleteDevice,
    service: &'a Service,
    characteristic: &'a Characteristic,
) -> Option<MeasurementSource<'a>> {
    let measurement = named(device, &characteristic.name)?;
    let topic = characteristic
        .mqtt_topic
        .as_deref()
        .filter(|t| !t.is_empty());
    build(
        device,
        SourceBranch::Structured {
            service_uuid: &service.uuid,
        },
        &characteristic.name,
        measurement,
        topic,
        characteristic.parsers.variant(),
    )
}

fn whiteboard_source<'a>(
    device: &'a CompleteDevice,
    measure: &'a WhiteboardMeasure,
) -> Option<MeasurementSource<'a>> {
    let measurement = named(device, &measure.name)?;
    let topic = Some(measure.mqtt_topic.as_str()).filter(|t| !t.is_empty());
    build(
        device,
        SourceBranch::Whiteboard,
        &measure.name,
        measurement,
        topic,
        measure.parsers.variant(),
    )
}

fn named(device: &CompleteDevice, name: &str) -> Option<String> {
    let measurement = measurement_name(&device.short_name, name);
    if measurement.is_none() {
        debug!(
            slot = %device.slot,
            short_name = %device.short_name,
            name = %name,
            "Skipping source with empty canonical name"
        );
    }
    measurement
}

fn build<'a>(
    device: &'a CompleteDevice,
    branch: SourceBranch<'a>,
    name: &'a str,
    measurement: String,
    topic: Option<&'a str>,
    parser: Option<ParserVariant<'a>>,
) -> Option<MeasurementSource<'a>> {
    let Some(parser) = parser else {
        debug!(measurement = %measurement, "Skipping source without parser");
        return None;
    };
    let Some(topic) = topic else {
        debug!(measurement = %measurement, "Skipping source without topic");
        return None;
    };
    if let Some(defect) = parser.defect() {
        warn!(
            measurement = %measurement,
            parser = parser.kind().as_str(),
            defect,
            "Skipping source with unusable parser"
        );
        return None;
    }
    Some(MeasurementSource {
        device,
        branch,
        name,
        measurement,
        topic,
        parser,
    })
}
