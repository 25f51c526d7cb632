//! Device and sensor schema handling.
//!
//! This crate turns experiment and sensor documents into the measurement
//! sources that drive both the write path (MQTT topics, broker rules) and
//! the read path (dashboard queries).
//!
//! ## Architecture
//!
//! - **naming**: the single identifier sanitizer
//! - **model**: typed document views and the experiment/sensor join
//! - **dynamic_schema**: lifting `dynamicJson` keys into a sensor
//! - **parser**: the four parser variants and their dispatch
//! - **walker**: measurement sources of a complete experiment
//! - **descriptor**: per-field measurement descriptors

pub mod descriptor;
pub mod dynamic_schema;
pub mod model;
pub mod naming;
pub mod parser;
pub mod walker;

pub use descriptor::{descriptors, MeasurementDescriptor};
pub use dynamic_schema::flatten_dynamic_schema;
pub use model::{
    join_device, Characteristic, CompleteDevice, CompleteExperiment, DeviceSlot,
    ExperimentRecord, Field, SensorRecord, Service, Whiteboard, WhiteboardMeasure,
};
pub use naming::{measurement_name, mqtt_topic, sanitize};
pub use parser::{
    dispatch, Assignment, Dispatched, ParserKind, ParserSlots, ParserVariant, Projection,
    Selection,
};
pub use walker::{sources, structured_sources, whiteboard_sources, MeasurementSource, SourceBranch};
