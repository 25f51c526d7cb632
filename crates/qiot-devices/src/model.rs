//! Experiment and sensor documents.
//!
//! Stored documents use the camelCase keys of the configuration frontend.
//! The typed views here are read-side projections: unknown keys are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use qiot_core::{Error, Result};

use crate::dynamic_schema::{flatten_dynamic_schema, has_dynamic_schema};
use crate::naming::mqtt_topic;
use crate::parser::ParserSlots;

/// Prefix of the per-device slot keys in complete experiments.
pub const SLOT_PREFIX: &str = "sensor_";

/// One parser field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            field_type: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn integer(mut self) -> Self {
        self.field_type = Some("integer".to_string());
        self
    }

    /// `"integer"` is the only distinguished type.
    pub fn is_integer(&self) -> bool {
        self.field_type.as_deref() == Some("integer")
    }

    /// Path, treating an empty string as absent.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.is_empty())
    }
}

/// A BLE characteristic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Characteristic {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(flatten)]
    pub parsers: ParserSlots,
    /// Filled in when the experiment is materialized.
    #[serde(rename = "mqttTopic", default, skip_serializing_if = "Option::is_none")]
    pub mqtt_topic: Option<String>,
}

/// A BLE service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    pub uuid: String,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

/// A measure published over the Movesense whiteboard API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhiteboardMeasure {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "mqttTopic", default)]
    pub mqtt_topic: String,
    #[serde(flatten)]
    pub parsers: ParserSlots,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Whiteboard {
    #[serde(default)]
    pub measures: Vec<WhiteboardMeasure>,
}

/// Typed view of a sensor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "shortName", default)]
    pub short_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(
        rename = "movesense_whiteboard",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub whiteboard: Option<Whiteboard>,
}

/// A device slot inside an experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSlot {
    #[serde(rename = "sensorId")]
    pub sensor_id: String,
    #[serde(rename = "macAddress", default)]
    pub mac_address: String,
    #[serde(rename = "enabledServices", default)]
    pub enabled_services: Vec<String>,
    /// Overrides the sensor's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Overrides the sensor's short name.
    #[serde(rename = "shortName", default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(rename = "dynamicSchema", default, skip_serializing_if = "Option::is_none")]
    pub dynamic_schema: Option<Value>,
    #[serde(
        rename = "movesense_whiteboard",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub whiteboard: Option<Whiteboard>,
}

/// Typed view of an experiment document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub devices: Vec<DeviceSlot>,
}

impl ExperimentRecord {
    pub fn from_document(doc: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|e| Error::InvalidDocument(format!("experiment: {}", e)))
    }
}

/// A device slot joined with its sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteDevice {
    /// `sensor_<index>` in experiment order.
    pub slot: String,
    #[serde(rename = "sensorId")]
    pub sensor_id: String,
    pub name: String,
    #[serde(rename = "shortName")]
    pub short_name: String,
    /// The slot's MAC address.
    pub address: String,
    /// Enabled services only, in enabled order.
    pub services: Vec<Service>,
    #[serde(rename = "movesense_whiteboard", default)]
    pub whiteboard: Vec<WhiteboardMeasure>,
}

/// Materialized experiment: every device slot joined with its sensor.
///
/// Built on read, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteExperiment {
    pub id: String,
    pub description: String,
    pub devices: Vec<CompleteDevice>,
}

/// Join one device slot with its raw sensor document.
///
/// The dynamic schema is flattened when either the slot or the sensor carries
/// the marker. Services are filtered to the slot's enabled set, in enabled
/// order, and every characteristic gets its MQTT topic.
pub fn join_device(
    index: usize,
    experiment_id: &str,
    slot: &DeviceSlot,
    sensor_doc: Map<String, Value>,
    topic_prefix: &str,
) -> Result<CompleteDevice> {
    let doc = if slot.dynamic_schema.is_some() || has_dynamic_schema(&sensor_doc) {
        flatten_dynamic_schema(sensor_doc)
    } else {
        sensor_doc
    };
    let sensor: SensorRecord = serde_json::from_value(Value::Object(doc)).map_err(|e| {
        Error::InvalidDocument(format!("sensor {}: {}", slot.sensor_id, e))
    })?;

    let name = slot.name.clone().unwrap_or_else(|| sensor.name.clone());
    let short_name = slot
        .short_name
        .clone()
        .unwrap_or_else(|| sensor.short_name.clone());

    let mut services = Vec::new();
    for uuid in &slot.enabled_services {
        let Some(service) = sensor.services.iter().find(|s| &s.uuid == uuid) else {
            debug!(
                sensor = %slot.sensor_id,
                service = %uuid,
                "Enabled service not offered by sensor"
            );
            continue;
        };
        let mut service = service.clone();
        for characteristic in &mut service.characteristics {
            characteristic.mqtt_topic = Some(mqtt_topic(
                topic_prefix,
                experiment_id,
                &name,
                &slot.mac_address,
                &characteristic.name,
            ));
        }
        services.push(service);
    }

    let whiteboard = slot
        .whiteboard
        .clone()
        .or(sensor.whiteboard)
        .map(|w| w.measures)
        .unwrap_or_default();

    Ok(CompleteDevice {
        slot: format!("{}{}", SLOT_PREFIX, index),
        sensor_id: slot.sensor_id.clone(),
        name,
        short_name,
        address: slot.mac_address.clone(),
        services,
        whiteboard,
    })
}
