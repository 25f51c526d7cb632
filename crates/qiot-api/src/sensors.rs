//! Sensor definitions.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use qiot_core::{Error, Result};
use qiot_devices::dynamic_schema::has_dynamic_schema;
use qiot_devices::{flatten_dynamic_schema, SensorRecord};
use qiot_storage::{collections, Document, DocumentStore, Filter, ObjectId};

/// CRUD over the sensor collection.
#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn DocumentStore>,
}

impl SensorService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Every stored sensor, as stored.
    pub async fn list(&self) -> Result<Vec<Document>> {
        Ok(self.store.select(&Filter::all(), collections::SENSORS).await?)
    }

    /// One sensor with its dynamic schema lifted to the top level.
    pub async fn get(&self, id: &str) -> Result<Document> {
        let doc = self.raw(id).await?;
        if has_dynamic_schema(&doc) {
            return Ok(flatten_dynamic_schema(doc));
        }
        Ok(doc)
    }

    /// One sensor exactly as stored.
    pub async fn raw(&self, id: &str) -> Result<Document> {
        let oid = ObjectId::parse_str(id)?;
        self.store
            .select(&Filter::by_id(&oid), collections::SENSORS)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("sensor {}", id)))
    }

    /// Store a new sensor and return its id.
    pub async fn insert(&self, doc: Document) -> Result<String> {
        validate(&doc)?;
        let id = self.store.insert(doc, collections::SENSORS).await?;
        info!(category = "sensors", id = %id, "Sensor stored");
        Ok(id)
    }

    /// Replace a sensor. Fails when nothing changed.
    pub async fn edit(&self, id: &str, doc: Document) -> Result<()> {
        validate(&doc)?;
        let oid = ObjectId::parse_str(id)?;
        let modified = self
            .store
            .replace(&Filter::by_id(&oid), doc, collections::SENSORS)
            .await?;
        if modified == 0 {
            return Err(Error::NotModified(format!("sensor {}", id)));
        }
        debug!(category = "sensors", id = %id, "Sensor replaced");
        Ok(())
    }
}

/// Reject documents that would not join into an experiment later.
fn validate(doc: &Document) -> Result<()> {
    let view = if has_dynamic_schema(doc) {
        flatten_dynamic_schema(doc.clone())
    } else {
        doc.clone()
    };
    serde_json::from_value::<SensorRecord>(Value::Object(view))
        .map(|_| ())
        .map_err(|e| Error::InvalidDocument(format!("sensor: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qiot_storage::MemoryDocumentStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn service() -> SensorService {
        SensorService::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn test_insert_get_flattens_dynamic_schema() {
        let sensors = service();
        let id = sensors
            .insert(doc(json!({
                "name": "Band",
                "dynamicSchema": true,
                "dynamicJson": { "shortName": "hr-1", "services": [] }
            })))
            .await
            .unwrap();

        let got = sensors.get(&id).await.unwrap();
        assert_eq!(got["shortName"], "hr-1");
        assert!(!got.contains_key("dynamicJson"));

        let raw = sensors.raw(&id).await.unwrap();
        assert!(raw.contains_key("dynamicJson"));
    }

    #[tokio::test]
    async fn test_edit_without_change_is_not_modified() {
        let sensors = service();
        let body = doc(json!({ "name": "Thermo", "shortName": "t1" }));
        let id = sensors.insert(body.clone()).await.unwrap();

        let err = sensors.edit(&id, body).await.unwrap_err();
        assert!(matches!(err, Error::NotModified(_)));

        sensors
            .edit(&id, doc(json!({ "name": "Thermo", "shortName": "t2" })))
            .await
            .unwrap();
        assert_eq!(sensors.get(&id).await.unwrap()["shortName"], "t2");
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let sensors = service();
        assert!(matches!(
            sensors.get("not-an-id").await,
            Err(Error::MalformedId { .. })
        ));
        assert!(matches!(
            sensors.get(&ObjectId::new().to_hex()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            sensors.insert(doc(json!({ "services": "none" }))).await,
            Err(Error::InvalidDocument(_))
        ));
    }
}
