//! Experiments: storage, the complete join, and gateway export.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use qiot_core::{Error, Result};
use qiot_devices::model::SLOT_PREFIX;
use qiot_devices::{join_device, CompleteExperiment, DeviceSlot, ExperimentRecord};
use qiot_rules::SyncReport;
use qiot_storage::{collections, Document, DocumentStore, Filter, ObjectId, ID_KEY};

use crate::sync::SyncService;

/// A stored experiment together with the sync it triggered.
#[derive(Debug, Clone)]
pub struct Stored {
    pub id: String,
    /// `None` when the service runs without a broker.
    pub sync: Option<SyncReport>,
}

/// Experiment operations.
#[derive(Clone)]
pub struct ExperimentService {
    store: Arc<dyn DocumentStore>,
    topic_prefix: String,
    sync: Option<SyncService>,
}

impl ExperimentService {
    /// Service without broker sync, for reads and dry runs.
    pub fn new(store: Arc<dyn DocumentStore>, topic_prefix: impl Into<String>) -> Self {
        Self {
            store,
            topic_prefix: topic_prefix.into(),
            sync: None,
        }
    }

    /// Sync every inserted or updated experiment through `sync`.
    pub fn with_sync(mut self, sync: SyncService) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Experiment summaries: `_id` exposed as `id`, devices omitted.
    pub async fn list(&self) -> Result<Vec<Document>> {
        let docs = self
            .store
            .select(&Filter::all(), collections::EXPERIMENTS)
            .await?;
        Ok(docs.into_iter().map(summary).collect())
    }

    /// One experiment exactly as stored.
    pub async fn raw(&self, id: &str) -> Result<Document> {
        find(self.store.as_ref(), id, collections::EXPERIMENTS, "experiment").await
    }

    /// The experiment with every device slot joined to its sensor.
    pub async fn complete(&self, id: &str) -> Result<CompleteExperiment> {
        let doc = self.raw(id).await?;
        let record = ExperimentRecord::from_document(&doc)?;
        let experiment_id = record.id.clone().unwrap_or_else(|| id.to_string());

        let mut devices = Vec::with_capacity(record.devices.len());
        for (index, slot) in record.devices.iter().enumerate() {
            let sensor = self.sensor_for(slot).await?;
            devices.push(join_device(
                index,
                &experiment_id,
                slot,
                sensor,
                &self.topic_prefix,
            )?);
        }
        debug!(
            category = "experiments",
            id = %experiment_id,
            devices = devices.len(),
            "Experiment joined"
        );

        Ok(CompleteExperiment {
            id: experiment_id,
            description: record.description,
            devices,
        })
    }

    /// Store a new experiment, then sync it.
    pub async fn insert(&self, doc: Document) -> Result<Stored> {
        ExperimentRecord::from_document(&doc)?;
        let id = self.store.insert(doc, collections::EXPERIMENTS).await?;
        info!(category = "experiments", id = %id, "Experiment stored");
        let sync = self.sync_stored(&id).await?;
        Ok(Stored { id, sync })
    }

    /// Replace an experiment, then sync it. Fails when nothing changed.
    pub async fn update(&self, id: &str, doc: Document) -> Result<Stored> {
        ExperimentRecord::from_document(&doc)?;
        let oid = ObjectId::parse_str(id)?;
        let modified = self
            .store
            .replace(&Filter::by_id(&oid), doc, collections::EXPERIMENTS)
            .await?;
        if modified == 0 {
            return Err(Error::NotModified(format!("experiment {}", id)));
        }
        info!(category = "experiments", id = %id, "Experiment replaced");
        let sync = self.sync_stored(id).await?;
        Ok(Stored {
            id: id.to_string(),
            sync,
        })
    }

    /// Gateway configuration for an experiment as YAML.
    ///
    /// Each slot becomes `sensor_<n>` holding the sensor document without its
    /// id and with only the slot's enabled services.
    pub async fn export_yaml(&self, id: &str) -> Result<String> {
        let doc = self.raw(id).await?;
        let record = ExperimentRecord::from_document(&doc)?;

        let mut devices = Map::new();
        for (index, slot) in record.devices.iter().enumerate() {
            let mut sensor = self.sensor_for(slot).await?;
            sensor.remove(ID_KEY);
            let services = match sensor.remove("services") {
                Some(Value::Array(services)) => enabled_services(services, &slot.enabled_services),
                _ => Vec::new(),
            };
            sensor.insert("services".to_string(), Value::Array(services));
            devices.insert(format!("{}{}", SLOT_PREFIX, index), Value::Object(sensor));
        }

        let mut root = Map::new();
        root.insert("devices".to_string(), Value::Object(devices));
        serde_yaml::to_string(&Value::Object(root))
            .map_err(|e| Error::Serialization(format!("gateway yaml: {}", e)))
    }

    async fn sensor_for(&self, slot: &DeviceSlot) -> Result<Document> {
        find(
            self.store.as_ref(),
            &slot.sensor_id,
            collections::SENSORS,
            "sensor",
        )
        .await
    }

    async fn sync_stored(&self, id: &str) -> Result<Option<SyncReport>> {
        let Some(sync) = &self.sync else {
            return Ok(None);
        };
        let experiment = self.complete(id).await?;
        let report = sync.compile_and_sync(&experiment).await?;
        if !report.is_complete() {
            warn!(
                category = "experiments",
                id = %id,
                failed = ?report.failed(),
                "Experiment stored but broker sync is incomplete"
            );
        }
        Ok(Some(report))
    }
}

async fn find(store: &dyn DocumentStore, id: &str, collection: &str, what: &str) -> Result<Document> {
    let oid = ObjectId::parse_str(id)?;
    store
        .select(&Filter::by_id(&oid), collection)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("{} {}", what, id)))
}

fn summary(mut doc: Document) -> Document {
    doc.remove("devices");
    if let Some(id) = doc.remove(ID_KEY) {
        doc.insert("id".to_string(), id);
    }
    doc
}

/// Services whose uuid is enabled, in enabled order.
fn enabled_services(services: Vec<Value>, enabled: &[String]) -> Vec<Value> {
    enabled
        .iter()
        .filter_map(|uuid| {
            services
                .iter()
                .find(|s| s.get("uuid").and_then(Value::as_str) == Some(uuid.as_str()))
                .cloned()
        })
        .collect()
}
