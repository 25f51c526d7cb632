//! Service layer for QIoT.
//!
//! These services are what an HTTP layer or the CLI calls into:
//!
//! - [`SensorService`]: sensor documents
//! - [`ExperimentService`]: experiments, the complete join, gateway export
//! - [`SyncService`]: `compile_and_sync` against the broker
//! - [`DashboardService`]: `build_dashboard` against the time-series store

pub mod dashboard;
pub mod experiments;
pub mod sensors;
pub mod sync;

use std::sync::Arc;

use qiot_core::AppConfig;
use qiot_rules::BrokerApi;
use qiot_storage::{DocumentStore, TimeSeriesBackend};

pub use dashboard::DashboardService;
pub use experiments::{ExperimentService, Stored};
pub use sensors::SensorService;
pub use sync::SyncService;

/// Every service, wired to the same collaborators.
#[derive(Clone)]
pub struct Services {
    pub sensors: SensorService,
    pub experiments: ExperimentService,
    pub sync: SyncService,
    pub dashboard: DashboardService,
}

impl Services {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn BrokerApi>,
        backend: Arc<dyn TimeSeriesBackend>,
        config: &AppConfig,
    ) -> Self {
        let sync = SyncService::new(broker, config);
        let experiments = ExperimentService::new(store.clone(), config.naming.topic_prefix.as_str())
            .with_sync(sync.clone());
        let dashboard = DashboardService::new(experiments.clone(), backend, config);
        Self {
            sensors: SensorService::new(store),
            experiments,
            sync,
            dashboard,
        }
    }
}
