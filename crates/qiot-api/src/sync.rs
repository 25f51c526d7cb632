//! Broker synchronisation of complete experiments.

use std::sync::Arc;

use tracing::info;

use qiot_core::{AppConfig, Result};
use qiot_devices::CompleteExperiment;
use qiot_rules::{compile, BrokerApi, CancelFlag, CompiledRoute, NamingPolicy, Reconciler, SyncReport};

/// Compiles experiments into broker routes and pushes them.
#[derive(Clone)]
pub struct SyncService {
    broker: Arc<dyn BrokerApi>,
    policy: NamingPolicy,
    connector: String,
    concurrency: usize,
    cancel: CancelFlag,
}

impl SyncService {
    pub fn new(broker: Arc<dyn BrokerApi>, config: &AppConfig) -> Self {
        Self {
            broker,
            policy: NamingPolicy::from(&config.naming),
            connector: config.broker.connector.clone(),
            concurrency: config.sync.concurrency,
            cancel: CancelFlag::new(),
        }
    }

    /// Flag that stops in-flight syncs from issuing further calls.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Routes an experiment compiles to, without contacting the broker.
    pub fn compile(&self, experiment: &CompleteExperiment) -> Vec<CompiledRoute> {
        compile(experiment, &self.policy)
    }

    /// Compile `experiment` and upsert every route.
    ///
    /// Per-route failures are reported, not raised; only a failed action
    /// listing aborts the whole sync.
    pub async fn compile_and_sync(&self, experiment: &CompleteExperiment) -> Result<SyncReport> {
        let routes = self.compile(experiment);
        if routes.is_empty() {
            info!(
                category = "sync",
                experiment = %experiment.id,
                "Experiment has no measurement sources, nothing to sync"
            );
            return Ok(SyncReport::default());
        }

        info!(
            category = "sync",
            experiment = %experiment.id,
            routes = routes.len(),
            "Syncing experiment to broker"
        );
        Reconciler::new(self.broker.clone(), self.connector.as_str(), self.concurrency)
            .with_cancel(self.cancel.clone())
            .sync(routes)
            .await
    }
}
