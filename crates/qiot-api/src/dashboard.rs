//! Dashboard series for an experiment.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use qiot_core::{AppConfig, Error, Result};
use qiot_devices::descriptors;
use qiot_storage::{compile_queries, QueryDescriptor, QueryResult, TimeSeriesBackend};

use crate::experiments::ExperimentService;

/// Reads the series a dashboard shows.
#[derive(Clone)]
pub struct DashboardService {
    experiments: ExperimentService,
    backend: Arc<dyn TimeSeriesBackend>,
    bucket: String,
    window_secs: u64,
    concurrency: usize,
}

impl DashboardService {
    pub fn new(
        experiments: ExperimentService,
        backend: Arc<dyn TimeSeriesBackend>,
        config: &AppConfig,
    ) -> Self {
        Self {
            experiments,
            backend,
            bucket: config.influx.bucket.clone(),
            window_secs: config.influx.window_secs,
            concurrency: config.sync.concurrency.max(1),
        }
    }

    /// Query descriptors for one service of an experiment.
    pub async fn queries(&self, experiment_id: &str, service_uuid: &str) -> Result<Vec<QueryDescriptor>> {
        let experiment = self.experiments.complete(experiment_id).await?;
        Ok(compile_queries(
            &descriptors(&experiment, &self.bucket),
            service_uuid,
        ))
    }

    /// Fetch every series of `service_uuid` plus the whiteboard measures.
    ///
    /// Results keep query order. The first failing query fails the call.
    pub async fn build_dashboard(
        &self,
        experiment_id: &str,
        service_uuid: &str,
    ) -> Result<Vec<QueryResult>> {
        let queries = self.queries(experiment_id, service_uuid).await?;
        debug!(
            category = "dashboard",
            experiment = %experiment_id,
            service = %service_uuid,
            queries = queries.len(),
            "Building dashboard"
        );

        stream::iter(queries)
            .map(|query| async move {
                let series = self
                    .backend
                    .query(&query.to_series_query(experiment_id, self.window_secs))
                    .await?;
                Ok::<_, Error>(QueryResult::new(&query, series))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}
