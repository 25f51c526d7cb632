//! Broker reconciliation.
//!
//! Compiled routes are upserted against the broker as a saga: each route is
//! an action step followed by a rule step, every step reports its own
//! result, and nothing is rolled back. Create-vs-update decisions for
//! actions are made once, from a snapshot of the deployed actions, before
//! any request is issued.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use qiot_core::{Error, Result};

use crate::broker::{ActionPayload, BrokerApi, CreateOutcome, RemoteAction, RulePayload};
use crate::compiler::CompiledRoute;

/// Read-only view of the actions deployed when the sync started.
#[derive(Debug, Clone, Default)]
pub struct ActionSnapshot {
    actions: HashMap<String, RemoteAction>,
}

impl ActionSnapshot {
    pub fn new(actions: Vec<RemoteAction>) -> Self {
        Self {
            actions: actions.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RemoteAction> {
        self.actions.get(name)
    }

    /// Whether an action with exactly this name is deployed.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

/// Shared flag that stops a sync from issuing further requests.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the action of a route is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStep {
    Create,
    Update,
}

/// How the rule of a route ended up written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStep {
    Created,
    Updated,
}

/// Saga step a route failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Action,
    Rule,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStage::Action => write!(f, "action"),
            SyncStage::Rule => write!(f, "rule"),
        }
    }
}

/// A route with its action classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRoute {
    pub index: usize,
    pub route: CompiledRoute,
    pub action_step: ActionStep,
}

/// Classify every route's action against the snapshot.
///
/// A name created earlier in the same plan counts as present, so a second
/// route compiling to the same action becomes an update.
pub fn plan(routes: Vec<CompiledRoute>, snapshot: &ActionSnapshot) -> Vec<PlannedRoute> {
    let mut provisional = HashSet::new();
    routes
        .into_iter()
        .enumerate()
        .map(|(index, route)| {
            let name = &route.action.name;
            let action_step = if snapshot.contains(name) || provisional.contains(name) {
                ActionStep::Update
            } else {
                provisional.insert(name.clone());
                ActionStep::Create
            };
            PlannedRoute {
                index,
                route,
                action_step,
            }
        })
        .collect()
}

/// Result of one route.
#[derive(Debug, Clone)]
pub enum RouteStatus {
    Synced { action: ActionStep, rule: RuleStep },
    Failed { stage: SyncStage, error: Error },
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub measurement: String,
    pub action_name: String,
    pub rule_id: String,
    pub status: RouteStatus,
}

impl RouteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RouteStatus::Synced { .. })
    }
}

/// Per-route results of a sync, in compile order.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub outcomes: Vec<RouteOutcome>,
}

impl SyncReport {
    /// Measurements whose route failed.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.measurement.as_str())
            .collect()
    }

    /// Measurements whose route was fully written.
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.measurement.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(RouteOutcome::is_success)
    }

    /// Turn a report with failures into [`Error::PartialSync`].
    pub fn ensure_complete(self) -> Result<SyncReport> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(Error::PartialSync {
            failed: self.failed().into_iter().map(String::from).collect(),
            succeeded: self.succeeded().into_iter().map(String::from).collect(),
        })
    }
}

/// Drives compiled routes into the broker.
pub struct Reconciler {
    broker: Arc<dyn BrokerApi>,
    connector: String,
    concurrency: usize,
    cancel: CancelFlag,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn BrokerApi>, connector: impl Into<String>, concurrency: usize) -> Self {
        Self {
            broker,
            connector: connector.into(),
            concurrency: concurrency.max(1),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Fetch the deployed actions once.
    pub async fn snapshot(&self) -> Result<Arc<ActionSnapshot>> {
        let actions = self.broker.list_actions().await?;
        Ok(Arc::new(ActionSnapshot::new(actions)))
    }

    /// Snapshot the broker, then apply `routes`.
    pub async fn sync(&self, routes: Vec<CompiledRoute>) -> Result<SyncReport> {
        let snapshot = self.snapshot().await?;
        Ok(self.apply(routes, snapshot).await)
    }

    /// Apply `routes` against an already fetched snapshot.
    ///
    /// Routes sharing an action name run in order; distinct names run
    /// concurrently up to the configured bound.
    pub async fn apply(
        &self,
        routes: Vec<CompiledRoute>,
        snapshot: Arc<ActionSnapshot>,
    ) -> SyncReport {
        let planned = plan(routes, &snapshot);
        let total = planned.len();

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<PlannedRoute>> = HashMap::new();
        for p in planned {
            let key = p.route.action.name.clone();
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(p);
        }
        let groups: Vec<Vec<PlannedRoute>> = order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .collect();

        let mut results: Vec<(usize, RouteOutcome)> = stream::iter(groups)
            .map(|group| self.run_group(group, snapshot.clone()))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();
        results.sort_by_key(|(index, _)| *index);

        let report = SyncReport {
            outcomes: results.into_iter().map(|(_, o)| o).collect(),
        };
        info!(
            category = "sync",
            total,
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            "Broker sync finished"
        );
        report
    }

    async fn run_group(
        &self,
        group: Vec<PlannedRoute>,
        snapshot: Arc<ActionSnapshot>,
    ) -> Vec<(usize, RouteOutcome)> {
        let mut outcomes = Vec::with_capacity(group.len());
        for planned in group {
            let status = self.run_route(&planned, &snapshot).await;
            if let RouteStatus::Failed { stage, error } = &status {
                error!(
                    category = "sync",
                    measurement = %planned.route.measurement,
                    stage = %stage,
                    error = %error,
                    "Route sync failed"
                );
            }
            outcomes.push((
                planned.index,
                RouteOutcome {
                    measurement: planned.route.measurement.clone(),
                    action_name: planned.route.action.name.clone(),
                    rule_id: planned.route.rule.id.clone(),
                    status,
                },
            ));
        }
        outcomes
    }

    async fn run_route(&self, planned: &PlannedRoute, snapshot: &ActionSnapshot) -> RouteStatus {
        let route = &planned.route;
        if let Err(error) = self.check_cancelled(&route.action.name) {
            return RouteStatus::Failed {
                stage: SyncStage::Action,
                error,
            };
        }
        if let Err(error) = self.upsert_action(planned, snapshot).await {
            return RouteStatus::Failed {
                stage: SyncStage::Action,
                error,
            };
        }

        if let Err(error) = self.check_cancelled(&route.rule.id) {
            return RouteStatus::Failed {
                stage: SyncStage::Rule,
                error,
            };
        }
        match self.upsert_rule(route).await {
            Ok(rule) => RouteStatus::Synced {
                action: planned.action_step,
                rule,
            },
            Err(error) => RouteStatus::Failed {
                stage: SyncStage::Rule,
                error,
            },
        }
    }

    fn check_cancelled(&self, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("skipped {}", what)));
        }
        Ok(())
    }

    async fn upsert_action(&self, planned: &PlannedRoute, snapshot: &ActionSnapshot) -> Result<()> {
        let action = &planned.route.action;
        match planned.action_step {
            ActionStep::Create => {
                let payload = ActionPayload::create(action, &self.connector);
                self.broker.create_action(&payload).await
            }
            ActionStep::Update => {
                let payload =
                    ActionPayload::update(action, &self.connector, snapshot.get(&action.name));
                self.broker.update_action(&action.name, &payload).await
            }
        }
    }

    async fn upsert_rule(&self, route: &CompiledRoute) -> Result<RuleStep> {
        let payload = RulePayload::from(&route.rule);
        match self.broker.create_rule(&payload).await? {
            CreateOutcome::Created => Ok(RuleStep::Created),
            CreateOutcome::Rejected { status, .. } => {
                warn!(
                    category = "sync",
                    rule = %route.rule.id,
                    status,
                    "Rule already exists, updating"
                );
                self.broker.update_rule(&route.rule.id, &payload).await?;
                Ok(RuleStep::Updated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ActionDescriptor, RuleDescriptor};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CreateAction(String),
        UpdateAction(String, ActionPayload),
        CreateRule(String),
        UpdateRule(String),
    }

    #[derive(Default)]
    struct FakeBroker {
        deployed: Vec<RemoteAction>,
        existing_rules: Vec<String>,
        failing_actions: Vec<String>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeBroker {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrokerApi for FakeBroker {
        async fn list_actions(&self) -> Result<Vec<RemoteAction>> {
            Ok(self.deployed.clone())
        }

        async fn create_action(&self, payload: &ActionPayload) -> Result<()> {
            let name = payload.name.clone().unwrap_or_default();
            self.calls
                .lock()
                .unwrap()
                .push(Call::CreateAction(name.clone()));
            if self.failing_actions.contains(&name) {
                return Err(Error::Remote {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }

        async fn update_action(&self, name: &str, payload: &ActionPayload) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::UpdateAction(name.to_string(), payload.clone()));
            Ok(())
        }

        async fn create_rule(&self, payload: &RulePayload) -> Result<CreateOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::CreateRule(payload.id.clone()));
            if self.existing_rules.contains(&payload.id) {
                return Ok(CreateOutcome::Rejected {
                    status: 400,
                    body: "ALREADY_EXISTS".into(),
                });
            }
            Ok(CreateOutcome::Created)
        }

        async fn update_rule(&self, id: &str, _payload: &RulePayload) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::UpdateRule(id.to_string()));
            Ok(())
        }
    }

    fn route(measurement: &str, action: &str) -> CompiledRoute {
        CompiledRoute {
            measurement: measurement.into(),
            slot: "sensor_0".into(),
            action: ActionDescriptor {
                name: action.into(),
                description: format!("InfluxDB action for sensor_0 - {}", measurement),
                write_syntax: format!("{} v=${{v}}", measurement),
            },
            rule: RuleDescriptor {
                id: format!("rule_id_{}", measurement),
                name: format!("rule_{}", measurement),
                description: format!("Rule for sensor_0 - {}", measurement),
                sql: "SELECT * FROM \"t\"".into(),
                action_name: action.into(),
            },
        }
    }

    #[test]
    fn test_plan_uses_snapshot_and_provisional_set() {
        let snapshot = ActionSnapshot::new(vec![RemoteAction::new("action_a")]);
        let planned = plan(
            vec![
                route("a", "action_a"),
                route("b", "action_b"),
                route("b2", "action_b"),
            ],
            &snapshot,
        );
        let steps: Vec<_> = planned.iter().map(|p| p.action_step).collect();
        assert_eq!(
            steps,
            vec![ActionStep::Update, ActionStep::Create, ActionStep::Update]
        );
    }

    #[tokio::test]
    async fn test_existing_action_is_updated_with_copied_timestamps() {
        let mut remote = RemoteAction::new("action_a");
        remote.created_at = Some(serde_json::json!("2024-01-01T00:00:00Z"));
        remote.last_modified_at = Some(serde_json::json!("2024-02-01T00:00:00Z"));
        let broker = Arc::new(FakeBroker {
            deployed: vec![remote],
            ..Default::default()
        });

        let reconciler = Reconciler::new(broker.clone(), "Influx1", 2);
        let report = reconciler.sync(vec![route("a", "action_a")]).await.unwrap();
        assert!(report.is_complete());

        let calls = broker.calls();
        let Call::UpdateAction(name, payload) = &calls[0] else {
            panic!("expected update, got {:?}", calls);
        };
        assert_eq!(name, "action_a");
        assert!(payload.name.is_none());
        assert!(payload.action_type.is_none());
        assert_eq!(
            payload.created_at,
            Some(serde_json::json!("2024-01-01T00:00:00Z"))
        );
        assert_eq!(
            payload.last_modified_at,
            Some(serde_json::json!("2024-02-01T00:00:00Z"))
        );
    }

    #[tokio::test]
    async fn test_rejected_rule_create_falls_back_to_update() {
        let broker = Arc::new(FakeBroker {
            existing_rules: vec!["rule_id_a".into()],
            ..Default::default()
        });
        let reconciler = Reconciler::new(broker.clone(), "Influx1", 1);
        let report = reconciler.sync(vec![route("a", "action_a")]).await.unwrap();

        assert!(matches!(
            report.outcomes[0].status,
            RouteStatus::Synced {
                action: ActionStep::Create,
                rule: RuleStep::Updated
            }
        ));
        assert_eq!(
            broker.calls(),
            vec![
                Call::CreateAction("action_a".into()),
                Call::CreateRule("rule_id_a".into()),
                Call::UpdateRule("rule_id_a".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let broker = Arc::new(FakeBroker {
            failing_actions: vec!["action_b".into()],
            ..Default::default()
        });
        let reconciler = Reconciler::new(broker.clone(), "Influx1", 4);
        let report = reconciler
            .sync(vec![
                route("a", "action_a"),
                route("b", "action_b"),
                route("c", "action_c"),
            ])
            .await
            .unwrap();

        assert_eq!(report.failed(), vec!["b"]);
        assert_eq!(report.succeeded(), vec!["a", "c"]);
        assert!(!broker.calls().contains(&Call::CreateRule("rule_id_b".into())));

        match report.ensure_complete() {
            Err(Error::PartialSync { failed, succeeded }) => {
                assert_eq!(failed, vec!["b".to_string()]);
                assert_eq!(succeeded.len(), 2);
            }
            other => panic!("expected partial sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shared_action_runs_create_before_update() {
        let broker = Arc::new(FakeBroker::default());
        let reconciler = Reconciler::new(broker.clone(), "Influx1", 4);
        reconciler
            .sync(vec![route("x", "action_shared"), route("y", "action_shared")])
            .await
            .unwrap();

        let action_calls: Vec<_> = broker
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::CreateAction(_) | Call::UpdateAction(..)))
            .collect();
        assert!(matches!(&action_calls[0], Call::CreateAction(n) if n == "action_shared"));
        assert!(matches!(&action_calls[1], Call::UpdateAction(n, _) if n == "action_shared"));
    }

    #[tokio::test]
    async fn test_cancelled_sync_issues_no_requests() {
        let broker = Arc::new(FakeBroker::default());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let reconciler = Reconciler::new(broker.clone(), "Influx1", 2).with_cancel(cancel);

        let report = reconciler.sync(vec![route("a", "action_a")]).await.unwrap();
        assert!(broker.calls().is_empty());
        assert!(matches!(
            &report.outcomes[0].status,
            RouteStatus::Failed {
                error: Error::Cancelled(_),
                ..
            }
        ));
    }
}
