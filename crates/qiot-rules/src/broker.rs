//! Broker management API.
//!
//! [`BrokerApi`] is the seam between the reconciler and the EMQX REST API;
//! tests substitute a recording fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use qiot_core::Result;

use crate::compiler::{ActionDescriptor, RuleDescriptor};

/// Action type of every generated action.
pub const ACTION_TYPE: &str = "influxdb";
/// Timestamp precision of written points.
pub const PRECISION: &str = "ms";
/// Connector health check interval.
pub const HEALTH_CHECK_INTERVAL: &str = "30s";

/// An action as listed by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAction {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<Value>,
}

impl RemoteAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action_type: Some(ACTION_TYPE.to_string()),
            created_at: None,
            last_modified_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParameters {
    pub precision: String,
    pub write_syntax: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOpts {
    pub health_check_interval: String,
}

/// Request body for creating or updating an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub connector: String,
    pub description: String,
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parameters: ActionParameters,
    pub resource_opts: ResourceOpts,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<Value>,
}

impl ActionPayload {
    /// Body for `POST /api/v5/actions`.
    pub fn create(action: &ActionDescriptor, connector: &str) -> Self {
        Self {
            connector: connector.to_string(),
            description: action.description.clone(),
            enable: true,
            name: Some(action.name.clone()),
            parameters: ActionParameters {
                precision: PRECISION.to_string(),
                write_syntax: action.write_syntax.clone(),
            },
            resource_opts: ResourceOpts {
                health_check_interval: HEALTH_CHECK_INTERVAL.to_string(),
            },
            action_type: Some(ACTION_TYPE.to_string()),
            created_at: None,
            last_modified_at: None,
        }
    }

    /// Body for `PUT /api/v5/actions/influxdb:<name>`: no `name` or `type`,
    /// timestamps copied from the deployed action.
    pub fn update(action: &ActionDescriptor, connector: &str, remote: Option<&RemoteAction>) -> Self {
        let mut payload = Self::create(action, connector);
        payload.name = None;
        payload.action_type = None;
        if let Some(remote) = remote {
            payload.created_at = remote.created_at.clone();
            payload.last_modified_at = remote.last_modified_at.clone();
        }
        payload
    }
}

/// Request body for creating or updating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePayload {
    pub sql: String,
    pub actions: Vec<String>,
    pub description: String,
    pub enable: bool,
    pub metadata: Map<String, Value>,
    pub id: String,
    pub name: String,
}

impl From<&RuleDescriptor> for RulePayload {
    fn from(rule: &RuleDescriptor) -> Self {
        Self {
            sql: rule.sql.clone(),
            actions: vec![format!("{}:{}", ACTION_TYPE, rule.action_name)],
            description: rule.description.clone(),
            enable: true,
            metadata: Map::new(),
            id: rule.id.clone(),
            name: rule.name.clone(),
        }
    }
}

/// Result of a rule creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The broker answered `201 Created`.
    Created,
    /// Any other status; the rule is assumed to exist.
    Rejected { status: u16, body: String },
}

/// EMQX v5 management operations used by the reconciler.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// List deployed actions.
    async fn list_actions(&self) -> Result<Vec<RemoteAction>>;

    /// Create an action; fails unless the broker answers 2xx.
    async fn create_action(&self, payload: &ActionPayload) -> Result<()>;

    /// Replace the action named `name`; fails unless the broker answers 2xx.
    async fn update_action(&self, name: &str, payload: &ActionPayload) -> Result<()>;

    /// Try to create a rule. Non-201 answers are not errors.
    async fn create_rule(&self, payload: &RulePayload) -> Result<CreateOutcome>;

    /// Replace the rule with `id`; fails unless the broker answers 2xx.
    async fn update_rule(&self, id: &str, payload: &RulePayload) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action() -> ActionDescriptor {
        ActionDescriptor {
            name: "action_t_x".into(),
            description: "InfluxDB action for sensor_0 - X".into(),
            write_syntax: "t_x v=${v}".into(),
        }
    }

    #[test]
    fn test_create_payload_shape() {
        let value = serde_json::to_value(ActionPayload::create(&action(), "Influx1")).unwrap();
        assert_eq!(
            value,
            json!({
                "connector": "Influx1",
                "description": "InfluxDB action for sensor_0 - X",
                "enable": true,
                "name": "action_t_x",
                "parameters": { "precision": "ms", "write_syntax": "t_x v=${v}" },
                "resource_opts": { "health_check_interval": "30s" },
                "type": "influxdb"
            })
        );
    }

    #[test]
    fn test_update_payload_drops_identity_and_keeps_timestamps() {
        let remote = RemoteAction {
            name: "action_t_x".into(),
            action_type: Some("influxdb".into()),
            created_at: Some(json!("2024-05-01T10:00:00.000+00:00")),
            last_modified_at: Some(json!(1714557600000u64)),
        };
        let value =
            serde_json::to_value(ActionPayload::update(&action(), "Influx1", Some(&remote)))
                .unwrap();

        assert!(value.get("name").is_none());
        assert!(value.get("type").is_none());
        assert_eq!(value["created_at"], "2024-05-01T10:00:00.000+00:00");
        assert_eq!(value["last_modified_at"], 1714557600000u64);
        assert_eq!(value["parameters"]["write_syntax"], "t_x v=${v}");
    }

    #[test]
    fn test_rule_payload_links_action() {
        let rule = RuleDescriptor {
            id: "rule_id_t_x".into(),
            name: "rule_t_x".into(),
            description: "Rule for sensor_0 - X".into(),
            sql: "SELECT * FROM \"t\"".into(),
            action_name: "action_t_x".into(),
        };
        let value = serde_json::to_value(RulePayload::from(&rule)).unwrap();
        assert_eq!(value["actions"], json!(["influxdb:action_t_x"]));
        assert_eq!(value["metadata"], json!({}));
        assert_eq!(value["enable"], true);
    }

    #[test]
    fn test_remote_action_ignores_unknown_keys() {
        let remote: RemoteAction = serde_json::from_value(json!({
            "name": "a", "type": "influxdb", "enable": true,
            "status": "connected", "created_at": 1
        }))
        .unwrap();
        assert_eq!(remote.created_at, Some(json!(1)));
        assert!(remote.last_modified_at.is_none());
    }
}
