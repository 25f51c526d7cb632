//! Rule compiler.
//!
//! Every measurement source becomes one InfluxDB action (how to write) and
//! one broker rule (what to select and which action to feed). Compilation is
//! pure; nothing here talks to the broker.

use serde::Serialize;

use qiot_core::{NamingConfig, NamingScope};
use qiot_devices::{sources, CompleteExperiment, MeasurementSource, SourceBranch};

/// Per-branch scope of generated resource names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingPolicy {
    pub structured: NamingScope,
    pub whiteboard: NamingScope,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            structured: NamingScope::Experiment,
            whiteboard: NamingScope::Global,
        }
    }
}

impl From<&NamingConfig> for NamingPolicy {
    fn from(config: &NamingConfig) -> Self {
        Self {
            structured: config.structured_scope,
            whiteboard: config.whiteboard_scope,
        }
    }
}

impl NamingPolicy {
    pub fn scope_for(&self, branch: &SourceBranch<'_>) -> NamingScope {
        match branch {
            SourceBranch::Structured { .. } => self.structured,
            SourceBranch::Whiteboard => self.whiteboard,
        }
    }
}

/// An InfluxDB action definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub write_syntax: String,
}

/// A broker rule definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub sql: String,
    /// Name of the action the rule forwards to.
    pub action_name: String,
}

/// Action and rule compiled from one measurement source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRoute {
    pub measurement: String,
    pub slot: String,
    pub action: ActionDescriptor,
    pub rule: RuleDescriptor,
}

/// Compile a single source.
///
/// An empty `experiment_id` drops the `experimentId` tag and the name suffix.
pub fn compile_source(
    source: &MeasurementSource<'_>,
    experiment_id: &str,
    policy: &NamingPolicy,
) -> CompiledRoute {
    let dispatched = source.dispatch();

    let mut series = source.measurement.clone();
    if !experiment_id.is_empty() {
        series.push_str(&format!(",experimentId={}", experiment_id));
    }
    for tag in &dispatched.tags {
        series.push(',');
        series.push_str(&tag.to_string());
    }
    let fields = dispatched
        .fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let write_syntax = format!("{} {}", series, fields);

    let suffix = match policy.scope_for(&source.branch) {
        NamingScope::Experiment if !experiment_id.is_empty() => format!("_{}", experiment_id),
        _ => String::new(),
    };
    let action_name = format!("action_{}{}", source.measurement, suffix);
    let slot = source.slot();

    CompiledRoute {
        measurement: source.measurement.clone(),
        slot: slot.to_string(),
        action: ActionDescriptor {
            name: action_name.clone(),
            description: format!("InfluxDB action for {} - {}", slot, source.name),
            write_syntax,
        },
        rule: RuleDescriptor {
            id: format!("rule_id_{}{}", source.measurement, suffix),
            name: format!("rule_{}{}", source.measurement, suffix),
            description: format!("Rule for {} - {}", slot, source.name),
            sql: dispatched.selection.to_sql(source.topic),
            action_name,
        },
    }
}

/// Compile every source of an experiment, in walk order.
pub fn compile(experiment: &CompleteExperiment, policy: &NamingPolicy) -> Vec<CompiledRoute> {
    sources(experiment)
        .map(|source| compile_source(&source, &experiment.id, policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qiot_devices::{
        Characteristic, CompleteDevice, Field, ParserSlots, Service, WhiteboardMeasure,
    };
    use qiot_devices::parser::{JsonArrayParser, StructParser};

    fn experiment() -> CompleteExperiment {
        CompleteExperiment {
            id: "exp1".into(),
            description: String::new(),
            devices: vec![CompleteDevice {
                slot: "sensor_0".into(),
                sensor_id: "s".into(),
                name: "Thermo".into(),
                short_name: "Temp-01".into(),
                address: "AA:BB".into(),
                services: vec![Service {
                    uuid: "svc".into(),
                    characteristics: vec![Characteristic {
                        name: "Air Temperature".into(),
                        uuid: "c".into(),
                        parsers: ParserSlots {
                            struct_parser: Some(StructParser {
                                fields: vec![Field::new("value")],
                            }),
                            ..Default::default()
                        },
                        mqtt_topic: Some("qiot/exp1/Thermo/aabb/airtemperature".into()),
                    }],
                }],
                whiteboard: vec![WhiteboardMeasure {
                    name: "Temp Array".into(),
                    mqtt_topic: "ms/temp".into(),
                    parsers: ParserSlots {
                        json_array_parser: Some(JsonArrayParser {
                            array_path: "readings".into(),
                            fields: vec![Field::new("temp").with_path("t").integer()],
                        }),
                        ..Default::default()
                    },
                }],
            }],
        }
    }

    #[test]
    fn test_struct_route() {
        let routes = compile(&experiment(), &NamingPolicy::default());
        let route = &routes[0];

        assert_eq!(route.measurement, "temp01_airtemperature");
        assert_eq!(route.action.name, "action_temp01_airtemperature_exp1");
        assert_eq!(route.rule.name, "rule_temp01_airtemperature_exp1");
        assert_eq!(route.rule.id, "rule_id_temp01_airtemperature_exp1");
        assert_eq!(route.rule.action_name, route.action.name);
        assert_eq!(
            route.rule.sql,
            "SELECT * FROM \"qiot/exp1/Thermo/aabb/airtemperature\""
        );
        assert_eq!(
            route.action.write_syntax,
            "temp01_airtemperature,experimentId=exp1,appTagName=${payload.APP_TAG_NAME},\
             deviceAddress=${payload.deviceAddress},deviceName=${payload.deviceName},\
             gatewayName=${payload.gatewayName} \
             value=${payload.value}i,gatewayBattery=${payload.gatewayBattery}i,rssi=${payload.rssi}i"
        );
        assert_eq!(
            route.action.description,
            "InfluxDB action for sensor_0 - Air Temperature"
        );
        assert_eq!(route.rule.description, "Rule for sensor_0 - Air Temperature");
    }

    #[test]
    fn test_whiteboard_route_is_global_by_default() {
        let routes = compile(&experiment(), &NamingPolicy::default());
        let route = &routes[1];

        assert_eq!(route.action.name, "action_temp01_temparray");
        assert_eq!(route.rule.id, "rule_id_temp01_temparray");
        assert!(route
            .rule
            .sql
            .starts_with("FOREACH payload.readings as sample_item DO sample_item.t as temp"));
        assert!(route.action.write_syntax.contains(",experimentId=exp1,"));
        assert!(route.action.write_syntax.ends_with(" temp=${temp}i"));
    }

    #[test]
    fn test_scoped_whiteboard_policy() {
        let policy = NamingPolicy {
            structured: NamingScope::Global,
            whiteboard: NamingScope::Experiment,
        };
        let routes = compile(&experiment(), &policy);
        assert_eq!(routes[0].action.name, "action_temp01_airtemperature");
        assert_eq!(routes[1].action.name, "action_temp01_temparray_exp1");
    }

    #[test]
    fn test_unknown_experiment_id_omits_tag_and_suffix() {
        let mut exp = experiment();
        exp.id.clear();
        let routes = compile(&exp, &NamingPolicy::default());
        assert_eq!(routes[0].action.name, "action_temp01_airtemperature");
        assert!(routes[0]
            .action
            .write_syntax
            .starts_with("temp01_airtemperature,appTagName="));
    }

    #[test]
    fn test_degenerate_array_parser_gets_no_route() {
        let mut exp = experiment();
        let measure = &mut exp.devices[0].whiteboard[0];
        if let Some(parser) = measure.parsers.json_array_parser.as_mut() {
            parser.array_path.clear();
        }
        let routes = compile(&exp, &NamingPolicy::default());
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].measurement, "temp01_airtemperature");
        assert!(routes.iter().all(|r| !r.rule.sql.contains("payload. as")));
    }
}
