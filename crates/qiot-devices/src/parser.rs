//! Parser variants and dispatch.
//!
//! A characteristic or whiteboard measure declares how its MQTT payload is
//! decoded through exactly one of four parser shapes. [`dispatch`] turns the
//! chosen shape into the selection, tag and field fragments a broker rule and
//! its InfluxDB action are built from.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Field;

/// Alias bound to each array element by `FOREACH`.
pub const ARRAY_ALIAS: &str = "sample_item";
/// Gateway battery level, written alongside every struct and JSON payload.
pub const GATEWAY_BATTERY: &str = "gatewayBattery";
/// Signal strength reported by the gateway for struct payloads.
pub const RSSI: &str = "rssi";

/// Gateway telemetry fields. They are written by broker rules but never
/// queried by dashboards.
pub const GATEWAY_FIELDS: [&str; 2] = [GATEWAY_BATTERY, RSSI];

/// Tag keys carried by every payload, in write order.
const DEVICE_TAGS: [&str; 3] = ["deviceAddress", "deviceName", "gatewayName"];

/// Binary struct decoded by the gateway into flat payload keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructParser {
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// JSON object payload; fields are picked by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonPayloadParser {
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Evaluate paths with `jq` instead of dotted access.
    #[serde(default)]
    pub use_jq: bool,
}

/// JSON payload holding an array of samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonArrayParser {
    #[serde(rename = "arrayPath", default)]
    pub array_path: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// The four optional parser keys of a stored characteristic or measure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserSlots {
    #[serde(rename = "structParser", default, skip_serializing_if = "Option::is_none")]
    pub struct_parser: Option<StructParser>,
    #[serde(
        rename = "jsonPayloadParser",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub json_payload_parser: Option<JsonPayloadParser>,
    #[serde(
        rename = "jsonArrayParser",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub json_array_parser: Option<JsonArrayParser>,
    #[serde(
        rename = "SingleMeasurementParser",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub single_measurement_parser: Option<Vec<Field>>,
}

impl ParserSlots {
    /// The parser variant in effect.
    ///
    /// When several keys are present the first of struct, JSON payload,
    /// JSON array, single measurement wins.
    pub fn variant(&self) -> Option<ParserVariant<'_>> {
        let mut present = [
            self.struct_parser.as_ref().map(ParserVariant::Struct),
            self.json_payload_parser
                .as_ref()
                .map(ParserVariant::JsonPayload),
            self.json_array_parser.as_ref().map(ParserVariant::JsonArray),
            self.single_measurement_parser
                .as_deref()
                .map(ParserVariant::Single),
        ]
        .into_iter()
        .flatten();

        let chosen = present.next()?;
        let ignored: Vec<&str> = present.map(|v| v.kind().as_str()).collect();
        if !ignored.is_empty() {
            warn!(
                chosen = chosen.kind().as_str(),
                ignored = ?ignored,
                "Multiple parser variants declared"
            );
        }
        Some(chosen)
    }
}

/// Discriminant of [`ParserVariant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Struct,
    JsonPayload,
    JsonArray,
    Single,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Struct => "structParser",
            ParserKind::JsonPayload => "jsonPayloadParser",
            ParserKind::JsonArray => "jsonArrayParser",
            ParserKind::Single => "SingleMeasurementParser",
        }
    }
}

/// A resolved parser definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserVariant<'a> {
    Struct(&'a StructParser),
    JsonPayload(&'a JsonPayloadParser),
    JsonArray(&'a JsonArrayParser),
    Single(&'a [Field]),
}

impl<'a> ParserVariant<'a> {
    pub fn kind(&self) -> ParserKind {
        match self {
            ParserVariant::Struct(_) => ParserKind::Struct,
            ParserVariant::JsonPayload(_) => ParserKind::JsonPayload,
            ParserVariant::JsonArray(_) => ParserKind::JsonArray,
            ParserVariant::Single(_) => ParserKind::Single,
        }
    }

    /// Fields declared by the document, without gateway telemetry.
    pub fn fields(&self) -> &'a [Field] {
        match self {
            ParserVariant::Struct(p) => &p.fields,
            ParserVariant::JsonPayload(p) => &p.fields,
            ParserVariant::JsonArray(p) => &p.fields,
            ParserVariant::Single(fields) => fields,
        }
    }

    /// Why this parser cannot produce a valid rule, if it cannot.
    ///
    /// Struct and JSON payload parsers always write gateway telemetry, so
    /// only the array and single variants can end up without a field set.
    pub fn defect(&self) -> Option<&'static str> {
        match self {
            ParserVariant::JsonArray(p) if p.array_path.trim().is_empty() => {
                Some("empty array path")
            }
            ParserVariant::JsonArray(p) if p.fields.is_empty() => Some("no fields"),
            ParserVariant::Single(fields) if fields.is_empty() => Some("no fields"),
            _ => None,
        }
    }
}

/// `<expr> as <alias>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub expr: String,
    pub alias: String,
}

impl Projection {
    pub fn new(expr: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as {}", self.expr, self.alias)
    }
}

/// What a broker rule selects from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// `SELECT *`
    Wildcard,
    /// `SELECT <projections>`
    Projections(Vec<Projection>),
    /// `FOREACH <source> as <alias> DO <projections>`
    ForEach {
        source: String,
        alias: String,
        projections: Vec<Projection>,
    },
}

impl Selection {
    /// Render the selection clause for `topic`.
    pub fn to_sql(&self, topic: &str) -> String {
        match self {
            Selection::Wildcard => format!("SELECT * FROM \"{}\"", topic),
            Selection::Projections(projections) => {
                format!("SELECT {} FROM \"{}\"", join(projections), topic)
            }
            Selection::ForEach {
                source,
                alias,
                projections,
            } => format!(
                "FOREACH {} as {} DO {} FROM \"{}\"",
                source,
                alias,
                join(projections),
                topic
            ),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<key>=<value>` in InfluxDB line-protocol template syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub key: String,
    /// Template placeholder such as `${payload.value}`.
    pub value: String,
    /// Written with the `i` integer suffix.
    pub integer: bool,
}

impl Assignment {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            integer: false,
        }
    }

    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}{}",
            self.key,
            self.value,
            if self.integer { "i" } else { "" }
        )
    }
}

/// Rule and action fragments for one parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub kind: ParserKind,
    pub selection: Selection,
    /// Device tags, excluding the experiment tag.
    pub tags: Vec<Assignment>,
    /// Field writes, gateway telemetry included.
    pub fields: Vec<Assignment>,
}

/// Build the selection and write fragments for `variant`.
pub fn dispatch(variant: ParserVariant<'_>) -> Dispatched {
    match variant {
        ParserVariant::Struct(parser) => dispatch_struct(parser),
        ParserVariant::JsonPayload(parser) => {
            let gateway = Field::new(GATEWAY_BATTERY)
                .with_path(GATEWAY_BATTERY)
                .integer();
            let fields: Vec<&Field> = parser.fields.iter().chain([&gateway]).collect();
            let projections = fields
                .iter()
                .map(|f| payload_projection(f, parser.use_jq))
                .collect();
            dispatch_json(
                ParserKind::JsonPayload,
                fields,
                Selection::Projections,
                projections,
            )
        }
        ParserVariant::JsonArray(parser) => {
            let fields: Vec<&Field> = parser.fields.iter().collect();
            let projections = fields.iter().map(|f| array_projection(f)).collect();
            let source = format!("payload.{}", parser.array_path);
            dispatch_json(
                ParserKind::JsonArray,
                fields,
                move |p| Selection::ForEach {
                    source,
                    alias: ARRAY_ALIAS.to_string(),
                    projections: p,
                },
                projections,
            )
        }
        ParserVariant::Single(fields) => {
            let fields: Vec<&Field> = fields.iter().collect();
            let projections = fields.iter().map(|f| payload_projection(f, false)).collect();
            dispatch_json(ParserKind::Single, fields, Selection::Projections, projections)
        }
    }
}

fn dispatch_struct(parser: &StructParser) -> Dispatched {
    let fields = parser
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .chain(GATEWAY_FIELDS)
        .map(|name| Assignment::new(name, format!("${{payload.{}}}", name)).integer())
        .collect();

    let tags = std::iter::once(Assignment::new("appTagName", "${payload.APP_TAG_NAME}"))
        .chain(
            DEVICE_TAGS
                .iter()
                .map(|tag| Assignment::new(*tag, format!("${{payload.{}}}", tag))),
        )
        .collect();

    Dispatched {
        kind: ParserKind::Struct,
        selection: Selection::Wildcard,
        tags,
        fields,
    }
}

/// Shared tail of the JSON variants: field projections come first, then the
/// device tag projections; writes reference the projected aliases.
fn dispatch_json<F>(
    kind: ParserKind,
    fields: Vec<&Field>,
    wrap: F,
    mut projections: Vec<Projection>,
) -> Dispatched
where
    F: FnOnce(Vec<Projection>) -> Selection,
{
    projections.extend(
        DEVICE_TAGS
            .iter()
            .map(|tag| Projection::new(format!("payload.{}", tag), *tag)),
    );

    let writes = fields
        .iter()
        .map(|f| {
            let a = Assignment::new(f.name.as_str(), format!("${{{}}}", f.name));
            if f.is_integer() {
                a.integer()
            } else {
                a
            }
        })
        .collect();

    let tags = DEVICE_TAGS
        .iter()
        .map(|tag| Assignment::new(*tag, format!("${{{}}}", tag)))
        .collect();

    Dispatched {
        kind,
        selection: wrap(projections),
        tags,
        fields: writes,
    }
}

fn payload_projection(field: &Field, use_jq: bool) -> Projection {
    let expr = match field.path() {
        Some(path) if use_jq => format!("first(jq('.{}', payload))", path),
        Some(path) => format!("payload.{}", path),
        None => "payload".to_string(),
    };
    Projection::new(expr, field.name.as_str())
}

fn array_projection(field: &Field) -> Projection {
    let expr = match field.path() {
        Some(path) => format!("{}.{}", ARRAY_ALIAS, path),
        None => ARRAY_ALIAS.to_string(),
    };
    Projection::new(expr, field.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(fragments: &[Assignment]) -> String {
        fragments
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn test_struct_dispatch() {
        let parser = StructParser {
            fields: vec![Field::new("value")],
        };
        let d = dispatch(ParserVariant::Struct(&parser));

        assert_eq!(d.selection, Selection::Wildcard);
        assert_eq!(
            render(&d.fields),
            "value=${payload.value}i,gatewayBattery=${payload.gatewayBattery}i,rssi=${payload.rssi}i"
        );
        assert_eq!(
            render(&d.tags),
            "appTagName=${payload.APP_TAG_NAME},deviceAddress=${payload.deviceAddress},\
             deviceName=${payload.deviceName},gatewayName=${payload.gatewayName}"
        );
    }

    #[test]
    fn test_json_payload_dispatch_with_jq() {
        let parser = JsonPayloadParser {
            fields: vec![
                Field::new("hr").with_path("data.hr").integer(),
                Field::new("raw"),
            ],
            use_jq: true,
        };
        let d = dispatch(ParserVariant::JsonPayload(&parser));

        assert_eq!(
            d.selection.to_sql("ms/hr"),
            "SELECT first(jq('.data.hr', payload)) as hr, payload as raw, \
             first(jq('.gatewayBattery', payload)) as gatewayBattery, \
             payload.deviceAddress as deviceAddress, payload.deviceName as deviceName, \
             payload.gatewayName as gatewayName FROM \"ms/hr\""
        );
        assert_eq!(
            render(&d.fields),
            "hr=${hr}i,raw=${raw},gatewayBattery=${gatewayBattery}i"
        );
    }

    #[test]
    fn test_json_payload_dotted_paths() {
        let parser = JsonPayloadParser {
            fields: vec![Field::new("t").with_path("temp")],
            use_jq: false,
        };
        let d = dispatch(ParserVariant::JsonPayload(&parser));
        let sql = d.selection.to_sql("x");
        assert!(sql.starts_with("SELECT payload.temp as t, payload.gatewayBattery as gatewayBattery"));
    }

    #[test]
    fn test_json_array_dispatch() {
        let parser = JsonArrayParser {
            array_path: "readings".to_string(),
            fields: vec![Field::new("temp").with_path("t").integer()],
        };
        let d = dispatch(ParserVariant::JsonArray(&parser));
        let sql = d.selection.to_sql("ms/temp");

        assert!(sql.contains("FOREACH payload.readings as sample_item DO sample_item.t as temp"));
        assert!(sql.ends_with("payload.gatewayName as gatewayName FROM \"ms/temp\""));
        assert_eq!(render(&d.fields), "temp=${temp}i");
        assert_eq!(
            render(&d.tags),
            "deviceAddress=${deviceAddress},deviceName=${deviceName},gatewayName=${gatewayName}"
        );
    }

    #[test]
    fn test_single_measurement_dispatch() {
        let fields = vec![Field::new("level"), Field::new("x").with_path("acc.x")];
        let d = dispatch(ParserVariant::Single(&fields));
        assert_eq!(d.kind, ParserKind::Single);
        assert_eq!(
            d.selection,
            Selection::Projections(vec![
                Projection::new("payload", "level"),
                Projection::new("payload.acc.x", "x"),
                Projection::new("payload.deviceAddress", "deviceAddress"),
                Projection::new("payload.deviceName", "deviceName"),
                Projection::new("payload.gatewayName", "gatewayName"),
            ])
        );
        assert_eq!(render(&d.fields), "level=${level},x=${x}");
    }

    #[test]
    fn test_degenerate_parsers_have_defects() {
        let no_path = JsonArrayParser {
            array_path: " ".to_string(),
            fields: vec![Field::new("x")],
        };
        let no_fields = JsonArrayParser {
            array_path: "samples".to_string(),
            fields: Vec::new(),
        };
        assert_eq!(ParserVariant::JsonArray(&no_path).defect(), Some("empty array path"));
        assert_eq!(ParserVariant::JsonArray(&no_fields).defect(), Some("no fields"));
        assert_eq!(ParserVariant::Single(&[]).defect(), Some("no fields"));

        // Gateway telemetry keeps these writable without declared fields.
        assert_eq!(ParserVariant::Struct(&StructParser::default()).defect(), None);
        assert_eq!(
            ParserVariant::JsonPayload(&JsonPayloadParser::default()).defect(),
            None
        );
    }

    #[test]
    fn test_variant_precedence() {
        let slots = ParserSlots {
            single_measurement_parser: Some(vec![Field::new("a")]),
            json_array_parser: Some(JsonArrayParser::default()),
            ..Default::default()
        };
        assert_eq!(slots.variant().map(|v| v.kind()), Some(ParserKind::JsonArray));
        assert!(ParserSlots::default().variant().is_none());
    }

    #[test]
    fn test_slots_deserialize_from_document_keys() {
        let slots: ParserSlots = serde_json::from_value(serde_json::json!({
            "SingleMeasurementParser": [{ "name": "v", "type": "integer" }]
        }))
        .unwrap();
        let variant = slots.variant().unwrap();
        assert_eq!(variant.kind(), ParserKind::Single);
        assert!(variant.fields()[0].is_integer());
    }
}
