//! InfluxDB v2 query client.
//!
//! Queries are written in Flux and sent to `/api/v2/query`; results come
//! back as annotated CSV and are reduced to `(timestamp, value)` pairs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use qiot_core::{Error, InfluxConfig, Result};

use crate::timeseries::{SeriesQuery, TimeSeries, TimeSeriesBackend};

/// HTTP client for the InfluxDB v2 query API.
#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: Client,
    url: String,
    token: String,
    org: String,
    timeout: Duration,
}

impl InfluxClient {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
            timeout,
        }
    }

    /// Build a client from configuration; URL and token are mandatory.
    pub fn from_config(config: &InfluxConfig) -> Result<Self> {
        let (url, token) = config.target()?;
        Ok(Self::new(
            url,
            token,
            config.org.as_str(),
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

/// Escape a string for use inside a Flux string literal.
fn escape_flux(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Flux text for `query`. The `_field` filter is only added for a non-empty
/// field.
pub fn flux_query(query: &SeriesQuery) -> String {
    let mut flux = format!(
        "from(bucket: \"{}\")\n  |> range(start: -{}s)\n  |> filter(fn: (r) => r[\"experimentId\"] == \"{}\")\n  |> filter(fn: (r) => r[\"deviceAddress\"] == \"{}\")\n  |> filter(fn: (r) => r[\"_measurement\"] == \"{}\")",
        escape_flux(&query.bucket),
        query.window_secs,
        escape_flux(&query.experiment_id),
        escape_flux(&query.device_address),
        escape_flux(&query.measurement),
    );
    if !query.field.trim().is_empty() {
        flux.push_str(&format!(
            "\n  |> filter(fn: (r) => r[\"_field\"] == \"{}\")",
            escape_flux(&query.field)
        ));
    }
    flux
}

/// Split one CSV record, honouring double-quoted cells.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

/// Reduce an annotated CSV response to a series.
///
/// Each table starts with a `#datatype` annotation row followed by a header.
/// `double` and `long` values are kept, other value types are skipped.
pub fn parse_annotated_csv(body: &str) -> Result<TimeSeries> {
    let mut series = TimeSeries::default();
    let mut datatypes: Vec<String> = Vec::new();
    let mut columns: Option<HashMap<String, usize>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            datatypes.clear();
            columns = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("#datatype,") {
            datatypes = split_csv_line(rest);
            // The annotation row has no leading empty cell.
            datatypes.insert(0, String::new());
            columns = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let cells = split_csv_line(line);
        if columns.is_none() {
            columns = Some(
                cells
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.clone(), i))
                    .collect(),
            );
            continue;
        }
        let Some(cols) = columns.as_ref() else {
            continue;
        };

        if let Some(&i) = cols.get("error") {
            let message = cells.get(i).cloned().unwrap_or_default();
            return Err(Error::Remote {
                status: 200,
                body: message,
            });
        }

        let (Some(&ti), Some(&vi)) = (cols.get("_time"), cols.get("_value")) else {
            continue;
        };
        let (Some(time), Some(raw)) = (cells.get(ti), cells.get(vi)) else {
            continue;
        };
        let value = match datatypes.get(vi).map(String::as_str) {
            Some("double") => raw.parse::<f64>().ok(),
            Some("long") => raw.parse::<i64>().ok().map(|v| v as f64),
            _ => None,
        };
        let Some(value) = value else {
            continue;
        };
        let timestamp = match DateTime::parse_from_rfc3339(time) {
            Ok(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            Err(_) => time.clone(),
        };
        series.push(timestamp, value);
    }
    Ok(series)
}

#[async_trait]
impl TimeSeriesBackend for InfluxClient {
    async fn query(&self, query: &SeriesQuery) -> Result<TimeSeries> {
        let flux = flux_query(query);
        let url = format!(
            "{}/api/v2/query?org={}",
            self.url,
            urlencoding::encode(&self.org)
        );
        debug!(category = "influx", query = %flux, "Executing Flux query");

        let body = json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "annotations": ["datatype"],
                "header": true,
                "delimiter": ","
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(category = "influx", url = %url, error = %e, "Query request failed");
                if e.is_timeout() {
                    Error::Timeout(format!("InfluxDB query {}", query.measurement))
                } else {
                    Error::Transport(format!("InfluxDB query failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read InfluxDB response: {}", e)))?;

        if !status.is_success() {
            warn!(
                category = "influx",
                status = status.as_u16(),
                body = %text,
                "InfluxDB rejected query"
            );
            return Err(Error::Remote {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_annotated_csv(&text)
    }
}
