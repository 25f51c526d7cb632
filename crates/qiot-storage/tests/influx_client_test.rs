//! InfluxClient against an in-process mock of `/api/v2/query`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use qiot_core::Error;
use qiot_storage::{InfluxClient, SeriesQuery, TimeSeriesBackend};

#[derive(Default)]
struct Seen {
    org: Option<String>,
    auth: Option<String>,
    flux: Option<String>,
}

type Shared = Arc<Mutex<Seen>>;

const CSV: &str = "#datatype,string,long,dateTime:RFC3339,double,string\r\n\
                   ,result,table,_time,_value,_field\r\n\
                   ,_result,0,2024-05-01T10:00:00Z,21.5,value\r\n\
                   ,_result,0,2024-05-01T10:00:05Z,21.75,value\r\n";

async fn query(
    State(seen): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let flux = body["query"].as_str().map(String::from);
    {
        let mut seen = seen.lock().unwrap();
        seen.org = params.get("org").cloned();
        seen.auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        seen.flux = flux.clone();
    }
    if flux.unwrap_or_default().contains("missing_bucket") {
        return (
            StatusCode::NOT_FOUND,
            "{\"code\":\"not found\",\"message\":\"bucket not found\"}".to_string(),
        );
    }
    (StatusCode::OK, CSV.to_string())
}

async fn start_mock() -> (String, Shared) {
    let seen: Shared = Arc::new(Mutex::new(Seen::default()));
    let app = Router::new()
        .route("/api/v2/query", post(query))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen)
}

fn series_query(bucket: &str) -> SeriesQuery {
    SeriesQuery {
        bucket: bucket.to_string(),
        experiment_id: "6500000000000000000000aa".to_string(),
        device_address: "AA:BB:CC:DD:EE:FF".to_string(),
        measurement: "temp01_airtemperature".to_string(),
        field: "value".to_string(),
        window_secs: 5,
    }
}

#[tokio::test]
async fn test_query_round_trip() {
    let (base, seen) = start_mock().await;
    let client = InfluxClient::new(&base, "tok", "003e6c7c0dc0eb8b", Duration::from_secs(5));

    let series = client.query(&series_query("iotproject_bucket")).await.unwrap();
    assert_eq!(series.values, vec![21.5, 21.75]);
    assert_eq!(series.timestamps[1], "2024-05-01T10:00:05Z");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.org.as_deref(), Some("003e6c7c0dc0eb8b"));
    assert_eq!(seen.auth.as_deref(), Some("Token tok"));
    let flux = seen.flux.as_deref().unwrap();
    assert!(flux.starts_with("from(bucket: \"iotproject_bucket\")"));
    assert!(flux.contains("r[\"deviceAddress\"] == \"AA:BB:CC:DD:EE:FF\""));
    assert!(flux.contains("r[\"_field\"] == \"value\""));
}

#[tokio::test]
async fn test_non_success_status_is_remote_error() {
    let (base, _seen) = start_mock().await;
    let client = InfluxClient::new(&base, "tok", "org", Duration::from_secs(5));

    let err = client
        .query(&series_query("missing_bucket"))
        .await
        .unwrap_err();
    match err {
        Error::Remote { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("bucket not found"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}
