//! Shipper diagnostics reach the self-log file.

use async_trait::async_trait;
use durable_shipper::{BatchTransport, Event, LogShipper, SendOutcome, ShipperConfig};
use observability::LogConfig;
use serde_json::Value;
use std::sync::Arc;
use tempfile::tempdir;

struct AlwaysBusy;

#[async_trait]
impl BatchTransport for AlwaysBusy {
    async fn send(&self, _events: &[Event]) -> SendOutcome {
        SendOutcome::transient("503", "Service Unavailable")
    }
}

#[tokio::test]
async fn test_dropped_records_and_failures_are_self_logged() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("logs").join("selflog.jsonl");
    let subscriber = observability::subscriber(&LogConfig {
        service_name: "shipper-test".into(),
        default_level: "debug".into(),
        log_path: Some(log_path.clone()),
        also_stderr: false,
    })
    .unwrap();
    let _guard = tracing::subscriber::set_default(subscriber);

    std::fs::write(
        dir.path().join("app-1.json"),
        "{\"id\":1}\nthis is not json\n",
    )
    .unwrap();

    let shipper = LogShipper::new(
        ShipperConfig::new(dir.path().join("app")),
        Arc::new(AlwaysBusy),
        None,
    )
    .unwrap();
    shipper.tick().await;

    let lines: Vec<Value> = std::fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let dropped = lines
        .iter()
        .find(|line| line["message"] == "Unable to parse event JSON, event will be dropped")
        .expect("dropped record is logged");
    assert_eq!(dropped["level"], "WARN");
    assert_eq!(dropped["service"], "shipper-test");
    assert_eq!(dropped["fields"]["offset"], 9);
    assert_eq!(dropped["fields"]["data"], "this is not json");

    let failure = lines
        .iter()
        .find(|line| line["message"] == "Batch delivery failed, will retry")
        .expect("transient failure is logged");
    assert_eq!(failure["fields"]["code"], "503");
    assert_eq!(failure["fields"]["reason"], "Service Unavailable");
    assert_eq!(failure["fields"]["next_interval_ms"], 10_000);
}

struct AlwaysRejects;

#[async_trait]
impl BatchTransport for AlwaysRejects {
    async fn send(&self, _events: &[Event]) -> SendOutcome {
        SendOutcome::rejected("400", "Bad Request")
    }
}

#[tokio::test]
async fn test_rejection_reason_does_not_replace_log_message() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("selflog.jsonl");
    let subscriber = observability::subscriber(&LogConfig {
        service_name: "shipper-test".into(),
        default_level: "info".into(),
        log_path: Some(log_path.clone()),
        also_stderr: false,
    })
    .unwrap();
    let _guard = tracing::subscriber::set_default(subscriber);

    std::fs::write(dir.path().join("app-1.json"), "{\"id\":1}\n").unwrap();
    let shipper = LogShipper::new(
        ShipperConfig::new(dir.path().join("app")),
        Arc::new(AlwaysRejects),
        None,
    )
    .unwrap();
    shipper.tick().await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    let rejected: Value = content
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .find(|line| line["fields"]["code"] == "400" && line["level"] == "WARN")
        .expect("rejection is logged");
    assert_eq!(
        rejected["message"],
        "Batch permanently rejected, moving it to a dead-letter file"
    );
    assert_eq!(rejected["fields"]["reason"], "Bad Request");
}
