//! Integration tests for the submission API.

use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::Namespace;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{ActivityOptions, InMemoryBank};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, InMemoryBank) {
    let bank = InMemoryBank::with_sample_accounts();
    let engine =
        worker::create_default_engine(Namespace::default(), bank.clone(), ActivityOptions::default())
            .unwrap();
    (worker::create_app(engine, get_metrics_handle()), bank)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&body).into_owned())
        })
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn transfer(workflow_id: &str, target: &str, amount: u64) -> serde_json::Value {
    serde_json::json!({
        "workflow_id": workflow_id,
        "source_account": "85-150",
        "target_account": target,
        "amount": amount,
        "reference_id": "12345",
    })
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["namespace"], "default");
    assert_eq!(json["task_queue"], "TRANSFER_MONEY_TASK_QUEUE");
}

#[tokio::test]
async fn test_start_and_complete_transfer() {
    let (app, bank) = setup();

    let (status, json) = send(
        &app,
        post("/transfers", transfer("pay-invoice-701", "43-812", 250)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["workflow_id"], "pay-invoice-701");
    assert!(!json["run_id"].as_str().unwrap().is_empty());

    let (status, json) = send(&app, get("/transfers/pay-invoice-701/result")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(
        json["summary"],
        "Transfer complete (transaction IDs: W-0001, D-0002)"
    );
    assert_eq!(bank.balance("43-812"), Some(250));

    let (status, json) = send(&app, get("/transfers/pay-invoice-701")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Completed");
    assert_eq!(json["closed"], true);
    assert_eq!(json["steps"].as_array().unwrap().len(), 2);
    assert_eq!(json["details"]["amount"], 250);
}

#[tokio::test]
async fn test_generated_workflow_id() {
    let (app, _) = setup();
    let mut body = transfer("ignored", "43-812", 10);
    body.as_object_mut().unwrap().remove("workflow_id");

    let (status, json) = send(&app, post("/transfers", body)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(json["workflow_id"].as_str().unwrap().starts_with("transfer-"));
}

#[tokio::test]
async fn test_invalid_details_are_rejected() {
    let (app, _) = setup();

    let (status, json) = send(&app, post("/transfers", transfer("zero", "43-812", 0))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());

    let (status, _) = send(&app, post("/transfers", transfer("same", "85-150", 10))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post("/transfers", transfer("  ", "43-812", 10))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_workflow_id_conflicts() {
    let (app, _) = setup();

    let (status, _) = send(&app, post("/transfers", transfer("dup", "43-812", 10))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, json) = send(&app, post("/transfers", transfer("dup", "43-812", 10))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn test_failed_deposit_reports_compensation() {
    let (app, bank) = setup();

    send(&app, post("/transfers", transfer("bad-target", "99-999", 250))).await;
    let (status, json) = send(&app, get("/transfers/bad-target/result")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["status"], "compensated_failure");
    assert_eq!(json["manual_intervention"], false);
    let error = json["error"].as_str().unwrap();
    assert!(error.contains("failed to deposit money into 99-999"));
    assert!(error.contains("Money returned to 85-150"));
    assert_eq!(bank.balance("85-150"), Some(2000));
}

#[tokio::test]
async fn test_failed_withdraw_reports_source_account() {
    let (app, _) = setup();

    send(&app, post("/transfers", transfer("broke", "43-812", 9999))).await;
    let (status, json) = send(&app, get("/transfers/broke/result")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["status"], "withdraw_failed");
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .starts_with("Withdraw: failed to withdraw money from 85-150")
    );
}

#[tokio::test]
async fn test_history_lists_recorded_events() {
    let (app, _) = setup();

    send(&app, post("/transfers", transfer("audit", "43-812", 10))).await;
    send(&app, get("/transfers/audit/result")).await;
    let (status, json) = send(&app, get("/transfers/audit/history")).await;

    assert_eq!(status, StatusCode::OK);
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0]["sequence"], 1);
    assert_eq!(events[0]["event_type"], "TransferStarted");
    assert_eq!(events[5]["event_type"], "TransferCompleted");
    assert_eq!(events[2]["payload"]["data"]["step"], "withdraw");
}

#[tokio::test]
async fn test_unknown_transfer_is_not_found() {
    let (app, _) = setup();

    for uri in [
        "/transfers/nope",
        "/transfers/nope/result",
        "/transfers/nope/history",
    ] {
        let (status, _) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    let (status, _) = send(&app, post("/transfers/nope/cancel", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_live_transfer() {
    let (app, bank) = setup();
    bank.set_latency(Duration::from_secs(30));

    send(&app, post("/transfers", transfer("slow", "43-812", 250))).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (status, json) = send(&app, post("/transfers/slow/cancel", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "Cancelled");

    let (status, json) = send(&app, get("/transfers/slow/result")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(bank.balance("85-150"), Some(2000));

    let (status, _) = send(&app, post("/transfers/slow/cancel", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    send(&app, post("/transfers", transfer("counted", "43-812", 10))).await;
    send(&app, get("/transfers/counted/result")).await;

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("transfer_runs_total"));
    assert!(text.contains("step_attempts_total"));
}
