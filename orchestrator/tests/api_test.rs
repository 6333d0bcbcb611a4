//! HTTP API tests.
//!
//! The full router runs against in-memory doubles from `progression-testing`,
//! so every request exercises the real handlers, service and error mapping.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::too_many_lines)]

use axum::http::StatusCode;
use axum_test::TestServer;
use progression_core::{REQUEST_CHANNEL, SimulationRequest, StageId, StageStatus, UserId};
use progression_orchestrator::{AppState, ProgressionService, build_router};
use progression_testing::{InMemoryChannel, InMemoryProgressStore, InMemorySimulationLog, fixtures};
use serde_json::{Value, json};
use std::sync::Arc;

struct Harness {
    server: TestServer,
    store: Arc<InMemoryProgressStore>,
    log: Arc<InMemorySimulationLog>,
    channel: Arc<InMemoryChannel>,
}

fn harness(stages: u32) -> Harness {
    let store = Arc::new(InMemoryProgressStore::new());
    let log = Arc::new(InMemorySimulationLog::new());
    let channel = Arc::new(InMemoryChannel::new());
    let service = ProgressionService::new(
        fixtures::catalog(stages),
        store.clone(),
        log.clone(),
        channel.clone(),
        REQUEST_CHANNEL,
    );
    let server = TestServer::new(build_router(AppState::new(service))).unwrap();

    Harness {
        server,
        store,
        log,
        channel,
    }
}

async fn start(server: &TestServer, user_id: i64, stage_id: u32) -> axum_test::TestResponse {
    server
        .post("/api/simulation/start")
        .json(&json!({ "user_id": user_id, "stage_id": stage_id }))
        .await
}

fn verdict_json(user_id: i64, stage_id: u32, attempt_number: u32, result: &str) -> Value {
    json!({
        "user_id": user_id,
        "stage_id": stage_id,
        "attempt_number": attempt_number,
        "result": result,
        "message": "worker verdict",
        "simulation_data": { "score": 87 },
        "timestamp": "2025-01-01T00:00:00Z",
    })
}

#[tokio::test]
async fn liveness_and_readiness() {
    let h = harness(3);

    let health = h.server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>(), json!({ "status": "ok" }));

    h.server.get("/ready").await.assert_status_ok();

    h.store.set_unavailable(true);
    let ready = h.server.get("/ready").await;
    ready.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ready.json::<Value>()["status"], "unavailable");
}

#[tokio::test]
async fn lists_the_catalog_in_order() {
    let h = harness(3);

    let stages = h.server.get("/api/stages").await.json::<Value>();

    let ids: Vec<u64> = stages
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn provisioning_is_idempotent() {
    let h = harness(3);

    let first = h.server.post("/api/users/7/provision").await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>(), json!({ "user_id": 7, "created": 3 }));

    let second = h.server.post("/api/users/7/provision").await;
    assert_eq!(second.json::<Value>()["created"], 0);
    assert_eq!(h.store.len(), 3);
}

#[tokio::test]
async fn start_publishes_a_request_and_answers_accepted() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;

    let response = h
        .server
        .post("/api/simulation/start")
        .json(&json!({
            "user_id": 7,
            "stage_id": 1,
            "simulation_data": { "scenario": "phishing" },
        }))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body = response.json::<Value>();
    assert_eq!(body["attempt_number"], 1);
    assert_eq!(body["status"], "in_progress");
    assert!(body["simulation_id"].is_string());

    let published = h.channel.published(REQUEST_CHANNEL);
    assert_eq!(published.len(), 1);
    let request = SimulationRequest::from_bytes(&published[0]).unwrap();
    assert_eq!(request.attempt_number, 1);
    assert_eq!(request.payload, json!({ "scenario": "phishing" }));
    assert_eq!(
        body["simulation_id"].as_str().unwrap(),
        request.simulation_id.to_string()
    );

    let record = h.store.snapshot(UserId(7), StageId(1)).unwrap();
    assert_eq!(record.status, StageStatus::InProgress);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn null_simulation_data_is_sent_as_an_empty_object() {
    let h = harness(2);
    h.server.post("/api/users/7/provision").await;

    h.server
        .post("/api/simulation/start")
        .json(&json!({ "user_id": 7, "stage_id": 1, "simulation_data": null }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let request = SimulationRequest::from_bytes(&h.channel.published(REQUEST_CHANNEL)[0]).unwrap();
    assert_eq!(request.payload, json!({}));
}

#[tokio::test]
async fn start_on_a_locked_stage_is_invalid_state() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;

    let response = start(&h.server, 7, 2).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "INVALID_STATE");
    assert!(h.channel.published(REQUEST_CHANNEL).is_empty());
}

#[tokio::test]
async fn start_while_in_progress_is_invalid_state() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;
    start(&h.server, 7, 1).await.assert_status(StatusCode::ACCEPTED);

    let response = start(&h.server, 7, 1).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "INVALID_STATE");
    assert_eq!(h.store.snapshot(UserId(7), StageId(1)).unwrap().attempts, 1);
}

#[tokio::test]
async fn start_for_an_unprovisioned_user_is_not_found() {
    let h = harness(3);

    let response = start(&h.server, 99, 1).await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_start_bodies_are_bad_requests() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;

    let wrong_payload = h
        .server
        .post("/api/simulation/start")
        .json(&json!({ "user_id": 7, "stage_id": 1, "simulation_data": [1, 2] }))
        .await;
    wrong_payload.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(wrong_payload.json::<Value>()["code"], "BAD_REQUEST");

    let missing_stage = h
        .server
        .post("/api/simulation/start")
        .json(&json!({ "user_id": 7 }))
        .await;
    missing_stage.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(missing_stage.json::<Value>()["code"], "BAD_REQUEST");

    assert!(h.channel.published(REQUEST_CHANNEL).is_empty());
}

#[tokio::test]
async fn publish_failure_is_a_server_error_and_rolls_back() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;
    h.channel.fail_publishes(true);

    let response = start(&h.server, 7, 1).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["code"], "INTERNAL_SERVER_ERROR");

    let record = h.store.snapshot(UserId(7), StageId(1)).unwrap();
    assert_eq!(record.status, StageStatus::Available);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.timeouts, 1);

    h.channel.fail_publishes(false);
    let retry = start(&h.server, 7, 1).await;
    retry.assert_status(StatusCode::ACCEPTED);
    assert_eq!(retry.json::<Value>()["attempt_number"], 2);
}

#[tokio::test]
async fn store_outage_is_a_server_error() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;
    h.store.set_unavailable(true);

    let response = h.server.get("/api/users/7/progress").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>()["message"],
        "A backing service is unavailable"
    );
}

#[tokio::test]
async fn response_endpoint_applies_then_reports_duplicates() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;
    start(&h.server, 7, 1).await.assert_status(StatusCode::ACCEPTED);

    let applied = h
        .server
        .post("/api/simulation/response")
        .json(&verdict_json(7, 1, 1, "success"))
        .await;
    applied.assert_status_ok();
    assert_eq!(
        applied.json::<Value>(),
        json!({ "outcome": "applied", "status": "completed", "unlocked_stage": 2 })
    );

    let duplicate = h
        .server
        .post("/api/simulation/response")
        .json(&verdict_json(7, 1, 1, "success"))
        .await;
    duplicate.assert_status_ok();
    assert_eq!(duplicate.json::<Value>()["outcome"], "duplicate");

    assert_eq!(h.log.len(), 2);
    assert_eq!(
        h.store.snapshot(UserId(7), StageId(2)).unwrap().status,
        StageStatus::Available
    );
}

#[tokio::test]
async fn response_for_an_unknown_pair_is_not_found() {
    let h = harness(3);

    let response = h
        .server
        .post("/api/simulation/response")
        .json(&verdict_json(42, 1, 1, "failure"))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn progress_stats_and_history_for_a_user() {
    let h = harness(3);
    h.server.post("/api/users/7/provision").await;
    start(&h.server, 7, 1).await;
    h.server
        .post("/api/simulation/response")
        .json(&verdict_json(7, 1, 1, "success"))
        .await
        .assert_status_ok();

    let progress = h.server.get("/api/users/7/progress").await.json::<Value>();
    assert_eq!(progress["user_id"], 7);
    let stages = progress["progress"].as_array().unwrap();
    assert_eq!(stages.len(), 3);
    assert_eq!(stages[0]["stage_name"], "Stage 1");
    assert_eq!(stages[0]["status"], "completed");
    assert_eq!(stages[0]["last_result"], "success");
    assert_eq!(stages[1]["status"], "available");
    assert_eq!(stages[2]["status"], "locked");

    let stats = h.server.get("/api/users/7/stats").await.json::<Value>();
    assert_eq!(stats["completed_stages"], 1);
    assert_eq!(stats["current_stage"], 2);
    assert_eq!(stats["total_attempts"], 1);

    let history = h.server.get("/api/users/7/simulations").await.json::<Value>();
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["result"], "success");

    let system = h.server.get("/api/system/stats").await.json::<Value>();
    assert_eq!(system["total_users"], 1);
    assert_eq!(system["active_users"], 1);
    assert_eq!(system["total_simulations"], 1);
    assert_eq!(system["stage_completion_stats"][0]["completions"], 1);
}

#[tokio::test]
async fn read_models_for_unknown_users_are_not_found() {
    let h = harness(3);

    h.server
        .get("/api/users/5/progress")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .get("/api/users/5/stats")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let history = h.server.get("/api/users/5/simulations").await;
    history.assert_status_ok();
    assert_eq!(history.json::<Value>(), json!([]));
}

#[tokio::test]
async fn non_numeric_user_ids_are_bad_requests() {
    let h = harness(3);

    let response = h.server.get("/api/users/abc/progress").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let h = harness(1);

    let response = h
        .server
        .get("/health")
        .add_header(
            "x-correlation-id".parse::<axum::http::HeaderName>().unwrap(),
            "6f1d3c2a-8b7e-4c5d-9a0f-1e2d3c4b5a69".parse::<axum::http::HeaderValue>().unwrap(),
        )
        .await;

    assert_eq!(
        response.headers()["x-correlation-id"].to_str().unwrap(),
        "6f1d3c2a-8b7e-4c5d-9a0f-1e2d3c4b5a69"
    );
}
