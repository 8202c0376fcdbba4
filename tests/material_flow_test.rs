mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use uuid::Uuid;

const GROUP: &str = "11111111-1111-1111-1111-111111111111";
const MATERIAL: &str = "22222222-2222-2222-2222-222222222222";
const SITE_A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
const SITE_B: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";
const SITE_C: &str = "cccccccc-cccc-cccc-cccc-cccccccccccc";

fn create_batch_body(batch_ref: &str, date: &str, qty: u64, unit_cost: u64) -> serde_json::Value {
    json!({
        "batch_ref": batch_ref,
        "group_id": GROUP,
        "material_id": MATERIAL,
        "material_name": "Cement PPC",
        "brand": "UltraTech",
        "unit": "bag",
        "paying_site_id": SITE_A,
        "purchase_date": date,
        "quantity": qty,
        "unit_cost": unit_cost,
        "created_by": "site-engineer"
    })
}

fn usage_body(site: &str, date: &str, batch_ref: &str, qty: u64) -> serde_json::Value {
    json!({
        "usage_site_id": site,
        "usage_date": date,
        "allocations": [{"batch_ref": batch_ref, "quantity": qty}],
        "work_description": "slab casting"
    })
}

#[tokio::test]
async fn full_cement_batch_lifecycle() {
    let app = TestApp::new().await;

    // Register a 100-bag batch paid by site A.
    let response = app
        .request(
            Method::POST,
            "/api/v1/batches",
            Some(create_batch_body("BATCH-001", "2025-12-05", 100, 290)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["batch_ref"], "BATCH-001");
    assert_eq!(body["data"]["remaining_qty"], "100");
    assert_eq!(body["data"]["total_amount"], "29000");
    assert_eq!(body["data"]["status"], "OPEN");

    // Preview 45 bags: one line against BATCH-001 at batch cost.
    let response = app
        .request(
            Method::POST,
            "/api/v1/usage/preview",
            Some(json!({"group_id": GROUP, "material_id": MATERIAL, "quantity": 45})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    let plan = &body["data"];
    assert_eq!(plan["lines"].as_array().unwrap().len(), 1);
    assert_eq!(plan["lines"][0]["batch_ref"], "BATCH-001");
    assert_eq!(plan["lines"][0]["total_cost"], "13050");
    assert_eq!(plan["lines"][0]["remaining_after"], "55");
    assert_eq!(plan["lines"][0]["will_complete"], false);

    // Site B commits the 45 bags: cross-site, pending settlement.
    let response = app
        .request(
            Method::POST,
            "/api/v1/usage",
            Some(usage_body(SITE_B, "2025-12-06", "BATCH-001", 45)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["total_cost"], "13050");
    assert_eq!(body["data"]["cross_site"], true);
    assert_eq!(body["data"]["expenses_created"], 0);
    assert_eq!(body["data"]["records"][0]["settlement_status"], "PENDING");

    let response = app
        .request(Method::GET, "/api/v1/batches/BATCH-001/remaining", None)
        .await;
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["remaining_qty"], "55");

    // Site C drains the batch; it auto-completes.
    let response = app
        .request(
            Method::POST,
            "/api/v1/usage",
            Some(usage_body(SITE_C, "2025-12-07", "BATCH-001", 55)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["total_cost"], "15950");
    assert_eq!(body["data"]["completed_batches"][0], "BATCH-001");

    let response = app
        .request(Method::GET, "/api/v1/batches/BATCH-001", None)
        .await;
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["status"], "COMPLETED");
    assert_eq!(body["data"]["remaining_qty"], "0");

    // Nothing left: preview must refuse with 422 and report availability.
    let response = app
        .request(
            Method::POST,
            "/api/v1/usage/preview",
            Some(json!({"group_id": GROUP, "material_id": MATERIAL, "quantity": 1})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = TestApp::json_body(response).await;
    assert!(body["message"].as_str().unwrap().contains("available 0"));
}

#[tokio::test]
async fn self_use_is_expensed_immediately() {
    let app = TestApp::new().await;

    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-OWN", "2025-12-05", 50, 300)),
    )
    .await;

    // Site A consumes its own purchase: no pending balance, direct expense.
    let response = app
        .request(
            Method::POST,
            "/api/v1/usage",
            Some(usage_body(SITE_A, "2025-12-06", "BATCH-OWN", 10)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["records"][0]["settlement_status"], "SELF_USE");
    assert_eq!(body["data"]["cross_site"], false);
    assert_eq!(body["data"]["expenses_created"], 1);

    let response = app
        .request(Method::GET, "/api/v1/settlements/balances", None)
        .await;
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn deleting_usage_restores_and_reopens_batch() {
    let app = TestApp::new().await;

    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-R", "2025-12-05", 20, 100)),
    )
    .await;

    // Drain the batch completely so it auto-completes.
    let response = app
        .request(
            Method::POST,
            "/api/v1/usage",
            Some(usage_body(SITE_B, "2025-12-06", "BATCH-R", 20)),
        )
        .await;
    let body = TestApp::json_body(response).await;
    let usage_id = body["data"]["records"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["completed_batches"][0], "BATCH-R");

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/usage/{}", usage_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["restored_qty"], "20");
    assert_eq!(body["data"]["batch_reopened"], true);

    let response = app
        .request(Method::GET, "/api/v1/batches/BATCH-R", None)
        .await;
    let body = TestApp::json_body(response).await;
    assert_eq!(body["data"]["status"], "OPEN");
    assert_eq!(body["data"]["remaining_qty"], "20");
    assert_eq!(body["data"]["used_qty"], "0");

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/usage/{}", usage_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fifo_spans_batches_oldest_first() {
    let app = TestApp::new().await;

    // Newer batch created first to prove ordering is by purchase date.
    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-NEW", "2025-12-10", 50, 320)),
    )
    .await;
    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-OLD", "2025-12-01", 30, 290)),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/usage/preview",
            Some(json!({"group_id": GROUP, "material_id": MATERIAL, "quantity": 40})),
        )
        .await;
    let body = TestApp::json_body(response).await;
    let lines = body["data"]["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["batch_ref"], "BATCH-OLD");
    assert_eq!(lines[0]["quantity"], "30");
    assert_eq!(lines[0]["will_complete"], true);
    assert_eq!(lines[1]["batch_ref"], "BATCH-NEW");
    assert_eq!(lines[1]["quantity"], "10");

    // 30*290 + 10*320 = 11900
    assert_eq!(body["data"]["total_cost"], "11900");
}

#[tokio::test]
async fn consolidated_view_aggregates_open_batches() {
    let app = TestApp::new().await;

    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-C1", "2025-12-01", 50, 290)),
    )
    .await;
    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-C2", "2025-12-02", 50, 320)),
    )
    .await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/groups/{}/consolidated", GROUP),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    let materials = body["data"].as_array().unwrap();
    assert_eq!(materials.len(), 1);
    assert_eq!(materials[0]["total_remaining"], "100");
    assert_eq!(materials[0]["batch_count"], 2);
    assert_eq!(materials[0]["weighted_avg_cost"], "305");
}

#[tokio::test]
async fn batch_creation_validation() {
    let app = TestApp::new().await;

    // Non-positive quantity is rejected.
    let response = app
        .request(
            Method::POST,
            "/api/v1/batches",
            Some(create_batch_body("BATCH-V", "2025-12-05", 0, 290)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Duplicate batch reference is rejected.
    app.request(
        Method::POST,
        "/api/v1/batches",
        Some(create_batch_body("BATCH-DUP", "2025-12-05", 10, 290)),
    )
    .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/batches",
            Some(create_batch_body("BATCH-DUP", "2025-12-06", 10, 290)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown batch lookups 404.
    let response = app
        .request(Method::GET, "/api/v1/batches/NO-SUCH-BATCH", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown usage record 404s too.
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/usage/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.request(Method::GET, "/health/ready", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = TestApp::json_body(response).await;
    assert_eq!(body["ready"], true);
}
