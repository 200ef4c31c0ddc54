/// End-to-end tests of the HTTP surface against the in-memory store
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lead_intake_api::config::Config;
use lead_intake_api::db_storage::MemoryLeadStore;
use lead_intake_api::handlers::AppState;
use lead_intake_api::routes::build_router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(config: Config) -> Router {
    let state = AppState::new(config, Arc::new(MemoryLeadStore::new())).unwrap();
    build_router(Arc::new(state))
}

fn app() -> Router {
    app_with(Config::default())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn webhook(app: &Router, body: Value) -> (StatusCode, Value) {
    send(app, "POST", "/webhook/salesgod", Some(body)).await
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_age_and_gender_produces_quote() {
    let app = app();
    let (status, body) = webhook(
        &app,
        json!({
            "phone": "(555) 123-4567",
            "full_name": "Jane Doe",
            "messages_as_string": "42 female",
            "messageCount": 3
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let lead = &body["lead"];
    assert_eq!(lead["phone"], "+15551234567");
    assert_eq!(lead["category"], "ready_for_quote");
    assert_eq!(lead["intent"], "gave_age_gender");
    assert!(lead["copyMessage"].as_str().unwrap().contains("$249-$519"));
    assert_eq!(lead["tagOnSend"], "Quoted");
    assert!(lead["tagToApply"].is_null());
}

#[tokio::test]
async fn test_quoted_lead_ready_to_book_is_hot() {
    let app = app();
    let (_, body) = webhook(
        &app,
        json!({
            "phone": "5551234567",
            "full_name": "Jane Doe",
            "status": "quoted",
            "messages_as_string": "sounds good, when can we talk?"
        }),
    )
    .await;

    let lead = &body["lead"];
    assert_eq!(lead["currentTag"], "Quoted");
    assert_eq!(lead["category"], "hot");
    assert_eq!(lead["priority"], "urgent");
    assert_eq!(lead["suggestedTag"], "Appointment Set");
}

#[tokio::test]
async fn test_repeated_snapshot_is_duplicate() {
    let app = app();
    let payload = json!({
        "phone": "5551234567",
        "full_name": "Jane Doe",
        "messages_as_string": "How much is it?",
        "messageCount": 2
    });

    let (_, first) = webhook(&app, payload.clone()).await;
    assert!(first.get("duplicate").is_none());

    let (status, second) = webhook(&app, payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["lead"]["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_phone_is_bad_request() {
    let (status, body) = webhook(&app(), json!({ "messages_as_string": "hello" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_webhook_secret_is_enforced() {
    let app = app_with(Config {
        webhook_secret: Some("s3cret".to_string()),
        ..Config::default()
    });
    let payload = json!({ "phone": "5551234567", "messages_as_string": "hi" });

    let (status, _) = webhook(&app, payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/salesgod")
        .header("content-type", "application/json")
        .header("X-Webhook-Token", "s3cret")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stop_blocks_lead_and_rejects_queue() {
    let app = app();
    let (_, body) = webhook(
        &app,
        json!({ "phone": "5551234567", "messages_as_string": "STOP" }),
    )
    .await;
    assert_eq!(body["lead"]["blocked"], true);
    assert!(body["lead"]["copyMessage"].is_null());

    let (status, body) = send(
        &app,
        "POST",
        "/api/queue",
        Some(json!({ "phone": "5551234567", "message": "hello?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_send_queue_round_trip_requests_deferred_tag() {
    let app = app();
    webhook(
        &app,
        json!({ "phone": "5551234567", "full_name": "Jane", "messages_as_string": "42 female" }),
    )
    .await;

    let (status, _) = send(&app, "POST", "/api/queue", Some(json!({ "phone": "5551234567" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, next) = send(&app, "GET", "/api/queue/next", None).await;
    assert_eq!(next["phone"], "+15551234567");
    assert!(next["message"].as_str().unwrap().contains("$249-$519"));

    let (status, lead) = send(&app, "POST", "/api/queue/+15551234567/sent", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lead["quoteSent"], true);
    assert_eq!(lead["category"], "waiting");
    assert_eq!(lead["tagToApply"], "Quoted");

    let (_, queue) = send(&app, "GET", "/api/queue", None).await;
    assert!(queue.as_array().unwrap().is_empty());

    let (_, next_tag) = send(&app, "GET", "/api/tags/next", None).await;
    assert_eq!(next_tag["tag"], "Quoted");

    let (status, lead) = send(&app, "POST", "/api/tags/5551234567/applied", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lead["currentTag"], "Quoted");

    let (_, pending) = send(&app, "GET", "/api/tags/pending", None).await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sent_without_queue_is_conflict() {
    let app = app();
    webhook(&app, json!({ "phone": "5551234567", "messages_as_string": "hi" })).await;
    let (status, _) = send(&app, "POST", "/api/queue/5551234567/sent", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_lead_is_not_found() {
    let (status, body) = send(&app(), "GET", "/api/leads/5559999999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_auto_send_queues_suggestion() {
    let app = app();
    let (_, settings) = send(
        &app,
        "POST",
        "/api/settings",
        Some(json!({ "autoSend": true, "autoTag": true })),
    )
    .await;
    assert_eq!(settings["autoSend"], true);

    webhook(
        &app,
        json!({ "phone": "5551234567", "messages_as_string": "how much does it cost?" }),
    )
    .await;

    let (_, queue) = send(&app, "GET", "/api/queue", None).await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    let (_, tags) = send(&app, "GET", "/api/tags/pending", None).await;
    assert_eq!(tags[0]["tag"], "Age and gender");
}

#[tokio::test]
async fn test_structured_log_merges_incrementally() {
    let app = app();
    webhook(
        &app,
        json!({
            "phone": "5551234567",
            "messages_as_string": "1 - out - Hi, it's Jack - 2025-03-01T10:00:00Z\n2 - in - hello - 2025-03-01T10:05:00Z"
        }),
    )
    .await;
    let (_, body) = webhook(
        &app,
        json!({
            "phone": "5551234567",
            "messages_as_string": "2 - in - hello - 2025-03-01T10:05:00Z\n3 - out - How old are you? - 2025-03-01T10:06:00Z\n4 - in - 35 male - 2025-03-01T10:09:00Z"
        }),
    )
    .await;

    let messages = body["lead"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3]["text"], "35 male");
    assert_eq!(body["lead"]["category"], "ready_for_quote");
}

#[tokio::test]
async fn test_grown_log_with_same_last_text_is_not_duplicate() {
    let app = app();
    webhook(
        &app,
        json!({
            "phone": "5551234567",
            "messages_as_string": "1 - out - Hi, it's Jack - 2025-03-01T10:00:00Z\n2 - in - ok - 2025-03-01T10:05:00Z"
        }),
    )
    .await;
    let (_, body) = webhook(
        &app,
        json!({
            "phone": "5551234567",
            "messages_as_string": "1 - out - Hi, it's Jack - 2025-03-01T10:00:00Z\n2 - in - ok - 2025-03-01T10:05:00Z\n3 - out - How old are you? - 2025-03-01T10:06:00Z\n4 - in - ok - 2025-03-01T10:09:00Z"
        }),
    )
    .await;

    assert!(body.get("duplicate").is_none());
    assert_eq!(body["lead"]["messages"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_previews_and_stats() {
    let app = app();

    let (_, quote) = send(&app, "GET", "/api/quote?adults=1&kids=0&age=42", None).await;
    assert_eq!(quote["lowPrice"], 249);
    assert_eq!(quote["highPrice"], 519);

    let (_, medicare) = send(&app, "GET", "/api/quote?age=70", None).await;
    assert_eq!(medicare["isMedicare"], true);

    let (_, suggestion) = send(
        &app,
        "POST",
        "/api/classify",
        Some(json!({ "message": "Not interested" })),
    )
    .await;
    assert_eq!(suggestion["category"], "dead");

    webhook(&app, json!({ "phone": "5551234567", "messages_as_string": "I'm 67" })).await;
    let (_, stats) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["byCategory"]["medicare"], 1);

    let (_, result) = send(
        &app,
        "POST",
        "/api/query",
        Some(json!({ "query": "how many medicare leads" })),
    )
    .await;
    assert_eq!(result["count"], 1);
}

#[tokio::test]
async fn test_simulate_creates_lead() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/simulate",
        Some(json!({ "message": "Can you call me in April?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lead"]["category"], "scheduled");
    assert_eq!(body["lead"]["followUpDate"], "April");

    let (_, status_body) = send(&app, "GET", "/api/test", None).await;
    assert_eq!(status_body["leads"], 1);
}
