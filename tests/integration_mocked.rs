/// Integration tests with mocked external APIs
/// Exercises the outbound clients without hitting real services
use lead_intake_api::circuit_breaker::RetryPolicy;
use lead_intake_api::config::Config;
use lead_intake_api::db_storage::MemoryLeadStore;
use lead_intake_api::handlers::{update_lead, AppState};
use lead_intake_api::relay_client::CrmRelayClient;
use lead_intake_api::services::{format_slots, ReplyRefiner, SchedulingClient};
use lead_intake_api::webhook_handler::ingest_snapshot;
use lead_intake_api::webhook_models::WebhookPayload;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn refiner_config(base_url: String) -> Config {
    Config {
        anthropic_api_key: Some("test_key".to_string()),
        anthropic_base_url: base_url,
        ..Config::default()
    }
}

fn calendly_config(base_url: String) -> Config {
    Config {
        calendly_token: Some("test_token".to_string()),
        calendly_event_type: Some("https://api.calendly.com/event_types/ABC".to_string()),
        calendly_base_url: base_url,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_refiner_successful_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test_key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                { "type": "text", "text": "Hey Jane! " },
                { "type": "text", "text": "Got a minute for a quick call?" }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let refiner = ReplyRefiner::new(&refiner_config(mock_server.uri())).unwrap();
    assert!(refiner.is_enabled());

    let reply = refiner
        .refine_or_original("What time works for a call?", "more casual", "Jane")
        .await;
    assert!(reply.refined);
    assert_eq!(reply.adjusted, "Hey Jane! Got a minute for a quick call?");
}

#[tokio::test]
async fn test_refiner_error_keeps_original() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let refiner = ReplyRefiner::new(&refiner_config(mock_server.uri())).unwrap();
    let err = refiner.refine("Original", "shorter", "Jane").await.unwrap_err();
    assert!(err.to_string().contains("529"));

    let reply = refiner.refine_or_original("Original", "shorter", "Jane").await;
    assert!(!reply.refined);
    assert_eq!(reply.adjusted, "Original");
}

#[tokio::test]
async fn test_relay_push_retries_then_succeeds() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .and(body_partial_json(json!({
            "event": "tag",
            "phone": "+15551234567",
            "tag": "Quoted"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let client = CrmRelayClient::new(format!("{}/relay", mock_server.uri()), 3)
        .unwrap()
        .with_retry_policy(fast_retry(3));

    let result = client.push_tag("+15551234567", "Jane", "Quoted").await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_relay_push_gives_up_after_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = CrmRelayClient::new(format!("{}/relay", mock_server.uri()), 2)
        .unwrap()
        .with_retry_policy(fast_retry(2));

    let err = client.push_tag("+15551234567", "Jane", "Dead").await.unwrap_err();
    assert!(err.to_string().contains("CRM relay returned 500"));
}

#[tokio::test]
async fn test_calendly_available_slots() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/event_type_available_times"))
        .and(query_param(
            "event_type",
            "https://api.calendly.com/event_types/ABC",
        ))
        .and(header("Authorization", "Bearer test_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collection": [
                {
                    "status": "available",
                    "start_time": "2025-03-04T15:00:00Z",
                    "scheduling_url": "https://calendly.com/jack/15min/2025-03-04T15:00:00Z"
                },
                { "status": "unavailable", "start_time": "2025-03-04T16:00:00Z" },
                { "status": "available", "start_time": "2025-03-05T10:30:00Z" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let client = SchedulingClient::new(&calendly_config(mock_server.uri()))
        .unwrap()
        .with_retry_policy(fast_retry(1));
    let slots = client.available_slots(7).await.unwrap();

    assert_eq!(slots.len(), 2);
    assert!(slots[0].scheduling_url.is_some());
    assert_eq!(
        format_slots(&slots, 3).as_deref(),
        Some("Tue Mar 4 3:00 PM or Wed Mar 5 10:30 AM (UTC)")
    );
}

#[tokio::test]
async fn test_ready_to_book_reply_lists_openings() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/event_type_available_times"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collection": [
                { "status": "available", "start_time": "2025-03-04T15:00:00Z" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let state = AppState::new(
        calendly_config(mock_server.uri()),
        Arc::new(MemoryLeadStore::new()),
    )
    .unwrap();

    let snapshot = WebhookPayload {
        phone: Some("5551234567".to_string()),
        messages_as_string: Some("Yes let's talk, call me".to_string()),
        status: Some("Quoted".to_string()),
        ..WebhookPayload::default()
    }
    .into_snapshot()
    .unwrap();

    let response = ingest_snapshot(&state, snapshot).await.unwrap();
    let lead = response.lead.unwrap();
    let copy = lead.copy_message.unwrap();
    assert!(copy.contains("Tue Mar 4 3:00 PM (UTC)"));
}

#[tokio::test]
async fn test_slow_slot_lookup_does_not_hold_lead_lock() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/event_type_available_times"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "collection": [
                        { "status": "available", "start_time": "2025-03-04T15:00:00Z" }
                    ]
                }))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&mock_server)
        .await;

    let state = Arc::new(
        AppState::new(
            calendly_config(mock_server.uri()),
            Arc::new(MemoryLeadStore::new()),
        )
        .unwrap(),
    );

    let snapshot = |text: &str| {
        WebhookPayload {
            phone: Some("5551234567".to_string()),
            messages_as_string: Some(text.to_string()),
            status: Some("Quoted".to_string()),
            ..WebhookPayload::default()
        }
        .into_snapshot()
        .unwrap()
    };
    ingest_snapshot(&state, snapshot("hi there")).await.unwrap();

    let webhook_state = state.clone();
    let booking = snapshot("sounds good, when can we talk?");
    let delivery =
        tokio::spawn(async move { ingest_snapshot(&webhook_state, booking).await.unwrap() });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let started = Instant::now();
    update_lead(&state, "+15551234567", |lead, now| {
        lead.add_note("called back", now);
        Ok(())
    })
    .await
    .unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(700),
        "note waited {:?} behind the slot lookup",
        started.elapsed()
    );

    let lead = delivery.await.unwrap().lead.unwrap();
    assert!(lead.copy_message.unwrap().contains("Tue Mar 4 3:00 PM (UTC)"));
    assert_eq!(lead.notes.len(), 1);
}

#[tokio::test]
async fn test_calendly_failure_keeps_plain_reply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/event_type_available_times"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthenticated"))
        .mount(&mock_server)
        .await;

    let client = SchedulingClient::new(&calendly_config(mock_server.uri()))
        .unwrap()
        .with_retry_policy(fast_retry(1));
    let err = client.available_slots(7).await.unwrap_err();
    assert!(err.to_string().contains("Calendly returned 401"));
}

#[tokio::test]
async fn test_auto_tag_is_relayed_to_crm() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/relay"))
        .and(body_partial_json(json!({ "tag": "Dead" })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = Config {
        crm_relay_url: Some(format!("{}/relay", mock_server.uri())),
        auto_tag: true,
        ..Config::default()
    };
    let state = AppState::new(config, Arc::new(MemoryLeadStore::new())).unwrap();

    let snapshot = WebhookPayload {
        phone: Some("5551234567".to_string()),
        full_name: Some("Jane Doe".to_string()),
        messages_as_string: Some("not interested, thanks".to_string()),
        ..WebhookPayload::default()
    }
    .into_snapshot()
    .unwrap();

    let response = ingest_snapshot(&state, snapshot).await.unwrap();
    assert_eq!(response.lead.unwrap().tag_to_apply.as_deref(), Some("Dead"));

    // The push runs in the background.
    let mut relayed = false;
    for _ in 0..50 {
        let requests = mock_server.received_requests().await.unwrap_or_default();
        if !requests.is_empty() {
            relayed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(relayed, "expected the tag to be pushed to the relay");
}
