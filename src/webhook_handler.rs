use crate::classifier::{is_hard_stop, Intent};
use crate::dedup::{is_duplicate, snapshot_fingerprint};
use crate::errors::AppError;
use crate::handlers::{block_lead, AppState};
use crate::models::{tags, Category, Lead, Message};
use crate::phone::normalize_phone;
use crate::services::format_slots;
use crate::suggestion::{process_message, RoutingContext};
use crate::webhook_models::{
    InboundMessage, Snapshot, SnapshotMessages, WebhookPayload, WebhookResponse,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Slots appended to a booking reply when scheduling is configured.
const BOOKING_SLOT_COUNT: usize = 3;
/// Upper bound on the availability lookup for one booking reply.
const BOOKING_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Conversation webhook.
///
/// Receives a snapshot of one CRM conversation, deduplicates it, merges new
/// messages into the lead, classifies the newest inbound message and stores
/// the resulting suggestion.
///
/// Authentication: X-Webhook-Token header must match WEBHOOK_SECRET when set.
pub async fn salesgod_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    validate_webhook_secret(&state, &headers)?;

    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let snapshot = payload.into_snapshot()?;
    tracing::info!("Received conversation webhook for {}", snapshot.phone);

    let response = ingest_snapshot(&state, snapshot).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// Validate webhook secret from X-Webhook-Token header
fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref expected_secret) = state.config.webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("X-Webhook-Token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Webhook-Token header".to_string()))?;

    if !constant_time_compare(token, expected_secret) {
        tracing::warn!("Invalid webhook token received");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Apply one parsed snapshot to its lead and persist the result.
pub async fn ingest_snapshot(
    state: &AppState,
    snapshot: Snapshot,
) -> Result<WebhookResponse, AppError> {
    let phone = normalize_phone(&snapshot.phone)?;
    let guard = state.leads.lock_phone(&phone).await;
    let now = Utc::now();

    let existing = state.leads.get(&phone).await?;
    let is_new = existing.is_none();
    let mut lead = existing.unwrap_or_else(|| {
        tracing::info!("Creating lead {}", phone);
        Lead::new(
            phone.clone(),
            snapshot.name.clone().unwrap_or_else(|| "Unknown".to_string()),
            now,
        )
    });

    let profile_changed = sync_profile(&mut lead, &snapshot, now);
    let fingerprint = snapshot
        .last_text()
        .map(|text| snapshot_fingerprint(&phone, snapshot.effective_message_count(), text));

    if let Some(ref fingerprint) = fingerprint {
        if !is_new && !snapshot.is_full_sync() && is_duplicate(lead.last_fingerprint.as_deref(), fingerprint) {
            tracing::debug!("Duplicate snapshot for {}, skipping classification", phone);
            if profile_changed {
                lead.touch(now);
                state.leads.upsert(&lead).await?;
            }
            return Ok(WebhookResponse::duplicate(lead));
        }
    }

    let appended = merge_messages(&mut lead, snapshot.messages, now);
    let mut tags_to_relay = Vec::new();
    let mut wants_openings = false;

    if appended > 0 {
        note_outgoing_templates(&mut lead, appended, state);

        let last_is_incoming = lead.last_message().is_some_and(|m| !m.is_outgoing);
        if last_is_incoming {
            wants_openings = classify_latest(state, &mut lead, now);

            if state.settings.auto_tag() {
                if let Some(tag) = auto_tag(&mut lead, now) {
                    tags_to_relay.push(tag);
                }
            }
            if state.settings.auto_send() && !lead.blocked {
                if let Some(text) = lead.copy_message.clone() {
                    match lead.enqueue_message(&text, now) {
                        Ok(()) => tracing::info!("Auto-queued reply for {}", phone),
                        Err(e) => tracing::warn!("Auto-send skipped for {}: {}", phone, e),
                    }
                }
            }
        } else {
            // Newest message is ours; nothing to answer until they reply.
            lead.category = Category::Waiting;
            lead.copy_message = None;
        }
    }

    if let Some(fingerprint) = fingerprint {
        lead.last_fingerprint = Some(fingerprint);
    }
    lead.touch(now);
    state.leads.upsert(&lead).await?;
    drop(guard);

    for tag in tags_to_relay {
        state.relay_tag(&lead, &tag);
    }

    // The lookup runs outside the phone lock so operator writes are not held up.
    if wants_openings {
        lead = add_booking_openings(state, lead).await?;
    }

    tracing::info!(
        "Processed lead {}: {} new message(s), category {}",
        lead.phone,
        appended,
        lead.category.as_str()
    );
    Ok(WebhookResponse::processed(lead))
}

/// Name, CRM tag and referral flag. Returns whether anything changed.
fn sync_profile(lead: &mut Lead, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if let Some(name) = snapshot.name.as_deref() {
        if lead.name != name {
            lead.name = name.to_string();
            changed = true;
        }
    }

    if let Some(raw_tag) = snapshot.tag.as_deref() {
        let tag = tags::canonical(raw_tag)
            .map(str::to_string)
            .unwrap_or_else(|| raw_tag.to_string());
        if lead.current_tag.as_deref() != Some(tag.as_str()) {
            tracing::debug!("CRM tag for {} is now '{}'", lead.phone, tag);
            lead.current_tag = Some(tag.clone());
            changed = true;
        }
        // The CRM already shows the tag we were waiting on.
        if lead.has_pending_tag() && lead.tag_to_apply.as_deref() == Some(tag.as_str()) {
            if lead.mark_tag_applied(now).is_ok() {
                changed = true;
            }
        }
    }

    if snapshot.has_referral && !lead.referral_sent {
        lead.referral_sent = true;
        changed = true;
    }

    changed
}

fn same_message(inbound: &InboundMessage, stored: &Message) -> bool {
    inbound.is_outgoing == stored.is_outgoing && inbound.text.trim() == stored.text.trim()
}

fn to_message(inbound: InboundMessage, now: DateTime<Utc>) -> Message {
    let timestamp = inbound.timestamp.unwrap_or(now);
    if inbound.is_outgoing {
        Message::outgoing(inbound.text, timestamp)
    } else {
        Message::incoming(inbound.text, timestamp)
    }
}

/// Merge snapshot messages into the log. Returns how many messages at the
/// end of the log are new from this delivery.
///
/// A full sync replaces the log. A structured log usually overlaps what is
/// stored, so only entries after the stored newest message are appended;
/// when that message is not in the window, entries not already stored are.
fn merge_messages(lead: &mut Lead, messages: SnapshotMessages, now: DateTime<Utc>) -> usize {
    match messages {
        SnapshotMessages::FullSync(all) => {
            tracing::info!("Full sync for {}: {} messages", lead.phone, all.len());
            lead.messages = all.into_iter().map(|m| to_message(m, now)).collect();
            lead.messages.len()
        }
        SnapshotMessages::Log(log) => {
            let fresh: Vec<InboundMessage> = match lead.messages.last() {
                None => log,
                Some(last) => match log.iter().rposition(|m| same_message(m, last)) {
                    Some(index) => log.into_iter().skip(index + 1).collect(),
                    None => log
                        .into_iter()
                        .filter(|m| !lead.messages.iter().any(|stored| same_message(m, stored)))
                        .collect(),
                },
            };
            let count = fresh.len();
            lead.messages
                .extend(fresh.into_iter().map(|m| to_message(m, now)));
            count
        }
        SnapshotMessages::Single(message) => {
            lead.messages.push(to_message(message, now));
            1
        }
        SnapshotMessages::StatusOnly => 0,
    }
}

/// Flag quotes and referrals the operator sent from the CRM directly.
fn note_outgoing_templates(lead: &mut Lead, appended: usize, state: &AppState) {
    let start = lead.messages.len().saturating_sub(appended);
    let (mut quote, mut referral) = (false, false);
    for message in lead.messages[start..].iter().filter(|m| m.is_outgoing) {
        quote |= state.templates.is_quote_message(&message.text);
        referral |= state.templates.is_referral_message(&message.text);
    }
    if quote && !lead.quote_sent {
        tracing::debug!("Quote seen in outgoing messages for {}", lead.phone);
        lead.quote_sent = true;
    }
    if referral && !lead.referral_sent {
        lead.referral_sent = true;
    }
}

/// Classify the newest inbound message and store the suggestion on the lead.
///
/// Returns true when the reply is a booking reply that should list openings.
fn classify_latest(state: &AppState, lead: &mut Lead, now: DateTime<Utc>) -> bool {
    let Some(text) = lead.last_message().map(|m| m.text.clone()) else {
        return false;
    };

    let suggestion = process_message(&text, &RoutingContext::from(&*lead), &state.templates);
    tracing::debug!(
        "Classified message from {} as {} ({:.2})",
        lead.phone,
        suggestion.intent().as_str(),
        suggestion.classification.confidence
    );

    if let Some(message) = lead.messages.last_mut() {
        message.classification = Some(suggestion.classification.clone());
    }
    suggestion.apply_to(lead);

    if is_hard_stop(&text) && !lead.blocked {
        tracing::info!("Lead {} opted out, blocking", lead.phone);
        block_lead(lead, &format!("Opted out: \"{}\"", text.trim()), now);
    }

    suggestion.intent() == Intent::ReadyToBook
        && lead.copy_message.is_some()
        && state.scheduler.is_enabled()
}

/// Fetch openings and add them to the saved booking reply.
///
/// The lead is reloaded under its lock; the reply is only extended if nothing
/// replaced it while the lookup ran. A queued copy of the same reply gets the
/// openings too.
async fn add_booking_openings(state: &AppState, lead: Lead) -> Result<Lead, AppError> {
    let lookup = tokio::time::timeout(BOOKING_LOOKUP_TIMEOUT, state.scheduler.available_slots(7));
    let openings = match lookup.await {
        Ok(Ok(slots)) => format_slots(&slots, BOOKING_SLOT_COUNT),
        Ok(Err(e)) => {
            tracing::warn!("Could not fetch booking slots for {}: {}", lead.phone, e);
            None
        }
        Err(_) => {
            tracing::warn!("Booking slot lookup for {} timed out", lead.phone);
            None
        }
    };
    let (Some(openings), Some(reply)) = (openings, lead.copy_message.clone()) else {
        return Ok(lead);
    };

    let _guard = state.leads.lock_phone(&lead.phone).await;
    let Some(mut current) = state.leads.get(&lead.phone).await? else {
        return Ok(lead);
    };
    if current.copy_message.as_deref() != Some(reply.as_str()) {
        tracing::debug!("Reply for {} changed during slot lookup, leaving it", current.phone);
        return Ok(current);
    }

    let extended = format!("{} I have openings {}.", reply, openings);
    if current.pending_message.as_deref() == Some(reply.as_str()) {
        current.pending_message = Some(extended.clone());
    }
    current.copy_message = Some(extended);
    current.touch(Utc::now());
    state.leads.upsert(&current).await?;
    Ok(current)
}

/// Request the suggested tag unless the CRM already shows it or it is
/// already queued. Returns the tag that was requested.
fn auto_tag(lead: &mut Lead, now: DateTime<Utc>) -> Option<String> {
    let tag = lead.suggested_tag.clone()?;
    if lead.current_tag.as_deref() == Some(tag.as_str()) {
        return None;
    }
    if lead.has_pending_tag() && lead.tag_to_apply.as_deref() == Some(tag.as_str()) {
        return None;
    }
    lead.request_tag(&tag, now).ok()?;
    Some(tag)
}

const SIMULATED_MESSAGES: &[&str] = &[
    "Yes I'm interested!",
    "I'm 35 male, wife is 32, 2 kids",
    "Can you call me in April?",
    "Not interested, already have coverage",
    "How much does this cost?",
];

#[derive(Debug, Default, Deserialize)]
pub struct SimulateRequest {
    pub message: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
}

/// POST /api/simulate
///
/// Feeds a test message through the webhook pipeline. Without a message
/// one of a few canned samples is used.
pub async fn simulate(
    State(state): State<Arc<AppState>>,
    request: Option<Json<SimulateRequest>>,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let message = request.message.unwrap_or_else(|| {
        let index = Utc::now().timestamp_subsec_nanos() as usize % SIMULATED_MESSAGES.len();
        SIMULATED_MESSAGES[index].to_string()
    });

    let snapshot = WebhookPayload {
        phone: Some(request.phone.unwrap_or_else(|| "+15550000000".to_string())),
        full_name: Some(request.name.unwrap_or_else(|| "Test Lead".to_string())),
        messages_as_string: Some(message),
        ..WebhookPayload::default()
    }
    .into_snapshot()?;

    tracing::info!("Simulating webhook for {}", snapshot.phone);
    let response = ingest_snapshot(&state, snapshot).await?;
    Ok((StatusCode::OK, Json(response)))
}
