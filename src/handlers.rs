use crate::classifier::Intent;
use crate::config::Config;
use crate::db_storage::{LeadRepository, LeadStore};
use crate::errors::AppError;
use crate::models::{Category, Lead, Priority};
use crate::phone::normalize_phone;
use crate::query::{run_query, QueryResult};
use crate::quote::{calculate_quote, QuoteResult};
use crate::relay_client::CrmRelayClient;
use crate::send_queue::{pending_tags, queued_messages, PendingTag, QueuedMessage};
use crate::services::{AvailableSlot, RefinedReply, ReplyRefiner, SchedulingClient};
use crate::settings::{RuntimeSettings, SettingsSnapshot, SettingsUpdate};
use crate::suggestion::{process_message, MessageTemplates, RoutingContext, Suggestion};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Lead storage with list cache and per-phone locks.
    pub leads: LeadRepository,
    /// Toggles the dashboard can flip at runtime.
    pub settings: RuntimeSettings,
    /// Reply templates filled from configuration.
    pub templates: MessageTemplates,
    /// Reply rewriting (no-op fallback when no API key is configured).
    pub refiner: ReplyRefiner,
    /// Availability lookup for booking replies.
    pub scheduler: SchedulingClient,
    /// Tag relay into the CRM (optional).
    pub relay: Option<CrmRelayClient>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn LeadStore>) -> Result<Self, AppError> {
        let leads = LeadRepository::new(store, Duration::from_secs(config.lead_cache_ttl_secs));
        let relay = match config.crm_relay_url.clone() {
            Some(url) => Some(CrmRelayClient::new(url, config.relay_retry_attempts)?),
            None => None,
        };

        Ok(Self {
            settings: RuntimeSettings::from_config(&config),
            templates: MessageTemplates::from_config(&config),
            refiner: ReplyRefiner::new(&config)?,
            scheduler: SchedulingClient::new(&config)?,
            relay,
            leads,
            config,
        })
    }

    /// Push a requested tag to the CRM relay in the background.
    ///
    /// Failures are logged by the relay client and never reach the caller.
    pub fn relay_tag(&self, lead: &Lead, tag: &str) {
        if !self.settings.sync_enabled() {
            tracing::debug!("Sync disabled, not relaying tag '{}' for {}", tag, lead.phone);
            return;
        }
        let Some(relay) = self.relay.clone() else {
            return;
        };
        let phone = lead.phone.clone();
        let name = lead.name.clone();
        let tag = tag.to_string();
        tokio::spawn(async move {
            if let Err(e) = relay.push_tag(&phone, &name, &tag).await {
                tracing::warn!("Tag relay for {} failed: {}", phone, e);
            }
        });
    }
}

/// Load, mutate and save one lead under its phone lock.
///
/// `apply` runs against the stored lead; the lead is touched and saved only
/// when it returns `Ok`.
pub async fn update_lead<R, F>(state: &AppState, phone: &str, apply: F) -> Result<(Lead, R), AppError>
where
    F: FnOnce(&mut Lead, DateTime<Utc>) -> Result<R, AppError>,
{
    let _guard = state.leads.lock_phone(phone).await;
    let mut lead = state.leads.require(phone).await?;
    let now = Utc::now();
    let result = apply(&mut lead, now)?;
    lead.touch(now);
    state.leads.upsert(&lead).await?;
    Ok((lead, result))
}

fn path_phone(raw: &str) -> Result<String, AppError> {
    Ok(normalize_phone(raw)?)
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-intake-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/test
///
/// Liveness plus the number of stored leads.
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let leads = state.leads.list_all().await?;
    Ok(Json(json!({
        "status": "Lead intake running",
        "leads": leads.len(),
        "settings": state.settings.snapshot(),
    })))
}

// ---------------------------------------------------------------------------
// Leads
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LeadListParams {
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub blocked: Option<bool>,
}

/// GET /api/leads
///
/// All leads, most recently updated first, optionally filtered.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeadListParams>,
) -> Result<Json<Vec<Lead>>, AppError> {
    let leads = state.leads.list_all().await?;
    let filtered = leads
        .iter()
        .filter(|l| params.category.map_or(true, |c| l.category == c))
        .filter(|l| params.priority.map_or(true, |p| l.priority == p))
        .filter(|l| params.blocked.map_or(true, |b| l.blocked == b))
        .cloned()
        .collect();
    Ok(Json(filtered))
}

/// GET /api/leads/:phone
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    Ok(Json(state.leads.require(&phone).await?))
}

/// DELETE /api/leads/:phone
pub async fn delete_lead(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let phone = path_phone(&phone)?;
    let _guard = state.leads.lock_phone(&phone).await;
    if !state.leads.delete(&phone).await? {
        return Err(AppError::NotFound(format!("Lead {} not found", phone)));
    }
    tracing::info!("Deleted lead {}", phone);
    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/leads
pub async fn clear_leads(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = state.leads.clear().await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

/// POST /api/leads/:phone/note
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(request): Json<NoteRequest>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let note = request.note.trim().to_string();
    if note.is_empty() {
        return Err(AppError::BadRequest("note cannot be empty".to_string()));
    }
    let (lead, ()) = update_lead(&state, &phone, |lead, now| {
        lead.add_note(note, now);
        Ok(())
    })
    .await?;
    Ok(Json(lead))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

/// POST /api/leads/:phone/action
///
/// Records what the operator did and marks the lead handled.
pub async fn log_action(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let action = request.action.trim().to_string();
    if action.is_empty() {
        return Err(AppError::BadRequest("action cannot be empty".to_string()));
    }
    let (lead, ()) = update_lead(&state, &phone, |lead, now| {
        lead.log_action(action, now);
        lead.status = "handled".to_string();
        Ok(())
    })
    .await?;
    Ok(Json(lead))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: Option<String>,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
}

/// POST /api/leads/:phone/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let (lead, ()) = update_lead(&state, &phone, |lead, _now| {
        if let Some(status) = request.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            lead.status = status.to_string();
        }
        if let Some(category) = request.category {
            lead.category = category;
        }
        if let Some(priority) = request.priority {
            lead.priority = priority;
        }
        Ok(())
    })
    .await?;
    Ok(Json(lead))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    #[serde(default = "default_true")]
    pub blocked: bool,
    pub reason: Option<String>,
}

fn default_true() -> bool {
    true
}

/// POST /api/leads/:phone/block
///
/// Blocking also drops any queued message.
pub async fn set_blocked(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(request): Json<BlockRequest>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let (lead, ()) = update_lead(&state, &phone, |lead, now| {
        if request.blocked {
            block_lead(
                lead,
                request.reason.as_deref().unwrap_or("Blocked by operator"),
                now,
            );
        } else {
            lead.blocked = false;
            lead.blocked_reason = None;
            lead.log_action("unblocked", now);
        }
        Ok(())
    })
    .await?;
    Ok(Json(lead))
}

pub(crate) fn block_lead(lead: &mut Lead, reason: &str, now: DateTime<Utc>) {
    lead.blocked = true;
    lead.blocked_reason = Some(reason.to_string());
    if lead.pending_message.take().is_some() {
        lead.queued_at = None;
        tracing::info!("Dropped queued message for blocked lead {}", lead.phone);
    }
    lead.copy_message = None;
    lead.log_action(format!("blocked: {}", reason), now);
}

// ---------------------------------------------------------------------------
// Send queue
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub phone: String,
    /// Defaults to the lead's current suggested reply.
    pub message: Option<String>,
}

/// POST /api/queue
pub async fn enqueue_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    let phone = normalize_phone(&request.phone)?;
    let (lead, ()) = update_lead(&state, &phone, |lead, now| {
        let text = request
            .message
            .clone()
            .or_else(|| lead.copy_message.clone())
            .ok_or_else(|| AppError::BadRequest("no message given and no suggestion to send".to_string()))?;
        lead.enqueue_message(&text, now)?;
        Ok(())
    })
    .await?;
    tracing::info!("Queued message for {}", phone);
    Ok((StatusCode::CREATED, Json(lead)))
}

/// GET /api/queue
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<QueuedMessage>>, AppError> {
    let leads = state.leads.list_all().await?;
    Ok(Json(queued_messages(leads.iter())))
}

/// GET /api/queue/next
///
/// Oldest queued message, or `null` when the queue is empty.
pub async fn next_queued(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<QueuedMessage>>, AppError> {
    let leads = state.leads.list_all().await?;
    Ok(Json(queued_messages(leads.iter()).into_iter().next()))
}

/// POST /api/queue/:phone/sent
pub async fn mark_sent(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let (lead, requested_tag) = update_lead(&state, &phone, |lead, now| {
        let deferred_tag = lead.tag_on_send.clone();
        lead.mark_sent(&state.templates, now)?;
        Ok(deferred_tag)
    })
    .await?;

    tracing::info!("Message to {} acknowledged as sent", phone);
    if let Some(tag) = requested_tag {
        state.relay_tag(&lead, &tag);
    }
    Ok(Json(lead))
}

#[derive(Debug, Default, Deserialize)]
pub struct FailureRequest {
    #[serde(default)]
    pub reason: String,
}

/// POST /api/queue/:phone/failed
pub async fn mark_failed(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(request): Json<FailureRequest>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let (lead, ()) = update_lead(&state, &phone, |lead, now| {
        lead.record_send_failure(&request.reason, now)?;
        Ok(())
    })
    .await?;
    tracing::warn!("Agent reported failed send to {}: {}", phone, request.reason);
    Ok(Json(lead))
}

/// DELETE /api/queue/:phone
pub async fn cancel_queued(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let (lead, _) = update_lead(&state, &phone, |lead, now| Ok(lead.cancel_message(now)?)).await?;
    Ok(Json(lead))
}

// ---------------------------------------------------------------------------
// Tag queue
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub phone: String,
    /// Defaults to the lead's suggested tag.
    pub tag: Option<String>,
}

/// POST /api/tags
pub async fn enqueue_tag(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TagRequest>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    let phone = normalize_phone(&request.phone)?;
    let (lead, tag) = update_lead(&state, &phone, |lead, now| {
        let tag = request
            .tag
            .clone()
            .or_else(|| lead.suggested_tag.clone())
            .ok_or_else(|| AppError::BadRequest("no tag given and no tag suggested".to_string()))?;
        lead.request_tag(&tag, now)?;
        Ok(tag)
    })
    .await?;

    state.relay_tag(&lead, &tag);
    Ok((StatusCode::CREATED, Json(lead)))
}

/// GET /api/tags/pending
pub async fn list_pending_tags(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PendingTag>>, AppError> {
    let leads = state.leads.list_all().await?;
    Ok(Json(pending_tags(leads.iter())))
}

/// GET /api/tags/next
pub async fn next_pending_tag(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<PendingTag>>, AppError> {
    let leads = state.leads.list_all().await?;
    Ok(Json(pending_tags(leads.iter()).into_iter().next()))
}

/// POST /api/tags/:phone/applied
pub async fn mark_tag_applied(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Result<Json<Lead>, AppError> {
    let phone = path_phone(&phone)?;
    let (lead, tag) = update_lead(&state, &phone, |lead, now| Ok(lead.mark_tag_applied(now)?)).await?;
    tracing::info!("Tag '{}' applied for {}", tag, phone);
    Ok(Json(lead))
}

// ---------------------------------------------------------------------------
// Settings, query and previews
// ---------------------------------------------------------------------------

/// GET /api/settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsSnapshot> {
    Json(state.settings.snapshot())
}

/// POST /api/settings
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SettingsSnapshot> {
    Json(state.settings.apply(update))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// POST /api/query
pub async fn query_leads(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    if request.query.trim().is_empty() {
        return Err(AppError::BadRequest("query cannot be empty".to_string()));
    }
    let leads = state.leads.list_all().await?;
    let result = run_query(&request.query, &leads, Utc::now());
    tracing::debug!("Query '{}' matched {} leads", request.query, result.count);
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub kids: u32,
    pub age: u32,
}

fn default_adults() -> u32 {
    1
}

/// GET /api/quote?adults=&kids=&age=
pub async fn quote_preview(Query(params): Query<QuoteParams>) -> Json<QuoteResult> {
    Json(calculate_quote(params.adults, params.kids, params.age))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub message: String,
    #[serde(default)]
    pub current_tag: Option<String>,
    #[serde(default)]
    pub quote_sent: bool,
    #[serde(default)]
    pub referral_sent: bool,
}

/// POST /api/classify
///
/// Runs the classifier and router without touching any lead.
pub async fn classify_preview(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassifyRequest>,
) -> Json<Suggestion> {
    let context = RoutingContext {
        current_tag: request.current_tag,
        quote_sent: request.quote_sent,
        referral_sent: request.referral_sent,
    };
    Json(process_message(&request.message, &context, &state.templates))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    pub by_category: BTreeMap<&'static str, usize>,
    pub by_priority: BTreeMap<&'static str, usize>,
    pub by_intent: BTreeMap<&'static str, usize>,
    pub queued: usize,
    pub pending_tags: usize,
    pub blocked: usize,
    pub quoted: usize,
}

pub fn compute_stats(leads: &[Lead]) -> Stats {
    let mut by_category: BTreeMap<&'static str, usize> =
        Category::ALL.iter().map(|c| (c.as_str(), 0)).collect();
    let mut by_priority = BTreeMap::new();
    let mut by_intent = BTreeMap::new();

    for lead in leads {
        *by_category.entry(lead.category.as_str()).or_insert(0) += 1;
        *by_priority.entry(lead.priority.as_str()).or_insert(0) += 1;
        if let Some(intent) = lead.intent {
            *by_intent.entry(Intent::as_str(&intent)).or_insert(0) += 1;
        }
    }

    Stats {
        total: leads.len(),
        by_category,
        by_priority,
        by_intent,
        queued: leads.iter().filter(|l| l.pending_message.is_some()).count(),
        pending_tags: leads.iter().filter(|l| l.has_pending_tag()).count(),
        blocked: leads.iter().filter(|l| l.blocked).count(),
        quoted: leads.iter().filter(|l| l.is_quoted()).count(),
    }
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, AppError> {
    let leads = state.leads.list_all().await?;
    Ok(Json(compute_stats(&leads)))
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub original: String,
    pub instruction: String,
    #[serde(default)]
    pub context: Option<String>,
}

/// POST /api/adjust-suggestion
///
/// Rewrites a suggested reply. Any refinement failure returns the original.
pub async fn adjust_suggestion(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<RefinedReply>, AppError> {
    if request.original.trim().is_empty() || request.instruction.trim().is_empty() {
        return Err(AppError::BadRequest(
            "original and instruction are required".to_string(),
        ));
    }
    let context = request.context.as_deref().unwrap_or("the lead");
    let reply = state
        .refiner
        .refine_or_original(&request.original, &request.instruction, context)
        .await;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    7
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub enabled: bool,
    pub slots: Vec<AvailableSlot>,
}

/// GET /api/availability
///
/// Scheduling failures yield an empty slot list.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AvailabilityParams>,
) -> Json<AvailabilityResponse> {
    if !state.scheduler.is_enabled() {
        return Json(AvailabilityResponse {
            enabled: false,
            slots: Vec::new(),
        });
    }
    let slots = match state.scheduler.available_slots(params.days).await {
        Ok(slots) => slots,
        Err(e) => {
            tracing::warn!("Availability lookup failed: {}", e);
            Vec::new()
        }
    };
    Json(AvailabilityResponse {
        enabled: true,
        slots,
    })
}
