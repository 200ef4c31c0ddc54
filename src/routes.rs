use crate::handlers::{self, AppState};
use crate::webhook_handler;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// Every route except `/health`, before rate limiting is layered on.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Ingestion
        .route("/webhook/salesgod", post(webhook_handler::salesgod_webhook))
        .route("/api/simulate", post(webhook_handler::simulate))
        .route("/api/test", get(handlers::system_status))
        // Leads
        .route(
            "/api/leads",
            get(handlers::list_leads).delete(handlers::clear_leads),
        )
        .route(
            "/api/leads/:phone",
            get(handlers::get_lead).delete(handlers::delete_lead),
        )
        .route("/api/leads/:phone/note", post(handlers::add_note))
        .route("/api/leads/:phone/action", post(handlers::log_action))
        .route("/api/leads/:phone/status", post(handlers::update_status))
        .route("/api/leads/:phone/block", post(handlers::set_blocked))
        // Send queue
        .route(
            "/api/queue",
            post(handlers::enqueue_message).get(handlers::list_queue),
        )
        .route("/api/queue/next", get(handlers::next_queued))
        .route("/api/queue/:phone", delete(handlers::cancel_queued))
        .route("/api/queue/:phone/sent", post(handlers::mark_sent))
        .route("/api/queue/:phone/failed", post(handlers::mark_failed))
        // Tag queue
        .route("/api/tags", post(handlers::enqueue_tag))
        .route("/api/tags/pending", get(handlers::list_pending_tags))
        .route("/api/tags/next", get(handlers::next_pending_tag))
        .route("/api/tags/:phone/applied", post(handlers::mark_tag_applied))
        // Dashboard
        .route(
            "/api/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .route("/api/query", post(handlers::query_leads))
        .route("/api/quote", get(handlers::quote_preview))
        .route("/api/classify", post(handlers::classify_preview))
        .route("/api/stats", get(handlers::stats))
        .route("/api/adjust-suggestion", post(handlers::adjust_suggestion))
        .route("/api/availability", get(handlers::availability))
}

/// Full router without rate limiting or body limits.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes())
        .with_state(state)
}
