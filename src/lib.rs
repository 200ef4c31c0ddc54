//! Lead Intake API Library
//!
//! Turns CRM conversation snapshots into prioritized, ready-to-send reply
//! suggestions for a health insurance sales agent, and queues the resulting
//! messages and tags for the browser agent that works the CRM.
//!
//! # Modules
//!
//! - `api`: HTTP-facing handlers and routes.
//! - `core`: Pricing, classification and routing.
//! - `integrations`: External service clients and webhook models.
//! - `circuit_breaker`: Breaker and retry helpers for outbound calls.
//! - `classifier`: Rule-based intent detection.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema.
//! - `db_storage`: Lead stores and the cached repository.
//! - `dedup`: Webhook snapshot fingerprints.
//! - `errors`: Error handling types.
//! - `handlers`: Dashboard and queue handlers.
//! - `models`: Lead, message and tag models.
//! - `phone`: Phone number normalization.
//! - `query`: Keyword queries over leads.
//! - `quote`: Premium range calculation.
//! - `relay_client`: CRM tag relay client.
//! - `routes`: Router construction.
//! - `send_queue`: Message and tag queue transitions.
//! - `services`: Reply refinement and availability lookup.
//! - `settings`: Runtime toggles.
//! - `suggestion`: Suggestion building from classifications.
//! - `webhook_handler`: Conversation webhook pipeline.
//! - `webhook_models`: Webhook payload models.

pub mod api;
pub mod core;
pub mod integrations;

pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod phone;
pub mod query;
pub mod quote;
pub mod relay_client;
pub mod routes;
pub mod send_queue;
pub mod services;
pub mod settings;
pub mod suggestion;
pub mod webhook_handler;
pub mod webhook_models;
