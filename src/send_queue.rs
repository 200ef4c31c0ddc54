//! Outbound message and tag queue.
//!
//! A lead carries at most one pending outbound message (`pending_message` +
//! `queued_at`) and at most one pending tag (`tag_to_apply` with
//! `tag_applied == false`). The scraping agent polls these, performs them in
//! the CRM UI and acknowledges. Nothing is retried server side: an item stays
//! queued until it is acknowledged or cancelled.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Category, Lead, Message};
use crate::suggestion::MessageTemplates;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("tag is empty")]
    EmptyTag,
    #[error("lead is blocked: {0}")]
    Blocked(String),
    #[error("no message is queued for this lead")]
    NothingQueued,
    #[error("no tag is pending for this lead")]
    NoPendingTag,
}

/// Queue item as served to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub phone: String,
    pub name: String,
    pub message: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTag {
    pub phone: String,
    pub name: String,
    pub tag: String,
    pub requested_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// Queue `text` for sending, replacing any message already pending.
    pub fn enqueue_message(&mut self, text: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        if self.blocked {
            return Err(QueueError::Blocked(
                self.blocked_reason.clone().unwrap_or_else(|| "blocked".to_string()),
            ));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(QueueError::EmptyMessage);
        }
        if self.pending_message.is_some() {
            tracing::debug!("Replacing queued message for {}", self.phone);
        }
        self.pending_message = Some(text.to_string());
        self.queued_at = Some(now);
        self.log_action("message queued", now);
        Ok(())
    }

    /// Acknowledge that the pending message went out.
    ///
    /// Appends the outgoing message, clears the queue slot, moves the lead to
    /// `waiting` and requests any tag deferred until send.
    pub fn mark_sent(
        &mut self,
        templates: &MessageTemplates,
        now: DateTime<Utc>,
    ) -> Result<String, QueueError> {
        let text = self.pending_message.take().ok_or(QueueError::NothingQueued)?;
        self.queued_at = None;

        if templates.is_quote_message(&text) {
            self.quote_sent = true;
        }
        if templates.is_referral_message(&text) {
            self.referral_sent = true;
        }

        self.messages.push(Message::outgoing(text.clone(), now));
        self.category = Category::Waiting;
        self.copy_message = None;
        if let Some(tag) = self.tag_on_send.take() {
            self.request_tag(&tag, now)?;
        }
        self.log_action("message sent", now);
        Ok(text)
    }

    /// Record a failed send attempt. The message stays queued.
    pub fn record_send_failure(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        if self.pending_message.is_none() {
            return Err(QueueError::NothingQueued);
        }
        let reason = reason.trim();
        let entry = if reason.is_empty() {
            "send failed".to_string()
        } else {
            format!("send failed: {}", reason)
        };
        self.log_action(entry, now);
        Ok(())
    }

    pub fn cancel_message(&mut self, now: DateTime<Utc>) -> Result<String, QueueError> {
        let text = self.pending_message.take().ok_or(QueueError::NothingQueued)?;
        self.queued_at = None;
        self.log_action("queued message cancelled", now);
        Ok(text)
    }

    /// Put `tag` in the tag queue, replacing any tag not yet applied.
    pub fn request_tag(&mut self, tag: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(QueueError::EmptyTag);
        }
        self.tag_to_apply = Some(tag.to_string());
        self.tag_applied = false;
        self.tag_requested_at = Some(now);
        self.tag_applied_at = None;
        Ok(())
    }

    pub fn has_pending_tag(&self) -> bool {
        self.tag_to_apply.is_some() && !self.tag_applied
    }

    /// Acknowledge the pending tag. `tag_to_apply` is kept for audit.
    pub fn mark_tag_applied(&mut self, now: DateTime<Utc>) -> Result<String, QueueError> {
        if !self.has_pending_tag() {
            return Err(QueueError::NoPendingTag);
        }
        let tag = self.tag_to_apply.clone().ok_or(QueueError::NoPendingTag)?;
        self.tag_applied = true;
        self.tag_applied_at = Some(now);
        self.current_tag = Some(tag.clone());
        self.log_action(format!("tag applied: {}", tag), now);
        Ok(tag)
    }

    pub fn queued_message(&self) -> Option<QueuedMessage> {
        Some(QueuedMessage {
            phone: self.phone.clone(),
            name: self.name.clone(),
            message: self.pending_message.clone()?,
            queued_at: self.queued_at?,
        })
    }

    pub fn pending_tag(&self) -> Option<PendingTag> {
        if !self.has_pending_tag() {
            return None;
        }
        Some(PendingTag {
            phone: self.phone.clone(),
            name: self.name.clone(),
            tag: self.tag_to_apply.clone()?,
            requested_at: self.tag_requested_at,
        })
    }
}

/// All queued messages, oldest first. Blocked leads are skipped.
pub fn queued_messages<'a>(leads: impl IntoIterator<Item = &'a Lead>) -> Vec<QueuedMessage> {
    let mut queue: Vec<QueuedMessage> = leads
        .into_iter()
        .filter(|lead| !lead.blocked)
        .filter_map(Lead::queued_message)
        .collect();
    queue.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
    queue
}

/// All pending tags, oldest request first.
pub fn pending_tags<'a>(leads: impl IntoIterator<Item = &'a Lead>) -> Vec<PendingTag> {
    let mut tags: Vec<PendingTag> = leads.into_iter().filter_map(Lead::pending_tag).collect();
    tags.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
    tags
}
