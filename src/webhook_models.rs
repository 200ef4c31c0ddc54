use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Lead;

/// Body posted by the CRM scraper on every conversation change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// A single message, or a structured `id - direction - text - timestamp` log.
    #[serde(default)]
    pub messages_as_string: Option<String>,
    /// Older scraper builds send the text here instead.
    #[serde(default)]
    pub messages: Option<String>,
    /// Free-text CRM tag currently on the contact.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "isOutgoing", alias = "is_outgoing")]
    pub is_outgoing: Option<bool>,
    #[serde(default, rename = "hasReferral", alias = "has_referral")]
    pub has_referral: Option<bool>,
    #[serde(default, rename = "messageCount", alias = "message_count")]
    pub message_count: Option<usize>,
    #[serde(default, rename = "fullSync", alias = "full_sync")]
    pub full_sync: bool,
    #[serde(default, rename = "allMessages", alias = "all_messages")]
    pub all_messages: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("phone is required")]
    MissingPhone,
    #[error("fullSync requires a non-empty allMessages array")]
    EmptyFullSync,
    #[error("allMessages[{index}] is invalid: {reason}")]
    InvalidSyncEntry { index: usize, reason: String },
}

/// One message as the scraper saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub text: String,
    pub is_outgoing: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Message content of a snapshot, by the format that matched first.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotMessages {
    /// Bulk replacement of the whole conversation.
    FullSync(Vec<InboundMessage>),
    /// Structured log lines, oldest first; may overlap what is already stored.
    Log(Vec<InboundMessage>),
    /// The newest message only.
    Single(InboundMessage),
    /// Tag or name update without message content.
    StatusOnly,
}

/// A parsed, validated webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub phone: String,
    pub name: Option<String>,
    pub tag: Option<String>,
    pub has_referral: bool,
    pub message_count: Option<usize>,
    pub messages: SnapshotMessages,
}

impl Snapshot {
    /// Text of the newest message in the snapshot, if any.
    pub fn last_text(&self) -> Option<&str> {
        match &self.messages {
            SnapshotMessages::FullSync(messages) | SnapshotMessages::Log(messages) => {
                messages.last().map(|m| m.text.as_str())
            }
            SnapshotMessages::Single(message) => Some(message.text.as_str()),
            SnapshotMessages::StatusOnly => None,
        }
    }

    /// Reported message count, or the length of the carried log when the
    /// scraper left it out.
    pub fn effective_message_count(&self) -> Option<usize> {
        self.message_count.or(match &self.messages {
            SnapshotMessages::FullSync(messages) | SnapshotMessages::Log(messages) => {
                Some(messages.len())
            }
            SnapshotMessages::Single(_) | SnapshotMessages::StatusOnly => None,
        })
    }

    pub fn is_full_sync(&self) -> bool {
        matches!(self.messages, SnapshotMessages::FullSync(_))
    }
}

impl WebhookPayload {
    /// Display name from `full_name`, or `first_name last_name`.
    pub fn display_name(&self) -> Option<String> {
        if let Some(full) = self.full_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Some(full.to_string());
        }
        let joined = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    }

    /// Parse the payload into a snapshot.
    ///
    /// Formats are tried in order: full sync, structured log, single message,
    /// status only. The phone is returned raw; normalization happens in the
    /// handler so the error can name the bad value.
    pub fn into_snapshot(self) -> Result<Snapshot, PayloadError> {
        let phone = self
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(PayloadError::MissingPhone)?
            .to_string();
        let name = self.display_name();
        let tag = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let messages = if self.full_sync {
            SnapshotMessages::FullSync(parse_full_sync(self.all_messages.as_deref())?)
        } else {
            let blob = self
                .messages_as_string
                .as_deref()
                .or(self.messages.as_deref())
                .unwrap_or("");
            parse_message_blob(blob, self.is_outgoing.unwrap_or(false))
        };

        Ok(Snapshot {
            phone,
            name,
            tag,
            has_referral: self.has_referral.unwrap_or(false),
            message_count: self.message_count,
            messages,
        })
    }
}

fn parse_full_sync(entries: Option<&[Value]>) -> Result<Vec<InboundMessage>, PayloadError> {
    let entries = entries
        .filter(|e| !e.is_empty())
        .ok_or(PayloadError::EmptyFullSync)?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let invalid = |reason: &str| PayloadError::InvalidSyncEntry {
                index,
                reason: reason.to_string(),
            };
            let object = entry.as_object().ok_or_else(|| invalid("expected an object"))?;
            let text = object
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| invalid("missing text"))?;
            let is_outgoing = object
                .get("isOutgoing")
                .or_else(|| object.get("is_outgoing"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let timestamp = object
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp);
            Ok(InboundMessage {
                text: text.to_string(),
                is_outgoing,
                timestamp,
            })
        })
        .collect()
}

/// Structured log when every non-empty line parses, otherwise the last line
/// as a single message.
fn parse_message_blob(blob: &str, is_outgoing: bool) -> SnapshotMessages {
    let lines: Vec<&str> = blob.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return SnapshotMessages::StatusOnly;
    }

    let structured: Option<Vec<InboundMessage>> =
        lines.iter().map(|line| parse_log_line(line)).collect();
    if let Some(log) = structured {
        return SnapshotMessages::Log(log);
    }

    SnapshotMessages::Single(InboundMessage {
        text: lines[lines.len() - 1].to_string(),
        is_outgoing,
        timestamp: None,
    })
}

/// `id - direction - text - timestamp`; the text may itself contain ` - `.
fn parse_log_line(line: &str) -> Option<InboundMessage> {
    let parts: Vec<&str> = line.split(" - ").collect();
    if parts.len() < 4 {
        return None;
    }
    if parts[0].trim().is_empty() || parts[0].contains(char::is_whitespace) {
        return None;
    }
    let is_outgoing = match parts[1].trim().to_ascii_lowercase().as_str() {
        "out" | "outgoing" | "outbound" | "sent" => true,
        "in" | "incoming" | "inbound" | "received" => false,
        _ => return None,
    };
    let text = parts[2..parts.len() - 1].join(" - ").trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(InboundMessage {
        text,
        is_outgoing,
        timestamp: parse_timestamp(parts[parts.len() - 1]),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%m/%d/%Y %H:%M", "%m/%d/%Y %I:%M %p"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Response sent back to the scraper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead: Option<Lead>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookResponse {
    pub fn processed(lead: Lead) -> Self {
        Self {
            success: true,
            lead: Some(lead),
            duplicate: false,
            error: None,
        }
    }

    pub fn duplicate(lead: Lead) -> Self {
        Self {
            success: true,
            lead: Some(lead),
            duplicate: true,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> WebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_phone_is_rejected() {
        let err = payload(json!({ "messages_as_string": "hi" }))
            .into_snapshot()
            .unwrap_err();
        assert_eq!(err, PayloadError::MissingPhone);

        let err = payload(json!({ "phone": "  " })).into_snapshot().unwrap_err();
        assert_eq!(err, PayloadError::MissingPhone);
    }

    #[test]
    fn test_single_message() {
        let snapshot = payload(json!({
            "phone": "+15551234567",
            "first_name": "Jane",
            "last_name": "Doe",
            "messages_as_string": "I'm 42 female",
            "status": "Age and gender"
        }))
        .into_snapshot()
        .unwrap();

        assert_eq!(snapshot.name.as_deref(), Some("Jane Doe"));
        assert_eq!(snapshot.tag.as_deref(), Some("Age and gender"));
        assert_eq!(
            snapshot.messages,
            SnapshotMessages::Single(InboundMessage {
                text: "I'm 42 female".into(),
                is_outgoing: false,
                timestamp: None,
            })
        );
    }

    #[test]
    fn test_legacy_messages_field_uses_last_line() {
        let snapshot = payload(json!({
            "phone": "5551234567",
            "messages": "hello\nwhat does it cost?\n"
        }))
        .into_snapshot()
        .unwrap();
        assert_eq!(snapshot.last_text(), Some("what does it cost?"));
        assert!(matches!(snapshot.messages, SnapshotMessages::Single(_)));
    }

    #[test]
    fn test_structured_log() {
        let snapshot = payload(json!({
            "phone": "5551234567",
            "messages_as_string": "m1 - out - Hi Jane - this is Jack - 2025-03-01T10:00:00Z\nm2 - in - sure - 2025-03-01 10:05"
        }))
        .into_snapshot()
        .unwrap();

        let SnapshotMessages::Log(log) = snapshot.messages else {
            panic!("expected a structured log");
        };
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].text, "Hi Jane - this is Jack");
        assert!(log[0].is_outgoing);
        assert!(log[0].timestamp.is_some());
        assert_eq!(log[1].text, "sure");
        assert!(!log[1].is_outgoing);
        assert!(log[1].timestamp.is_some());
    }

    #[test]
    fn test_log_length_stands_in_for_missing_count() {
        let log = "1 - in - hi - 2025-03-01T10:00:00Z\n2 - out - hello - 2025-03-01T10:01:00Z";
        let snapshot = payload(json!({ "phone": "5551234567", "messages_as_string": log }))
            .into_snapshot()
            .unwrap();
        assert_eq!(snapshot.message_count, None);
        assert_eq!(snapshot.effective_message_count(), Some(2));

        let reported = payload(json!({
            "phone": "5551234567",
            "messages_as_string": log,
            "messageCount": 7
        }))
        .into_snapshot()
        .unwrap();
        assert_eq!(reported.effective_message_count(), Some(7));

        let single = payload(json!({ "phone": "5551234567", "messages_as_string": "hi" }))
            .into_snapshot()
            .unwrap();
        assert_eq!(single.effective_message_count(), None);
    }

    #[test]
    fn test_message_with_dashes_is_not_a_log() {
        let snapshot = payload(json!({
            "phone": "5551234567",
            "messages_as_string": "me - my wife - 2 kids - thanks"
        }))
        .into_snapshot()
        .unwrap();
        assert!(matches!(snapshot.messages, SnapshotMessages::Single(_)));
    }

    #[test]
    fn test_full_sync() {
        let snapshot = payload(json!({
            "phone": "5551234567",
            "fullSync": true,
            "allMessages": [
                { "text": "Hi", "isOutgoing": true },
                { "text": "35 male", "isOutgoing": false, "timestamp": "2025-03-01T10:00:00Z" }
            ]
        }))
        .into_snapshot()
        .unwrap();
        assert!(snapshot.is_full_sync());
        assert_eq!(snapshot.last_text(), Some("35 male"));
    }

    #[test]
    fn test_full_sync_rejects_bad_entries() {
        let err = payload(json!({ "phone": "5551234567", "fullSync": true }))
            .into_snapshot()
            .unwrap_err();
        assert_eq!(err, PayloadError::EmptyFullSync);

        let err = payload(json!({
            "phone": "5551234567",
            "fullSync": true,
            "allMessages": [{ "text": "ok" }, { "isOutgoing": true }]
        }))
        .into_snapshot()
        .unwrap_err();
        assert!(matches!(err, PayloadError::InvalidSyncEntry { index: 1, .. }));
    }

    #[test]
    fn test_status_only() {
        let snapshot = payload(json!({ "phone": "5551234567", "status": "Quoted", "hasReferral": true }))
            .into_snapshot()
            .unwrap();
        assert_eq!(snapshot.messages, SnapshotMessages::StatusOnly);
        assert!(snapshot.has_referral);
        assert_eq!(snapshot.last_text(), None);
    }
}
