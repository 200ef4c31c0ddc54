use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{ClassificationResult, Intent};
use crate::quote::QuoteResult;

/// CRM tag labels this service suggests or applies.
pub mod tags {
    pub const QUOTED: &str = "Quoted";
    pub const AGE_AND_GENDER: &str = "Age and gender";
    pub const FOLLOW_UP: &str = "Follow up";
    pub const GHOSTED: &str = "Ghosted";
    pub const DEADLINE: &str = "Deadline";
    pub const SOLD: &str = "Sold";
    pub const APPOINTMENT_SET: &str = "Appointment Set";
    pub const DEAD: &str = "Dead";
    pub const MEDICARE_REFERRAL: &str = "Medicare Referral";

    /// Tags the CRM exposes, in the order the scraper looks for them.
    pub const KNOWN: &[&str] = &[
        QUOTED,
        AGE_AND_GENDER,
        FOLLOW_UP,
        GHOSTED,
        DEADLINE,
        SOLD,
        APPOINTMENT_SET,
        DEAD,
        MEDICARE_REFERRAL,
    ];

    /// Case-insensitive match against the known tags, returning the canonical label.
    pub fn canonical(tag: &str) -> Option<&'static str> {
        let tag = tag.trim();
        KNOWN.iter().copied().find(|known| known.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Hot,
    ReadyForQuote,
    WantsQuote,
    Engaged,
    Question,
    Nurture,
    Scheduled,
    Medicare,
    Dead,
    Waiting,
    #[default]
    Review,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Hot,
        Category::ReadyForQuote,
        Category::WantsQuote,
        Category::Engaged,
        Category::Question,
        Category::Nurture,
        Category::Scheduled,
        Category::Medicare,
        Category::Dead,
        Category::Waiting,
        Category::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hot => "hot",
            Category::ReadyForQuote => "ready_for_quote",
            Category::WantsQuote => "wants_quote",
            Category::Engaged => "engaged",
            Category::Question => "question",
            Category::Nurture => "nurture",
            Category::Scheduled => "scheduled",
            Category::Medicare => "medicare",
            Category::Dead => "dead",
            Category::Waiting => "waiting",
            Category::Review => "review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// One entry in a lead's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub is_outgoing: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
}

impl Message {
    pub fn incoming(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_outgoing: false,
            timestamp,
            classification: None,
        }
    }

    pub fn outgoing(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_outgoing: true,
            timestamp,
            classification: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEntry {
    pub id: Uuid,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// A prospective customer, keyed by normalized phone number.
///
/// Persisted as a single JSON document per phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub phone: String,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub current_tag: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub suggested_action: Option<String>,
    #[serde(default)]
    pub copy_message: Option<String>,
    #[serde(default)]
    pub suggested_tag: Option<String>,
    /// Tag to request once the current suggestion has actually been sent.
    #[serde(default)]
    pub tag_on_send: Option<String>,
    #[serde(default)]
    pub follow_up_date: Option<String>,
    #[serde(default)]
    pub last_quote: Option<QuoteResult>,

    // Tag queue
    #[serde(default)]
    pub tag_to_apply: Option<String>,
    #[serde(default)]
    pub tag_applied: bool,
    #[serde(default)]
    pub tag_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tag_applied_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub quote_sent: bool,
    #[serde(default)]
    pub referral_sent: bool,

    // Send queue
    #[serde(default)]
    pub pending_message: Option<String>,
    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
    #[serde(default)]
    pub last_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

fn default_status() -> String {
    "new".to_string()
}

impl Lead {
    pub fn new(phone: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            phone: phone.into(),
            name: name.into(),
            messages: Vec::new(),
            current_tag: None,
            status: default_status(),
            category: Category::Review,
            priority: Priority::Low,
            intent: None,
            confidence: None,
            suggested_action: None,
            copy_message: None,
            suggested_tag: None,
            tag_on_send: None,
            follow_up_date: None,
            last_quote: None,
            tag_to_apply: None,
            tag_applied: false,
            tag_requested_at: None,
            tag_applied_at: None,
            blocked: false,
            blocked_reason: None,
            quote_sent: false,
            referral_sent: false,
            pending_message: None,
            queued_at: None,
            notes: Vec::new(),
            actions: Vec::new(),
            last_fingerprint: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Quoted either by CRM tag or by a quote we sent ourselves.
    pub fn is_quoted(&self) -> bool {
        self.current_tag.as_deref() == Some(tags::QUOTED) || self.quote_sent
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn add_note(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.notes.push(Note {
            id: Uuid::new_v4(),
            text: text.into(),
            timestamp: now,
        });
    }

    pub fn log_action(&mut self, action: impl Into<String>, now: DateTime<Utc>) {
        self.actions.push(ActionEntry {
            id: Uuid::new_v4(),
            action: action.into(),
            timestamp: now,
        });
    }

    /// Stamp a mutation; called once per read-modify-write cycle.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}
