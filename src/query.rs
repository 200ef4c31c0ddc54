//! Keyword search over stored leads for the dashboard's "ask" box.
//!
//! Not language understanding: the query is matched against a fixed
//! vocabulary of categories, priorities and flags, and whatever is left
//! is searched for in names, phones and message text.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{Category, Lead, Priority};

const CATEGORY_PHRASES: &[(&str, Category)] = &[
    ("ready for quote", Category::ReadyForQuote),
    ("ready for a quote", Category::ReadyForQuote),
    ("wants quote", Category::WantsQuote),
    ("wants a quote", Category::WantsQuote),
    ("want quotes", Category::WantsQuote),
    ("follow up", Category::Scheduled),
    ("follow ups", Category::Scheduled),
    ("follow-up", Category::Scheduled),
    ("hot", Category::Hot),
    ("engaged", Category::Engaged),
    ("questions", Category::Question),
    ("question", Category::Question),
    ("nurture", Category::Nurture),
    ("scheduled", Category::Scheduled),
    ("medicare", Category::Medicare),
    ("dead", Category::Dead),
    ("waiting", Category::Waiting),
    ("review", Category::Review),
];

const PRIORITY_PHRASES: &[(&str, Priority)] = &[
    ("urgent", Priority::Urgent),
    ("high priority", Priority::High),
    ("medium priority", Priority::Medium),
    ("low priority", Priority::Low),
];

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "any", "are", "asked", "by", "count", "did", "do", "does", "find", "for",
    "from", "get", "give", "have", "how", "i", "in", "is", "it", "lead", "leads", "list", "many",
    "me", "mention", "mentioned", "mentioning", "message", "messages", "my", "of", "on", "or",
    "people", "said", "say", "show", "that", "the", "them", "there", "to", "what", "which", "who",
    "with",
];

#[derive(Debug, Clone, Default, PartialEq)]
struct QueryFilter {
    categories: Vec<Category>,
    priorities: Vec<Priority>,
    blocked: bool,
    queued: bool,
    pending_tag: bool,
    quoted: Option<bool>,
    since: Option<DateTime<Utc>>,
    phone_digits: Option<String>,
    terms: Vec<String>,
    count_only: bool,
}

/// Compact lead view returned by the query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub phone: String,
    pub name: String,
    pub category: Category,
    pub priority: Priority,
    pub current_tag: Option<String>,
    pub last_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Lead> for LeadSummary {
    fn from(lead: &Lead) -> Self {
        Self {
            phone: lead.phone.clone(),
            name: lead.name.clone(),
            category: lead.category,
            priority: lead.priority,
            current_tag: lead.current_tag.clone(),
            last_message: lead.last_message().map(|m| m.text.clone()),
            updated_at: lead.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query: String,
    pub summary: String,
    pub count: usize,
    pub leads: Vec<LeadSummary>,
}

/// Run a keyword query. `leads` is expected newest first; order is kept.
pub fn run_query(query: &str, leads: &[Lead], now: DateTime<Utc>) -> QueryResult {
    let filter = parse_query(query, now);
    let matches: Vec<&Lead> = leads.iter().filter(|lead| filter.matches(lead)).collect();

    let count = matches.len();
    let summary = match count {
        0 => "No leads match".to_string(),
        1 => "1 lead matches".to_string(),
        n => format!("{} leads match", n),
    };
    let leads = if filter.count_only {
        Vec::new()
    } else {
        matches.into_iter().map(LeadSummary::from).collect()
    };

    QueryResult {
        query: query.to_string(),
        summary,
        count,
        leads,
    }
}

fn parse_query(query: &str, now: DateTime<Utc>) -> QueryFilter {
    let mut filter = QueryFilter::default();
    let normalized: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '+' { c } else { ' ' })
        .collect();
    let mut text = format!(" {} ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));

    if take_phrase(&mut text, "how many") || take_phrase(&mut text, "count") {
        filter.count_only = true;
    }
    if take_phrase(&mut text, "not quoted") || take_phrase(&mut text, "unquoted") {
        filter.quoted = Some(false);
    } else if take_phrase(&mut text, "quoted") {
        filter.quoted = Some(true);
    }
    if take_phrase(&mut text, "blocked") || take_phrase(&mut text, "opted out") {
        filter.blocked = true;
    }
    if take_phrase(&mut text, "queued") || take_phrase(&mut text, "in queue") {
        filter.queued = true;
    }
    if take_phrase(&mut text, "pending tags") || take_phrase(&mut text, "pending tag") {
        filter.pending_tag = true;
    }
    if take_phrase(&mut text, "today") {
        filter.since = Some(start_of_day(now));
    } else if take_phrase(&mut text, "this week") {
        filter.since = Some(now - Duration::days(7));
    }

    for (phrase, category) in CATEGORY_PHRASES {
        if take_phrase(&mut text, phrase) && !filter.categories.contains(category) {
            filter.categories.push(*category);
        }
    }
    for (phrase, priority) in PRIORITY_PHRASES {
        if take_phrase(&mut text, phrase) && !filter.priorities.contains(priority) {
            filter.priorities.push(*priority);
        }
    }

    for word in text.split_whitespace() {
        let digits: String = word.chars().filter(char::is_ascii_digit).collect();
        if digits.len() >= 3 && digits.len() == word.trim_start_matches('+').replace('-', "").len() {
            filter.phone_digits = Some(digits);
        } else if !STOP_WORDS.contains(&word) {
            filter.terms.push(word.to_string());
        }
    }

    filter
}

/// Remove a word-bounded phrase from `text`, returning whether it was present.
fn take_phrase(text: &mut String, phrase: &str) -> bool {
    let needle = format!(" {} ", phrase);
    if text.contains(&needle) {
        *text = text.replace(&needle, " ");
        true
    } else {
        false
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

impl QueryFilter {
    fn matches(&self, lead: &Lead) -> bool {
        if !self.categories.is_empty() && !self.categories.contains(&lead.category) {
            return false;
        }
        if !self.priorities.is_empty() && !self.priorities.contains(&lead.priority) {
            return false;
        }
        if self.blocked && !lead.blocked {
            return false;
        }
        if self.queued && lead.pending_message.is_none() {
            return false;
        }
        if self.pending_tag && !lead.has_pending_tag() {
            return false;
        }
        if let Some(quoted) = self.quoted {
            if lead.is_quoted() != quoted {
                return false;
            }
        }
        if let Some(since) = self.since {
            if lead.updated_at < since {
                return false;
            }
        }
        if let Some(ref digits) = self.phone_digits {
            let phone_digits: String = lead.phone.chars().filter(char::is_ascii_digit).collect();
            if !phone_digits.contains(digits.as_str()) {
                return false;
            }
        }
        self.terms.iter().all(|term| lead_mentions(lead, term))
    }
}

fn lead_mentions(lead: &Lead, term: &str) -> bool {
    lead.name.to_lowercase().contains(term)
        || lead
            .current_tag
            .as_deref()
            .is_some_and(|tag| tag.to_lowercase().contains(term))
        || lead
            .messages
            .iter()
            .any(|m| m.text.to_lowercase().contains(term))
        || lead.notes.iter().any(|n| n.text.to_lowercase().contains(term))
}
