//! Maps a classified message and the lead's quote state to a suggested reply.
//!
//! Every intent has two branches: one for leads that have not been quoted yet
//! and one for leads that already have a price. The quote branch defers its
//! "Quoted" tag to [`Suggestion::tag_on_send`] so the CRM is only tagged once
//! the operator has confirmed the quote went out.

use serde::Serialize;

use crate::classifier::{
    detect_intent, AgeGenderData, ClassificationResult, ClassifierContext, Intent,
};
use crate::config::Config;
use crate::models::{tags, Category, Lead, Priority};
use crate::quote::{calculate_quote, QuoteResult};

const ASK_AGE: &str =
    "For the private insurance, all I need is your age and I can get you an accurate quote!";
const ASK_AGE_GENDER: &str =
    "Alright, may I have the age and gender of everyone who will be insured?";
const PUSH_CALL: &str = "Awesome! The easiest way to lock in the best rate is a quick 5 minute call. What time works for you today or tomorrow?";
const BOOK_CALL: &str =
    "Perfect! What time works best for a quick call today or tomorrow? I'll give you a ring then.";
const INTRODUCTION: &str = "Hey! I'm a licensed agent helping folks find affordable private health plans. If you send me your age I can get you an exact price.";
const ANSWER_ON_CALL: &str =
    "Great question! It's easiest to go over on a quick call so I can pull up the exact plan details. When are you free?";
const GENTLE_NUDGE: &str = "No pressure at all! If you send me your age I'll get you a price so you have it for when you're ready.";
const QUOTED_NUDGE: &str =
    "No pressure! Happy to answer anything on a quick call whenever you have a few minutes.";

/// Reply templates that depend on deployment settings.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    pub referral_name: String,
    pub referral_phone: String,
    pub agent_name: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            referral_name: "Faith".to_string(),
            referral_phone: "+1 (352) 900-3966".to_string(),
            agent_name: "Jack".to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn from_config(config: &Config) -> Self {
        Self {
            referral_name: config.referral_name.clone(),
            referral_phone: config.referral_phone.clone(),
            agent_name: config.agent_name.clone(),
        }
    }

    pub fn quote(&self, low: u32, high: u32) -> String {
        format!(
            "Assuming you have no major chronic/critical conditions, you can qualify for plans between ${}-${}/month. Deductibles and networks are customizable with $50 copays for primary care, specialists, and urgent care; $250 for ER; $250 for outpatient surgeries; and $500 for inpatient stays. Maximum out of pocket 5k. Plans include free ACA-compliant preventive care (immunizations, physicals, mammograms, Pap smears, colonoscopies).",
            low, high
        )
    }

    pub fn medicare_referral(&self) -> String {
        format!(
            "We don't specialize in Medicare, but here is our referral. Her name is {}, she's been doing this for over a decade. Text her here {} or get on her calendar. PLEASE mention {} referred you!",
            self.referral_name, self.referral_phone, self.agent_name
        )
    }

    /// Whether an outgoing message is our quote template.
    pub fn is_quote_message(&self, text: &str) -> bool {
        text.contains("you can qualify for plans between $")
    }

    /// Whether an outgoing message is (or contains) the referral hand-off.
    pub fn is_referral_message(&self, text: &str) -> bool {
        let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
        // Compare on the national number so "+1 (352)..." matches "352-...".
        let all_digits = digits(&self.referral_phone);
        let referral_digits = &all_digits[all_digits.len().saturating_sub(10)..];
        let lower = text.to_lowercase();
        (!referral_digits.is_empty() && digits(text).contains(referral_digits))
            || (lower.contains(&self.referral_name.to_lowercase())
                && (lower.contains("medicare") || lower.contains("referral")))
    }
}

/// Lead state that changes how a message is routed.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub current_tag: Option<String>,
    pub quote_sent: bool,
    pub referral_sent: bool,
}

impl RoutingContext {
    pub fn is_quoted(&self) -> bool {
        self.current_tag.as_deref() == Some(tags::QUOTED) || self.quote_sent
    }
}

impl From<&Lead> for RoutingContext {
    fn from(lead: &Lead) -> Self {
        Self {
            current_tag: lead.current_tag.clone(),
            quote_sent: lead.quote_sent,
            referral_sent: lead.referral_sent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub classification: ClassificationResult,
    pub category: Category,
    pub priority: Priority,
    pub suggested_action: String,
    pub copy_message: Option<String>,
    /// Tag to request right away.
    pub tag_to_apply: Option<String>,
    /// Tag to request only after `copy_message` has been sent.
    pub tag_on_send: Option<String>,
    pub follow_up_date: Option<String>,
    pub quote: Option<QuoteResult>,
}

impl Suggestion {
    fn new(
        classification: ClassificationResult,
        category: Category,
        priority: Priority,
        suggested_action: impl Into<String>,
    ) -> Self {
        Self {
            classification,
            category,
            priority,
            suggested_action: suggested_action.into(),
            copy_message: None,
            tag_to_apply: None,
            tag_on_send: None,
            follow_up_date: None,
            quote: None,
        }
    }

    fn message(mut self, text: impl Into<String>) -> Self {
        self.copy_message = Some(text.into());
        self
    }

    fn tag(mut self, tag: &str) -> Self {
        self.tag_to_apply = Some(tag.to_string());
        self
    }

    fn tag_after_send(mut self, tag: &str) -> Self {
        self.tag_on_send = Some(tag.to_string());
        self
    }

    pub fn intent(&self) -> Intent {
        self.classification.intent
    }

    /// Copy the suggestion onto the lead's dashboard fields.
    ///
    /// Nothing is queued here; `tag_to_apply` only becomes a queued tag when
    /// auto-tagging or an operator requests it.
    pub fn apply_to(&self, lead: &mut Lead) {
        lead.intent = Some(self.classification.intent);
        lead.confidence = Some(self.classification.confidence);
        lead.category = self.category;
        lead.priority = self.priority;
        lead.suggested_action = Some(self.suggested_action.clone());
        lead.copy_message = self.copy_message.clone();
        lead.suggested_tag = self.tag_to_apply.clone();
        lead.tag_on_send = self.tag_on_send.clone();
        lead.follow_up_date = self.follow_up_date.clone();
        if self.quote.is_some() {
            lead.last_quote = self.quote;
        }
    }
}

/// Classify `message` and build the reply suggestion for it.
pub fn process_message(
    message: &str,
    context: &RoutingContext,
    templates: &MessageTemplates,
) -> Suggestion {
    let is_quoted = context.is_quoted();
    let classification = detect_intent(message, ClassifierContext { is_quoted });
    route(classification, context, templates)
}

/// Build the suggestion for an already classified message.
pub fn route(
    classification: ClassificationResult,
    context: &RoutingContext,
    templates: &MessageTemplates,
) -> Suggestion {
    let is_quoted = context.is_quoted();

    match classification.intent {
        Intent::ReadyToBook => {
            Suggestion::new(classification, Category::Hot, Priority::Urgent, "Book the call now")
                .message(BOOK_CALL)
                .tag(tags::APPOINTMENT_SET)
        }

        Intent::CallLater => {
            let follow_up = classification
                .follow_up_hint
                .clone()
                .unwrap_or_else(|| "Next month".to_string());
            let mut suggestion = Suggestion::new(
                classification,
                Category::Scheduled,
                Priority::Medium,
                format!("Schedule follow-up for {}", follow_up),
            )
            .tag(tags::FOLLOW_UP);
            suggestion.follow_up_date = Some(follow_up);
            suggestion
        }

        Intent::NotInterested => Suggestion::new(
            classification,
            Category::Dead,
            Priority::Low,
            "Remove from campaigns",
        )
        .tag(tags::DEAD),

        Intent::Medicare if context.referral_sent => Suggestion::new(
            classification,
            Category::Medicare,
            Priority::Low,
            "Referral already sent",
        ),

        Intent::Medicare => Suggestion::new(
            classification,
            Category::Medicare,
            Priority::Medium,
            format!("Send Medicare referral to {}", templates.referral_name),
        )
        .message(templates.medicare_referral())
        .tag(tags::MEDICARE_REFERRAL),

        Intent::GaveAgeGender => match classification.data.clone() {
            Some(data) => quote_suggestion(classification, &data, is_quoted, templates),
            None => Suggestion::new(
                classification,
                Category::Review,
                Priority::Low,
                "Review manually",
            ),
        },

        Intent::WantsQuote if is_quoted => Suggestion::new(
            classification,
            Category::Engaged,
            Priority::High,
            "Push toward booking a call",
        )
        .message(PUSH_CALL),

        Intent::WantsQuote => Suggestion::new(
            classification,
            Category::WantsQuote,
            Priority::High,
            "Send age/gender message",
        )
        .message(ASK_AGE_GENDER)
        .tag(tags::AGE_AND_GENDER),

        Intent::HasQuestion if is_quoted => Suggestion::new(
            classification,
            Category::Question,
            Priority::Medium,
            "Answer their question, offer a call",
        )
        .message(ANSWER_ON_CALL),

        Intent::HasQuestion => Suggestion::new(
            classification,
            Category::Question,
            Priority::Medium,
            "Answer their question",
        )
        .message(INTRODUCTION),

        Intent::SoftPositive if is_quoted => Suggestion::new(
            classification,
            Category::Nurture,
            Priority::Medium,
            "Keep warm, offer a call",
        )
        .message(QUOTED_NUDGE),

        Intent::SoftPositive => Suggestion::new(
            classification,
            Category::Nurture,
            Priority::Medium,
            "Keep warm, ask for age",
        )
        .message(GENTLE_NUDGE),

        Intent::Greeting if is_quoted => Suggestion::new(
            classification,
            Category::Review,
            Priority::Low,
            "Acknowledge",
        ),

        Intent::Greeting => Suggestion::new(
            classification,
            Category::WantsQuote,
            Priority::Medium,
            "Ask for age",
        )
        .message(ASK_AGE),

        Intent::Review => Suggestion::new(
            classification,
            Category::Review,
            Priority::Low,
            "Review manually",
        ),
    }
}

fn quote_suggestion(
    classification: ClassificationResult,
    data: &AgeGenderData,
    is_quoted: bool,
    templates: &MessageTemplates,
) -> Suggestion {
    let quote = calculate_quote(data.adults, data.kids, data.youngest_age);

    let mut suggestion = match quote.priced() {
        Some(priced) => {
            let action = format!(
                "{}: {} adult(s), {} kid(s), age bracket {}",
                if is_quoted { "Re-quote" } else { "Send quote" },
                data.adults,
                data.kids,
                priced.bracket.label()
            );
            let priority = if is_quoted {
                Priority::Medium
            } else {
                Priority::High
            };
            let suggestion =
                Suggestion::new(classification, Category::ReadyForQuote, priority, action)
                    .message(templates.quote(priced.low_price, priced.high_price));
            if is_quoted {
                suggestion
            } else {
                suggestion.tag_after_send(tags::QUOTED)
            }
        }
        None => Suggestion::new(
            classification,
            Category::Medicare,
            Priority::Medium,
            "Send Medicare referral",
        )
        .message(templates.medicare_referral())
        .tag(tags::MEDICARE_REFERRAL),
    };
    suggestion.quote = Some(quote);
    suggestion
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> RoutingContext {
        RoutingContext::default()
    }

    fn quoted() -> RoutingContext {
        RoutingContext {
            current_tag: Some(tags::QUOTED.to_string()),
            ..RoutingContext::default()
        }
    }

    #[test]
    fn test_age_gender_builds_quote_and_defers_tag() {
        let templates = MessageTemplates::default();
        let suggestion = process_message("42 female", &fresh(), &templates);

        assert_eq!(suggestion.intent(), Intent::GaveAgeGender);
        assert_eq!(suggestion.category, Category::ReadyForQuote);
        assert_eq!(suggestion.priority, Priority::High);
        assert!(suggestion.copy_message.as_deref().unwrap().contains("$249-$519"));
        assert_eq!(suggestion.tag_to_apply, None);
        assert_eq!(suggestion.tag_on_send.as_deref(), Some(tags::QUOTED));
    }

    #[test]
    fn test_requote_when_already_quoted_has_no_deferred_tag() {
        let suggestion = process_message("35 male", &quoted(), &MessageTemplates::default());
        assert_eq!(suggestion.category, Category::ReadyForQuote);
        assert_eq!(suggestion.tag_on_send, None);
        assert!(suggestion.suggested_action.starts_with("Re-quote"));
    }

    #[test]
    fn test_ready_to_book_is_hot() {
        let suggestion = process_message(
            "sounds good, when can we talk?",
            &quoted(),
            &MessageTemplates::default(),
        );
        assert_eq!(suggestion.category, Category::Hot);
        assert_eq!(suggestion.priority, Priority::Urgent);
        assert_eq!(suggestion.tag_to_apply.as_deref(), Some(tags::APPOINTMENT_SET));
    }

    #[test]
    fn test_quote_sent_flag_counts_as_quoted() {
        let ctx = RoutingContext {
            quote_sent: true,
            ..RoutingContext::default()
        };
        let suggestion = process_message("how much?", &ctx, &MessageTemplates::default());
        assert_eq!(suggestion.category, Category::Engaged);
        assert_eq!(suggestion.copy_message.as_deref(), Some(PUSH_CALL));
    }

    #[test]
    fn test_wants_quote_asks_for_age() {
        let suggestion = process_message("yes interested", &fresh(), &MessageTemplates::default());
        assert_eq!(suggestion.category, Category::WantsQuote);
        assert_eq!(suggestion.tag_to_apply.as_deref(), Some(tags::AGE_AND_GENDER));
        assert_eq!(suggestion.copy_message.as_deref(), Some(ASK_AGE_GENDER));
    }

    #[test]
    fn test_not_interested_is_dead_without_message() {
        let suggestion = process_message("not interested", &fresh(), &MessageTemplates::default());
        assert_eq!(suggestion.category, Category::Dead);
        assert_eq!(suggestion.copy_message, None);
        assert_eq!(suggestion.tag_to_apply.as_deref(), Some(tags::DEAD));
    }

    #[test]
    fn test_call_later_defaults_follow_up_date() {
        let templates = MessageTemplates::default();
        let suggestion = process_message("maybe later", &fresh(), &templates);
        assert_eq!(suggestion.category, Category::Scheduled);
        assert_eq!(suggestion.follow_up_date.as_deref(), Some("Next month"));

        let suggestion = process_message("text me in october", &fresh(), &templates);
        assert_eq!(suggestion.follow_up_date.as_deref(), Some("October"));
        assert_eq!(suggestion.tag_to_apply.as_deref(), Some(tags::FOLLOW_UP));
    }

    #[test]
    fn test_medicare_referral_sent_once() {
        let templates = MessageTemplates::default();
        let suggestion = process_message("I'm 67", &fresh(), &templates);
        assert_eq!(suggestion.category, Category::Medicare);
        assert_eq!(suggestion.tag_to_apply.as_deref(), Some(tags::MEDICARE_REFERRAL));
        let message = suggestion.copy_message.unwrap();
        assert!(message.contains("Faith"));
        assert!(templates.is_referral_message(&message));

        let ctx = RoutingContext {
            referral_sent: true,
            ..RoutingContext::default()
        };
        let suggestion = process_message("I'm 67", &ctx, &templates);
        assert_eq!(suggestion.priority, Priority::Low);
        assert_eq!(suggestion.copy_message, None);
        assert_eq!(suggestion.tag_to_apply, None);
    }

    #[test]
    fn test_review_default() {
        let suggestion = process_message(
            "the weather is nice today",
            &fresh(),
            &MessageTemplates::default(),
        );
        assert_eq!(suggestion.category, Category::Review);
        assert_eq!(suggestion.copy_message, None);
    }

    #[test]
    fn test_template_recognition() {
        let templates = MessageTemplates::default();
        assert!(templates.is_quote_message(&templates.quote(100, 200)));
        assert!(!templates.is_quote_message("hello"));
        assert!(templates.is_referral_message("call her at 352-900-3966"));
        assert!(!templates.is_referral_message("your quote is ready"));
    }

    #[test]
    fn test_apply_to_lead_keeps_quote_tag_deferred() {
        let templates = MessageTemplates::default();
        let mut lead = Lead::new("+15551234567", "Jane", chrono::Utc::now());
        let suggestion = process_message("42 female", &RoutingContext::from(&lead), &templates);
        suggestion.apply_to(&mut lead);

        assert_eq!(lead.category, Category::ReadyForQuote);
        assert_eq!(lead.intent, Some(Intent::GaveAgeGender));
        assert!(lead.copy_message.as_deref().is_some_and(|m| m.contains("$249-$519")));
        assert_eq!(lead.suggested_tag, None);
        assert_eq!(lead.tag_on_send.as_deref(), Some(tags::QUOTED));
        assert_eq!(lead.tag_to_apply, None);
        assert!(lead.last_quote.is_some());
    }
}
