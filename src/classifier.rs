//! Rule-based intent classification for inbound lead messages.
//!
//! Rules are evaluated in a fixed order and the first match wins. The order is
//! part of the contract: deferral language is checked before soft stop words so
//! that "no thanks, maybe later" stays a re-contactable follow-up, while hard
//! stop words ("stop", "unsubscribe") pre-empt everything.
//!
//! Classification is total: every input yields a result, falling back to
//! [`Intent::Review`] so unrecognised messages still reach a human.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::quote::MEDICARE_AGE;

/// Youngest-adult age assumed when a message carries no usable adult age.
pub const DEFAULT_YOUNGEST_AGE: u32 = 35;

const MIN_ADULT_AGE: u32 = 18;
const MAX_ADULT_AGE: u32 = 64;
const MAX_PLAUSIBLE_AGE: u32 = 99;
// "38 kids" in "40 wife 38 kids 8 and 10" is the wife's age, not a count.
const MAX_KID_COUNT: u32 = 10;
const GREETING_MAX_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReadyToBook,
    CallLater,
    NotInterested,
    Medicare,
    GaveAgeGender,
    WantsQuote,
    HasQuestion,
    SoftPositive,
    Greeting,
    Review,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ReadyToBook => "ready_to_book",
            Intent::CallLater => "call_later",
            Intent::NotInterested => "not_interested",
            Intent::Medicare => "medicare",
            Intent::GaveAgeGender => "gave_age_gender",
            Intent::WantsQuote => "wants_quote",
            Intent::HasQuestion => "has_question",
            Intent::SoftPositive => "soft_positive",
            Intent::Greeting => "greeting",
            Intent::Review => "review",
        }
    }
}

/// Household details pulled out of a free-text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeGenderData {
    pub adults: u32,
    pub kids: u32,
    pub youngest_age: u32,
    /// Every plausible age (18-99) in order of appearance, deduplicated.
    pub ages: Vec<u32>,
    pub has_medicare_age: bool,
    pub has_spouse: bool,
    pub just_me: bool,
}

impl AgeGenderData {
    /// Ages inside the window we price as adults.
    pub fn adult_ages(&self) -> impl Iterator<Item = u32> + '_ {
        self.ages
            .iter()
            .copied()
            .filter(|age| (MIN_ADULT_AGE..=MAX_ADULT_AGE).contains(age))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AgeGenderData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_hint: Option<String>,
}

impl ClassificationResult {
    fn new(intent: Intent, confidence: f64) -> Self {
        Self {
            intent,
            confidence,
            data: None,
            follow_up_hint: None,
        }
    }

    fn with_data(mut self, data: AgeGenderData) -> Self {
        self.data = Some(data);
        self
    }

    fn with_hint(mut self, hint: Option<String>) -> Self {
        self.follow_up_hint = hint;
        self
    }
}

/// Conversation state the classifier needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierContext {
    pub is_quoted: bool,
}

/// Builds `\b(?:a|b c|...)\b` from a phrase list; spaces match any whitespace run.
fn phrase_regex(phrases: &[&str]) -> Regex {
    let alternatives = phrases
        .iter()
        .map(|phrase| {
            phrase
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{})\b", alternatives)).expect("phrase list is a valid regex")
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("static pattern is a valid regex")
}

static HARD_STOP: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "stop",
        "unsubscribe",
        "wrong number",
        "remove me",
        "take me off",
        "leave me alone",
        "dont contact",
        "do not contact",
        "dont text",
        "do not text",
        "quit texting",
        "lose my number",
    ])
});

static READY_TO_BOOK: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "sounds good",
        "lets do it",
        "lets do this",
        "when can we talk",
        "when can you call",
        "can you call",
        "give me a call",
        "call me now",
        "im free",
        "i am free",
        "free now",
        "im available",
        "i am available",
        "available now",
        "lets talk",
        "set it up",
        "book it",
        "schedule",
        "sign me up",
        "im ready",
        "i am ready",
        "works for me",
        "that works",
        "im in",
    ])
});

static SHORT_AFFIRMATIVE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^\s*(?:yes|yeah|yep|yup|sure|ok|okay|absolutely|definitely)\b")
});

static DEFERRAL_DATED: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "next week",
        "next month",
        "next year",
        "tomorrow",
        "few weeks",
        "few days",
        "couple weeks",
        "couple days",
        "end of the month",
        "after the holidays",
    ])
});

static DEFERRAL_VAGUE: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "maybe",
        "later",
        "not now",
        "not right now",
        "not yet",
        "busy",
        "at work",
        "circle back",
        "get back to you",
        "check back",
    ])
});

// "may" alone is too common a word; only treat it as a month after a preposition.
static MONTH: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"\b(january|february|march|april|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b|\b(?:in|after|until|by|around|early|late|mid)\s+(may)\b",
    )
});

static SOFT_STOP: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "not interested",
        "no thanks",
        "no thank you",
        "no thx",
        "already have",
        "already covered",
        "already got",
        "all set",
        "all good",
        "im good",
        "i am good",
        "not looking",
        "dont need",
        "do not need",
        "dont want",
        "pass",
        "found a plan",
        "too expensive",
    ])
});

static SOFT_STOP_ONLY: Lazy<Regex> =
    Lazy::new(|| pattern(r"^\s*(?:no|nope|nah|not really|no sir|no maam)[\s.!]*$"));

static MEDICARE_WORDS: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "medicare",
        "turning 65",
        "turn 65",
        "over 65",
        "65 or older",
    ])
});

static LONE_AGE: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"^\s*(?:(?:male|female|man|woman|m|f)\s*)?(\d{1,2})\s*(?:yo|y/o|yrs?|years?(?:\s+old)?)?\s*(?:male|female|man|woman|guy|girl|m|f)?[\s.!]*$",
    )
});

static AGE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?:im|i am|age|aged|ages)\s*\d{1,2}\b|\b\d{1,2}\s*(?:years?|yrs?|yo|y/o)\b")
});

static GENDER: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(?:male|female|man|woman|guy|lady|gentleman)\b|\b\d{1,2}\s?[mf]\b")
});

static FAMILY: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "wife",
        "husband",
        "spouse",
        "partner",
        "married",
        "kid",
        "kids",
        "child",
        "children",
        "son",
        "sons",
        "daughter",
        "daughters",
        "family",
        "fiance",
        "fiancee",
    ])
});

static KID_COUNT: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(\d{1,2}|one|two|three|four|five|a)\s*(?:kids?|children|child|sons?|daughters?)\b")
});

static KID_NOUN: Lazy<Regex> =
    Lazy::new(|| phrase_regex(&["kid", "kids", "child", "children", "son", "sons", "daughter", "daughters"]));

static SPOUSE: Lazy<Regex> =
    Lazy::new(|| phrase_regex(&["wife", "husband", "spouse", "partner", "married"]));

static AND_MY: Lazy<Regex> = Lazy::new(|| pattern(r"\band\s+my\s+(\w+)"));

static JUST_ME: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "just me",
        "only me",
        "just myself",
        "only myself",
        "me only",
        "just for me",
        "only for me",
        "individual",
        "single",
    ])
});

static DIGITS: Lazy<Regex> = Lazy::new(|| pattern(r"\d+"));

static WANTS_QUOTE: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "yes",
        "yeah",
        "yea",
        "yep",
        "yup",
        "sure",
        "ok",
        "okay",
        "interested",
        "info",
        "information",
        "quote",
        "quotes",
        "price",
        "prices",
        "pricing",
        "cost",
        "costs",
        "how much",
        "tell me more",
        "more info",
        "sounds good",
        "lets do it",
        "sign me up",
        "help me",
        "need insurance",
        "need coverage",
        "looking for insurance",
        "looking for coverage",
        "want to know",
        "go ahead",
        "please",
        "absolutely",
        "definitely",
    ])
});

static INTERROGATIVE: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "who is this",
        "whos this",
        "who are you",
        "what company",
        "which company",
        "what is this",
        "whats this",
        "how did you get",
        "where did you get",
        "what kind of",
        "what type of",
        "does it cover",
        "does this cover",
        "is this legit",
        "what plans",
        "what carrier",
        "how does",
        "what does",
        "can you explain",
        "tell me about",
    ])
});

static SOFT_POSITIVE: Lazy<Regex> = Lazy::new(|| {
    phrase_regex(&[
        "possibly",
        "not sure",
        "not sure yet",
        "might",
        "perhaps",
        "thinking about it",
        "let me think",
        "ill think",
        "depends",
        "kinda",
        "probably",
        "well see",
        "idk",
        "unsure",
    ])
});

static GREETING: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"^(?:hi|hey|hello|hiya|howdy|yo|thanks|thank you|thx|ty|good morning|good afternoon|good evening|got it|cool)(?:\s+(?:there|again|you|so much))?[\s!.]*$",
    )
});

/// Words right after a number that mean it is not an age.
const NON_AGE_UNITS: &[&str] = &[
    "dollars", "dollar", "bucks", "k", "am", "pm", "percent", "cents", "min", "mins", "minutes",
    "hr", "hrs", "hours", "day", "days", "week", "weeks", "month", "months", "mo", "mos", "times",
];

/// Lowercase, unify apostrophes and drop them so "I'm" and "Im" match alike.
fn normalize(message: &str) -> String {
    message
        .to_lowercase()
        .replace(['\u{2018}', '\u{2019}', '\''], "")
}

fn word_number(word: &str) -> Option<u32> {
    match word {
        "a" | "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        other => other.parse().ok(),
    }
}

fn expand_month(token: &str) -> &'static str {
    match token {
        "jan" | "january" => "January",
        "feb" | "february" => "February",
        "mar" | "march" => "March",
        "apr" | "april" => "April",
        "may" => "May",
        "jun" | "june" => "June",
        "jul" | "july" => "July",
        "aug" | "august" => "August",
        "sep" | "sept" | "september" => "September",
        "oct" | "october" => "October",
        "nov" | "november" => "November",
        _ => "December",
    }
}

/// Bare one- or two-digit numbers that are not money, times, dates or units.
fn age_candidates(text: &str) -> Vec<u32> {
    let mut ages = Vec::new();

    for m in DIGITS.find_iter(text) {
        if m.as_str().len() > 2 {
            continue;
        }

        let mut before = text[..m.start()].chars().rev();
        match before.next() {
            Some('$' | '#' | '+') => continue,
            Some('.' | ',' | ':' | '/') if before.next().is_some_and(|c| c.is_ascii_digit()) => {
                continue
            }
            _ => {}
        }

        let after = &text[m.end()..];
        let mut after_chars = after.chars();
        match after_chars.next() {
            Some(':' | '/' | '%') => continue,
            Some('.' | ',') if after_chars.next().is_some_and(|c| c.is_ascii_digit()) => continue,
            _ => {}
        }

        let rest = after.trim_start();
        if rest.starts_with("a month") || rest.starts_with("per month") {
            continue;
        }
        let unit: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        if NON_AGE_UNITS.contains(&unit.as_str()) {
            continue;
        }

        if let Ok(age) = m.as_str().parse::<u32>() {
            if (MIN_ADULT_AGE..=MAX_PLAUSIBLE_AGE).contains(&age) && !ages.contains(&age) {
                ages.push(age);
            }
        }
    }

    ages
}

fn count_kids(text: &str) -> u32 {
    if let Some(count) = KID_COUNT
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| word_number(m.as_str()))
        .find(|count| *count <= MAX_KID_COUNT)
    {
        return count;
    }
    if KID_NOUN.is_match(text) {
        1
    } else {
        0
    }
}

fn mentions_spouse(text: &str) -> bool {
    if SPOUSE.is_match(text) {
        return true;
    }
    // "me and my wife" counts, "me and my kids" does not.
    AND_MY.captures_iter(text).any(|caps| {
        caps.get(1)
            .map(|word| !KID_NOUN.is_match(word.as_str()))
            .unwrap_or(false)
    })
}

fn parse_normalized(text: &str) -> AgeGenderData {
    let ages = age_candidates(text);
    let adult_ages: Vec<u32> = ages
        .iter()
        .copied()
        .filter(|age| (MIN_ADULT_AGE..=MAX_ADULT_AGE).contains(age))
        .collect();

    let has_spouse = mentions_spouse(text);
    let just_me = JUST_ME.is_match(text);

    let adults = if just_me {
        1
    } else {
        let stated = adult_ages.len() as u32;
        stated.max(if has_spouse { 2 } else { 1 })
    };

    AgeGenderData {
        adults,
        kids: count_kids(text),
        youngest_age: adult_ages
            .iter()
            .copied()
            .min()
            .unwrap_or(DEFAULT_YOUNGEST_AGE),
        has_medicare_age: ages.iter().any(|age| *age >= MEDICARE_AGE),
        ages,
        has_spouse,
        just_me,
    }
}

/// Extract ages, child count and spouse presence from a message.
pub fn parse_age_gender(message: &str) -> AgeGenderData {
    parse_normalized(&normalize(message))
}

/// `Some(hint)` when the message defers contact; the hint names a date if one was given.
fn deferral(text: &str) -> Option<Option<String>> {
    if let Some(caps) = MONTH.captures(text) {
        let month = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
        return Some(month.map(|m| expand_month(m).to_string()));
    }
    if let Some(m) = DEFERRAL_DATED.find(text) {
        return Some(Some(m.as_str().split_whitespace().collect::<Vec<_>>().join(" ")));
    }
    if DEFERRAL_VAGUE.is_match(text) {
        return Some(None);
    }
    None
}

fn gave_age(text: &str, data: &AgeGenderData) -> bool {
    if let Some(age) = LONE_AGE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
    {
        if (MIN_ADULT_AGE..=MAX_ADULT_AGE).contains(&age) {
            return true;
        }
    }

    let adult_count = data.adult_ages().count();
    if adult_count == 0 {
        return false;
    }

    adult_count >= 2
        || GENDER.is_match(text)
        || FAMILY.is_match(text)
        || AGE_STATEMENT.is_match(text)
}

/// Opt-out language that must block any further outreach.
pub fn is_hard_stop(message: &str) -> bool {
    HARD_STOP.is_match(normalize(message).trim())
}

/// Classify a single inbound message.
pub fn detect_intent(message: &str, context: ClassifierContext) -> ClassificationResult {
    let text = normalize(message);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return ClassificationResult::new(Intent::Review, 0.3);
    }

    if HARD_STOP.is_match(trimmed) {
        return ClassificationResult::new(Intent::NotInterested, 0.95);
    }

    if context.is_quoted && (READY_TO_BOOK.is_match(trimmed) || SHORT_AFFIRMATIVE.is_match(trimmed))
    {
        return ClassificationResult::new(Intent::ReadyToBook, 0.9);
    }

    if let Some(hint) = deferral(trimmed) {
        let confidence = if hint.is_some() { 0.9 } else { 0.8 };
        return ClassificationResult::new(Intent::CallLater, confidence).with_hint(hint);
    }

    if SOFT_STOP.is_match(trimmed) || SOFT_STOP_ONLY.is_match(trimmed) {
        return ClassificationResult::new(Intent::NotInterested, 0.9);
    }

    let data = parse_normalized(trimmed);

    if MEDICARE_WORDS.is_match(trimmed) || data.has_medicare_age {
        let result = ClassificationResult::new(Intent::Medicare, 0.9);
        return if data.ages.is_empty() {
            result
        } else {
            result.with_data(data)
        };
    }

    if gave_age(trimmed, &data) {
        return ClassificationResult::new(Intent::GaveAgeGender, 0.95).with_data(data);
    }

    if WANTS_QUOTE.is_match(trimmed) {
        return ClassificationResult::new(Intent::WantsQuote, 0.85);
    }

    if trimmed.contains('?') || INTERROGATIVE.is_match(trimmed) {
        return ClassificationResult::new(Intent::HasQuestion, 0.7);
    }

    if SOFT_POSITIVE.is_match(trimmed) {
        return ClassificationResult::new(Intent::SoftPositive, 0.6);
    }

    if trimmed.chars().count() <= GREETING_MAX_LEN && GREETING.is_match(trimmed) {
        return ClassificationResult::new(Intent::Greeting, 0.5);
    }

    ClassificationResult::new(Intent::Review, 0.3)
}
