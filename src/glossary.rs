//! Domain vocabulary canonicalization.
//!
//! Maps sentiment, channel and priority synonyms onto the fixed values
//! stored in the index. Other entity categories have no table and are only
//! lower-cased.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::query::EntityCategory;

/// Canonical sentiment values.
pub const SENTIMENTS: &[&str] = &["negative", "neutral", "positive"];
/// Canonical channel values.
pub const CHANNELS: &[&str] = &["email", "phone", "chat", "sms", "social", "letter"];
/// Canonical priority values.
pub const PRIORITIES: &[&str] = &["critical", "high", "medium", "low"];

const SENTIMENT_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "negative",
        &[
            "negative", "neg", "bad", "angry", "unhappy", "upset", "frustrated",
            "dissatisfied", "annoyed", "complaint", "complaints", "hostile",
        ],
    ),
    (
        "neutral",
        &["neutral", "neu", "mixed", "indifferent", "ok", "okay", "so-so"],
    ),
    (
        "positive",
        &[
            "positive", "pos", "good", "happy", "satisfied", "pleased", "delighted",
            "grateful", "praise", "compliment",
        ],
    ),
];

const CHANNEL_SYNONYMS: &[(&str, &[&str])] = &[
    ("email", &["email", "emails", "e-mail", "e-mails", "mail", "inbox"]),
    (
        "phone",
        &["phone", "phones", "call", "calls", "voice", "telephone", "phone call", "phone calls"],
    ),
    (
        "chat",
        &["chat", "chats", "live chat", "webchat", "web chat", "messaging", "im"],
    ),
    ("sms", &["sms", "text", "texts", "text message", "text messages"]),
    (
        "social",
        &["social", "social media", "twitter", "tweet", "tweets", "facebook", "x", "instagram"],
    ),
    ("letter", &["letter", "letters", "post", "postal"]),
];

const PRIORITY_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "critical",
        &["critical", "urgent", "p0", "p1", "sev1", "blocker", "emergency"],
    ),
    ("high", &["high", "important", "p2", "sev2", "elevated"]),
    ("medium", &["medium", "normal", "p3", "sev3", "moderate", "standard"]),
    ("low", &["low", "minor", "p4", "sev4", "trivial"]),
];

static SENTIMENT_TABLE: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| build_table(SENTIMENT_SYNONYMS));
static CHANNEL_TABLE: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| build_table(CHANNEL_SYNONYMS));
static PRIORITY_TABLE: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| build_table(PRIORITY_SYNONYMS));

fn build_table(
    synonyms: &'static [(&'static str, &'static [&'static str])],
) -> HashMap<&'static str, &'static str> {
    synonyms
        .iter()
        .flat_map(|(canonical, terms)| terms.iter().map(move |term| (*term, *canonical)))
        .collect()
}

/// Canonicalizes entity values using the static glossary tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlossaryMapper;

impl GlossaryMapper {
    pub fn new() -> Self {
        Self
    }

    /// Look up the canonical value for a term, if the category has a table
    /// and the term is in it.
    pub fn canonical(&self, category: EntityCategory, value: &str) -> Option<&'static str> {
        let table = match category {
            EntityCategory::Sentiments => &*SENTIMENT_TABLE,
            EntityCategory::Channels => &*CHANNEL_TABLE,
            EntityCategory::Priorities => &*PRIORITY_TABLE,
            _ => return None,
        };
        let key = value.trim().to_lowercase();
        table.get(key.as_str()).copied()
    }

    /// Canonical value, or a trimmed lower-cased copy when unmapped.
    pub fn normalize(&self, category: EntityCategory, value: &str) -> String {
        self.canonical(category, value)
            .map(str::to_string)
            .unwrap_or_else(|| value.trim().to_lowercase())
    }

    /// Glossary section for reasoning prompts.
    pub fn prompt_text(&self) -> String {
        let mut out = String::from("Domain glossary (use canonical values on the left):\n");
        for (label, synonyms) in [
            ("sentiments", SENTIMENT_SYNONYMS),
            ("channels", CHANNEL_SYNONYMS),
            ("priorities", PRIORITY_SYNONYMS),
        ] {
            out.push_str(&format!("- {}:\n", label));
            for (canonical, terms) in synonyms {
                let aliases: Vec<&str> = terms.iter().copied().filter(|t| t != canonical).collect();
                out.push_str(&format!("    {} <- {}\n", canonical, aliases.join(", ")));
            }
        }
        out
    }
}
