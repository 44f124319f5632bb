//! Follow-up suggestion derivation.
//!
//! A small deterministic heuristic: scan the reply and the user's message
//! for topic keywords, skip topics the conversation already covered, and
//! offer up to three follow-up questions. The exact wording is not
//! load-bearing, so the heuristic sits behind a strategy trait and can be
//! swapped without touching the handler.

use crate::types::HistoryItem;

/// At most this many suggestions per reply.
pub const MAX_SUGGESTIONS: usize = 3;

/// Fallback offered when nothing in the exchange matched a topic.
const GENERIC_SUGGESTIONS: [&str; 3] = [
    "What is Michael's professional background?",
    "What are Michael's key achievements?",
    "How can I get in touch with Michael?",
];

/// Derives follow-up questions from a completed exchange.
pub trait SuggestionStrategy: Send + Sync {
    fn suggest(&self, reply: &str, message: &str, history: &[HistoryItem]) -> Vec<String>;
}

struct Topic {
    keywords: &'static [&'static str],
    question: &'static str,
}

/// Topic table scanned against replies, messages, and history. First match
/// wins ties, so ordering doubles as priority.
const TOPICS: [Topic; 5] = [
    Topic {
        keywords: &["experience", "role", "career", "position", "years", "led", "leader"],
        question: "What roles has Michael held?",
    },
    Topic {
        keywords: &["award", "recognition", "honor", "achievement"],
        question: "What awards has Michael received?",
    },
    Topic {
        keywords: &["education", "degree", "university", "mba", "computer science"],
        question: "What is Michael's educational background?",
    },
    Topic {
        keywords: &["technical", "architecture", "cloud", "distributed", "api", "engineering"],
        question: "What technical skills does Michael have?",
    },
    Topic {
        keywords: &["fintech", "healthcare", "industry", "payments", "platform"],
        question: "What industries has Michael worked in?",
    },
];

/// Default keyword-based strategy.
pub struct KeywordSuggester;

impl KeywordSuggester {
    fn topic_matches(topic: &Topic, haystack: &str) -> bool {
        topic.keywords.iter().any(|kw| haystack.contains(kw))
    }
}

impl SuggestionStrategy for KeywordSuggester {
    fn suggest(&self, reply: &str, message: &str, history: &[HistoryItem]) -> Vec<String> {
        let exchange = format!("{reply} {message}").to_lowercase();
        let discussed = history
            .iter()
            .map(|item| item.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let suggestions: Vec<String> = TOPICS
            .iter()
            .filter(|topic| {
                Self::topic_matches(topic, &exchange) && !Self::topic_matches(topic, &discussed)
            })
            .take(MAX_SUGGESTIONS)
            .map(|topic| topic.question.to_string())
            .collect();

        if !suggestions.is_empty() {
            return suggestions;
        }

        GENERIC_SUGGESTIONS
            .iter()
            .map(|s| s.to_string())
            .take(MAX_SUGGESTIONS)
            .collect()
    }
}
