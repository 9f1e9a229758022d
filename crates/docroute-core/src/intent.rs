//! Intent classification capability and the heuristic analyses used when
//! no model call is needed or the model call fails.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::QueryAnalysis;

/// Classifies a query's intent, complexity, and web sub-searches.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// `query_intent` in the result is populated only when `has_documents`.
    async fn classify(&self, query: &str, has_documents: bool) -> Result<QueryAnalysis>;
}

/// Keywords that mark a query as needing fresh results.
const REAL_TIME_KEYWORDS: &[&str] = &[
    "today",
    "now",
    "live",
    "current",
    "latest",
    "score",
    "next match",
    "upcoming",
    "schedule",
    "standings",
    "result",
    "winner",
    "tonight",
];

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Collapse whitespace and drop characters other than word characters,
/// whitespace, `-`, `?`, `.` and `!`.
pub fn clean_query(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-' | '?' | '.' | '!'))
        .collect()
}

/// Definitional one-term queries: "what is X", "define X", "X definition".
pub fn is_simple_query(query: &str) -> bool {
    let q = query.to_lowercase();

    if let Some(rest) = q.strip_prefix("what is ") {
        return is_word(rest.trim_end_matches('?'));
    }
    if let Some(rest) = q.strip_prefix("define ") {
        return is_word(rest);
    }
    if let Some(rest) = q.strip_suffix(" definition") {
        let words: Vec<&str> = rest.split(' ').collect();
        return (1..=3).contains(&words.len()) && words.iter().all(|w| is_word(w));
    }
    false
}

fn main_term(query: &str) -> String {
    let q = query.to_lowercase();
    let q = q
        .strip_prefix("what is ")
        .or_else(|| q.strip_prefix("define "))
        .unwrap_or(&q);
    let q = q.strip_suffix(" definition").unwrap_or(q);
    q.trim_end_matches('?').trim().to_string()
}

/// Analysis for a query accepted by [`is_simple_query`], without a model call.
pub fn simple_query_analysis(query: &str) -> QueryAnalysis {
    let term = main_term(query);
    QueryAnalysis {
        query_type: "factual".to_string(),
        search_intent: format!("User wants to understand what {} means", term),
        key_entities: vec![term.clone()],
        suggested_searches: vec![
            format!("{} definition", term),
            format!("what is {}", term),
            format!("{} explanation", term),
        ],
        complexity_score: 2,
        requires_real_time: false,
        query_intent: None,
    }
}

pub fn is_real_time(query: &str) -> bool {
    let q = query.to_lowercase();
    REAL_TIME_KEYWORDS.iter().any(|kw| q.contains(kw))
}

/// Keyword-driven analysis used when the classifier fails.
///
/// `query_intent` is left empty and coerces to `doc_qa` downstream.
pub fn fallback_analysis(query: &str, now: DateTime<Utc>) -> QueryAnalysis {
    let real_time = is_real_time(query);
    let suggested_searches = if real_time {
        let month = now.format("%B %Y");
        vec![
            format!("{} {}", query, month),
            format!("{} latest update", query),
            format!("{} today live", query),
        ]
    } else {
        vec![
            query.to_string(),
            format!("{} explained", query),
            format!("{} guide", query),
        ]
    };

    QueryAnalysis {
        query_type: if real_time { "current_events" } else { "factual" }.to_string(),
        search_intent: format!("User wants information about: {}", query),
        key_entities: vec![query.chars().take(50).collect()],
        suggested_searches,
        complexity_score: 5,
        requires_real_time: real_time,
        query_intent: None,
    }
}

/// Model-free classifier: the simple-query shortcut when it applies, the
/// keyword fallback otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicClassifier;

#[async_trait]
impl IntentClassifier for HeuristicClassifier {
    async fn classify(&self, query: &str, has_documents: bool) -> Result<QueryAnalysis> {
        let cleaned = clean_query(query);
        if !has_documents && is_simple_query(&cleaned) {
            return Ok(simple_query_analysis(&cleaned));
        }
        Ok(fallback_analysis(query, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clean_query() {
        assert_eq!(clean_query("  what   is\trust?? "), "what is rust??");
        assert_eq!(clean_query("c++ vs (go)"), "c vs go");
    }

    #[test]
    fn test_simple_queries() {
        assert!(is_simple_query("What is Rust?"));
        assert!(is_simple_query("what is tokio"));
        assert!(is_simple_query("define entropy"));
        assert!(is_simple_query("heat death definition"));
        assert!(!is_simple_query("what is the capital of France"));
        assert!(!is_simple_query("define two words"));
        assert!(!is_simple_query("a b c d definition"));
        assert!(!is_simple_query("summarize this pdf"));
    }

    #[test]
    fn test_simple_query_analysis() {
        let a = simple_query_analysis("What is Rust?");
        assert_eq!(a.key_entities, vec!["rust"]);
        assert_eq!(a.suggested_searches[0], "rust definition");
        assert_eq!(a.complexity_score, 2);
        assert_eq!(a.query_intent, None);
    }

    #[test]
    fn test_fallback_real_time() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let a = fallback_analysis("IPL next match", now);
        assert!(a.requires_real_time);
        assert_eq!(a.query_type, "current_events");
        assert_eq!(a.suggested_searches[0], "IPL next match March 2026");
        assert_eq!(a.suggested_searches.len(), 3);
    }

    #[test]
    fn test_fallback_factual() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let a = fallback_analysis("history of the printing press", now);
        assert!(!a.requires_real_time);
        assert_eq!(a.suggested_searches[0], "history of the printing press");
        assert_eq!(a.complexity_score, 5);
    }

    #[tokio::test]
    async fn test_heuristic_classifier_skips_shortcut_with_documents() {
        let c = HeuristicClassifier;
        let without = c.classify("define entropy", false).await.unwrap();
        assert_eq!(without.complexity_score, 2);
        let with = c.classify("define entropy", true).await.unwrap();
        assert_eq!(with.complexity_score, 5);
    }
}
