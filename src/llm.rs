//! Chat-completion backed collaborators: the intent classifier and the
//! answerability oracle.
//!
//! Both talk to any OpenAI-compatible `/chat/completions` endpoint
//! (`[llm].base_url`). When no endpoint is configured the factories return
//! the model-free fallbacks: [`HeuristicClassifier`] and an oracle that
//! always answers yes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use docroute_core::gate::AnswerabilityOracle;
use docroute_core::intent::{
    clean_query, is_simple_query, simple_query_analysis, HeuristicClassifier, IntentClassifier,
};
use docroute_core::models::QueryAnalysis;

use crate::config::LlmConfig;
use crate::http;

/// Minimal OpenAI-compatible chat client.
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key_env: String,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Option<Self>> {
        let Some(base) = config.base_url.as_deref() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: http::client(config.timeout_secs)?,
            url: http::join(base, "chat/completions"),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        }))
    }

    /// Send a system + user message pair and return the first choice's text.
    /// One attempt only: classification and the oracle both run per query.
    pub async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        // Self-hosted endpoints often run without a key.
        let api_key = std::env::var(&self.api_key_env).ok();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.1,
            "max_tokens": max_tokens,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            api_key.as_deref(),
            &body,
            http::NO_RETRIES,
            "Chat API",
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
    }
}

/// Remove a surrounding markdown code fence (optionally tagged `json`).
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_end().trim_end_matches("```").trim()
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    query_type: String,
    search_intent: String,
    #[serde(default)]
    key_entities: Vec<String>,
    #[serde(default)]
    suggested_searches: Vec<String>,
    #[serde(default)]
    complexity_score: Option<i64>,
    #[serde(default)]
    requires_real_time: bool,
    #[serde(default)]
    query_intent: Option<String>,
}

/// Parse a model reply into a [`QueryAnalysis`]. `query_intent` is kept
/// only for sessions with documents.
fn parse_analysis(raw: &str, has_documents: bool) -> Result<QueryAnalysis> {
    let parsed: RawAnalysis = serde_json::from_str(strip_fences(raw))
        .map_err(|e| anyhow!("classifier returned invalid JSON: {}", e))?;
    Ok(QueryAnalysis {
        query_type: parsed.query_type,
        search_intent: parsed.search_intent,
        key_entities: parsed.key_entities,
        suggested_searches: parsed.suggested_searches,
        complexity_score: parsed.complexity_score.unwrap_or(5).clamp(1, 10) as u8,
        requires_real_time: parsed.requires_real_time,
        query_intent: if has_documents { parsed.query_intent } else { None },
    })
}

const CLASSIFIER_SYSTEM: &str = "You are a query analysis expert for a search engine. \
Always respond with valid JSON only. No markdown fences, no extra text.";

fn classifier_prompt(query: &str, has_documents: bool) -> String {
    let now = Utc::now();
    let today = now.format("%A, %B %d, %Y");
    let month = now.format("%B %Y");

    let intent_field = if has_documents {
        "\n    \"query_intent\": \"doc_summary|doc_qa|general_web\","
    } else {
        ""
    };
    let intent_rules = if has_documents {
        "\n\nThe user has uploaded documents in this session. Rules for query_intent:\n\
         - doc_summary: asks for an overview or summary of the uploaded document(s)\n\
         - doc_qa: asks a question the uploaded document(s) might answer\n\
         - general_web: clearly unrelated to the documents"
    } else {
        ""
    };

    format!(
        r#"Today is {today}.

Analyze the user query below and return a JSON object.

Query: "{query}"

Return ONLY valid JSON in this EXACT format:
{{
    "query_type": "factual|comparison|how_to|current_events|opinion|calculation",
    "search_intent": "Clear 1-sentence description of what the user wants",
    "key_entities": ["entity1", "entity2"],
    "suggested_searches": ["search_term_1", "search_term_2", "search_term_3"],
    "requires_real_time": true or false,{intent_field}
    "complexity_score": 5
}}

Rules for suggested_searches:
- Generate exactly 3 specific search terms optimized for web search
- For real-time queries (scores, next match, current price, latest news) include "{month}"
- For how-to queries include "guide", "tutorial" or "step by step"

Rules for complexity_score (integer 1-10):
- 1-3: simple fact, single answer
- 4-6: moderate research needed
- 7-10: multi-part, comparative, or research-heavy{intent_rules}"#
    )
}

/// Chat-completion intent classifier.
pub struct LlmClassifier {
    chat: Arc<ChatClient>,
}

impl LlmClassifier {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, query: &str, has_documents: bool) -> Result<QueryAnalysis> {
        let cleaned = clean_query(query);
        if !has_documents && is_simple_query(&cleaned) {
            return Ok(simple_query_analysis(&cleaned));
        }

        let reply = self
            .chat
            .complete(CLASSIFIER_SYSTEM, &classifier_prompt(&cleaned, has_documents), 600)
            .await?;
        let analysis = parse_analysis(&reply, has_documents)?;
        tracing::debug!(
            query_type = %analysis.query_type,
            real_time = analysis.requires_real_time,
            intent = ?analysis.query_intent,
            "query analyzed"
        );
        Ok(analysis)
    }
}

const ORACLE_SYSTEM: &str = "You judge whether document excerpts contain the answer to a \
question. Reply with exactly one word: YES or NO.";

fn oracle_prompt(query: &str, excerpts: &[String]) -> String {
    let mut prompt = format!("Question: {}\n\nExcerpts:\n", query);
    for (i, excerpt) in excerpts.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, excerpt));
    }
    prompt.push_str("Can the question be answered from these excerpts? Answer YES or NO.");
    prompt
}

fn parse_verdict(reply: &str) -> Result<bool> {
    let word: String = reply
        .trim()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_uppercase();
    match word.as_str() {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => bail!("oracle gave an unrecognized verdict: {:?}", reply),
    }
}

/// Chat-completion answerability judge, bounded by `oracle_timeout_secs`.
pub struct LlmOracle {
    chat: Arc<ChatClient>,
    timeout: Duration,
}

impl LlmOracle {
    pub fn new(chat: Arc<ChatClient>, timeout: Duration) -> Self {
        Self { chat, timeout }
    }
}

#[async_trait]
impl AnswerabilityOracle for LlmOracle {
    async fn can_answer(&self, query: &str, excerpts: &[String]) -> Result<bool> {
        let prompt = oracle_prompt(query, excerpts);
        let reply = tokio::time::timeout(self.timeout, self.chat.complete(ORACLE_SYSTEM, &prompt, 5))
            .await
            .map_err(|_| anyhow!("oracle timed out after {:?}", self.timeout))??;
        parse_verdict(&reply)
    }
}

/// Used when no chat endpoint is configured: defers entirely to the
/// rerank threshold.
pub struct AlwaysAnswerable;

#[async_trait]
impl AnswerabilityOracle for AlwaysAnswerable {
    async fn can_answer(&self, _query: &str, _excerpts: &[String]) -> Result<bool> {
        Ok(true)
    }
}

pub fn create_classifier(chat: Option<Arc<ChatClient>>) -> Arc<dyn IntentClassifier> {
    match chat {
        Some(chat) => Arc::new(LlmClassifier::new(chat)),
        None => Arc::new(HeuristicClassifier),
    }
}

pub fn create_oracle(chat: Option<Arc<ChatClient>>, config: &LlmConfig) -> Arc<dyn AnswerabilityOracle> {
    match chat {
        Some(chat) => Arc::new(LlmOracle::new(
            chat,
            Duration::from_secs(config.oracle_timeout_secs),
        )),
        None => Arc::new(AlwaysAnswerable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{
        "query_type": "factual",
        "search_intent": "Find revenue",
        "key_entities": ["revenue"],
        "suggested_searches": ["a", "b", "c"],
        "requires_real_time": false,
        "query_intent": "doc_qa",
        "complexity_score": 14
    }"#;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("  {} "), "{}");
    }

    #[test]
    fn test_parse_analysis_clamps_complexity() {
        let analysis = parse_analysis(REPLY, true).unwrap();
        assert_eq!(analysis.complexity_score, 10);
        assert_eq!(analysis.query_intent.as_deref(), Some("doc_qa"));

        let low = REPLY.replace("14", "-3");
        assert_eq!(parse_analysis(&low, true).unwrap().complexity_score, 1);
    }

    #[test]
    fn test_parse_analysis_drops_intent_without_documents() {
        let analysis = parse_analysis(REPLY, false).unwrap();
        assert_eq!(analysis.query_intent, None);
    }

    #[test]
    fn test_parse_analysis_fenced_reply() {
        let fenced = format!("```json\n{}\n```", REPLY);
        assert!(parse_analysis(&fenced, true).is_ok());
    }

    #[test]
    fn test_parse_analysis_rejects_prose() {
        assert!(parse_analysis("Sure! Here is the analysis.", true).is_err());
    }

    #[test]
    fn test_prompt_mentions_intent_only_with_documents() {
        assert!(classifier_prompt("q", true).contains("query_intent"));
        assert!(!classifier_prompt("q", false).contains("query_intent"));
    }

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict("YES").unwrap());
        assert!(parse_verdict("yes.").unwrap());
        assert!(!parse_verdict(" No").unwrap());
        assert!(parse_verdict("maybe").is_err());
        assert!(parse_verdict("").is_err());
    }

    #[test]
    fn test_oracle_prompt_numbers_excerpts() {
        let prompt = oracle_prompt("q", &["first".into(), "second".into()]);
        assert!(prompt.contains("[1] first"));
        assert!(prompt.contains("[2] second"));
    }

    #[test]
    fn test_unconfigured_llm_has_no_client() {
        assert!(ChatClient::new(&LlmConfig::default()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fallbacks_without_endpoint() {
        let oracle = create_oracle(None, &LlmConfig::default());
        assert!(oracle.can_answer("q", &[]).await.unwrap());

        let classifier = create_classifier(None);
        let analysis = classifier.classify("what is rust", false).await.unwrap();
        assert_eq!(analysis.complexity_score, 2);
    }

    #[tokio::test]
    async fn test_simple_query_skips_model_call() {
        // Unreachable endpoint: a model call would fail.
        let config = LlmConfig {
            base_url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 1,
            ..LlmConfig::default()
        };
        let chat = Arc::new(ChatClient::new(&config).unwrap().unwrap());
        let classifier = LlmClassifier::new(chat);
        assert!(classifier.classify("define entropy", false).await.is_ok());
        assert!(classifier.classify("define entropy", true).await.is_err());
    }

    #[tokio::test]
    async fn test_chat_call_makes_one_attempt() {
        let (base, hits) = crate::testing::unavailable_endpoint().await;
        let config = LlmConfig {
            base_url: Some(base),
            api_key_env: "DOCROUTE_TEST_UNSET_KEY".into(),
            ..LlmConfig::default()
        };
        let chat = ChatClient::new(&config).unwrap().unwrap();

        let err = chat.complete("system", "user", 16).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
