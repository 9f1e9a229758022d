//! Web search fan-out.
//!
//! [`search_multiple`] runs one provider call per search term concurrently,
//! drops the terms that fail, de-duplicates by URL and ranks the union with
//! a composite score:
//!
//! | Signal | Bonus |
//! |---|---|
//! | provider relevance score | base |
//! | content longer than 1000 / 400 chars | +1.0 / +0.5 |
//! | reputable domain | +0.3 |
//! | published ≤ 24h | +2.5 real-time, +0.5 otherwise |
//! | published ≤ 7 days | +1.0 real-time, +0.2 otherwise |
//! | published ≤ 30 days | +0.3 |

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use docroute_core::models::QueryAnalysis;

use crate::config::WebConfig;
use crate::http;

const TAVILY_URL: &str = "https://api.tavily.com/search";

const REPUTABLE_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "britannica.com",
    "stanford.edu",
    "mit.edu",
    "ox.ac.uk",
    "harvard.edu",
    "nature.com",
    "sciencedirect.com",
    "arxiv.org",
    "ncbi.nlm.nih.gov",
    "techcrunch.com",
    "theverge.com",
    "wired.com",
    "arstechnica.com",
    "bbc.com",
    "bbc.co.uk",
    "reuters.com",
    "apnews.com",
    "nytimes.com",
    "theguardian.com",
    "washingtonpost.com",
    "nih.gov",
    "who.int",
    "cdc.gov",
    "mayoclinic.org",
    "espn.com",
    "espncricinfo.com",
    "skysports.com",
    "bloomberg.com",
    "ft.com",
    "wsj.com",
    "forbes.com",
];

/// One web search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebResult {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    /// Provider relevance score.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub published_date: Option<String>,
    /// Composite ranking score, filled in by [`search_multiple`].
    #[serde(default)]
    pub calculated_score: f64,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, term: &str, real_time: bool) -> Result<Vec<WebResult>>;
}

/// Used when `web.provider = "disabled"`: every search is empty.
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    async fn search(&self, _term: &str, _real_time: bool) -> Result<Vec<WebResult>> {
        Ok(Vec::new())
    }
}

/// Tavily search client. Real-time searches use advanced depth over the
/// news topic restricted to the last 3 days, with 5 results instead of 3.
pub struct TavilySearch {
    client: reqwest::Client,
    url: String,
    api_key_env: String,
    excluded_domains: Vec<String>,
}

impl TavilySearch {
    pub fn new(config: &WebConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: TAVILY_URL.to_string(),
            api_key_env: config.api_key_env.clone(),
            excluded_domains: config.excluded_domains.clone(),
        })
    }

    fn request_body(&self, term: &str, real_time: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "query": term,
            "include_answer": false,
            "include_raw_content": false,
            "max_results": if real_time { 5 } else { 3 },
            "exclude_domains": self.excluded_domains,
            "search_depth": if real_time { "advanced" } else { "basic" },
        });
        if real_time {
            body["topic"] = serde_json::json!("news");
            body["days"] = serde_json::json!(3);
        }
        body
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, term: &str, real_time: bool) -> Result<Vec<WebResult>> {
        let api_key = http::api_key(&self.api_key_env)?;
        let body = self.request_body(term, real_time);
        let json = http::post_json(&self.client, &self.url, Some(&api_key), &body, 1, "Tavily API")
            .await?;
        let response: TavilyResponse =
            serde_json::from_value(json).context("Invalid Tavily response")?;
        tracing::debug!(term, results = response.results.len(), "web search");
        Ok(response.results)
    }
}

pub fn create_web_search(config: &WebConfig) -> Result<Arc<dyn WebSearch>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledWebSearch)),
        "tavily" => Ok(Arc::new(TavilySearch::new(config)?)),
        other => anyhow::bail!("Unknown web provider: {}", other),
    }
}

/// Terms for the web fan-out: the original query first, then the
/// classifier's suggestions, capped at 4 for real-time queries and 3 otherwise.
pub fn search_terms(query: &str, analysis: &QueryAnalysis) -> Vec<String> {
    let cap = if analysis.requires_real_time { 4 } else { 3 };
    let mut terms = vec![query.trim().to_string()];
    for suggestion in &analysis.suggested_searches {
        let suggestion = suggestion.trim();
        if !suggestion.is_empty() && !terms.iter().any(|t| t == suggestion) {
            terms.push(suggestion.to_string());
        }
    }
    terms.truncate(cap);
    terms
}

/// Run every term concurrently and merge the results.
///
/// Failed terms are logged and dropped. Duplicate URLs keep the first
/// occurrence in term order. The output is sorted by descending
/// `calculated_score`.
pub async fn search_multiple(
    provider: Arc<dyn WebSearch>,
    terms: &[String],
    real_time: bool,
    now: DateTime<Utc>,
) -> Vec<WebResult> {
    let mut set = JoinSet::new();
    for (position, term) in terms.iter().cloned().enumerate() {
        let provider = provider.clone();
        set.spawn(async move {
            let result = provider.search(&term, real_time).await;
            (position, term, result)
        });
    }

    let mut batches = Vec::with_capacity(terms.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((position, _, Ok(results))) => batches.push((position, results)),
            Ok((_, term, Err(e))) => {
                tracing::warn!(term = %term, error = %format!("{:#}", e), "web search failed");
            }
            Err(e) => tracing::warn!(error = %e, "web search task panicked"),
        }
    }
    batches.sort_by_key(|(position, _)| *position);

    let mut seen = HashSet::new();
    let mut merged: Vec<WebResult> = batches
        .into_iter()
        .flat_map(|(_, results)| results)
        .filter(|r| !r.url.is_empty() && seen.insert(r.url.clone()))
        .collect();

    for result in &mut merged {
        result.calculated_score = composite_score(result, real_time, now);
    }
    merged.sort_by(|a, b| b.calculated_score.total_cmp(&a.calculated_score));
    merged
}

fn composite_score(result: &WebResult, real_time: bool, now: DateTime<Utc>) -> f64 {
    let mut score = result.score;

    let length = result.content.chars().count();
    if length > 1000 {
        score += 1.0;
    } else if length > 400 {
        score += 0.5;
    }

    let url = result.url.to_lowercase();
    if REPUTABLE_DOMAINS.iter().any(|d| url.contains(d)) {
        score += 0.3;
    }

    if let Some(published) = result.published_date.as_deref().and_then(parse_published) {
        let age_hours = (now - published).num_seconds() as f64 / 3600.0;
        if age_hours <= 24.0 {
            score += if real_time { 2.5 } else { 0.5 };
        } else if age_hours <= 168.0 {
            score += if real_time { 1.0 } else { 0.2 };
        } else if age_hours <= 720.0 {
            score += 0.3;
        }
    }

    score
}

/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD`, all as UTC.
fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
