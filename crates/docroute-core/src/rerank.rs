//! Cross-encoder reranking capability.

use anyhow::Result;
use async_trait::async_trait;

/// Scores `(query, text)` pairs jointly. Higher is more relevant.
///
/// Scores are raw model logits, not normalized; thresholds applied to them
/// are specific to the model producing them.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score every text against `query`. Returns one score per text, in order.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}
