//! Token counting capability used by the chunker for sizing.

/// Counts tokens in a piece of text.
///
/// Implementations must be deterministic: the chunker relies on counting
/// the same text twice yielding the same result.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Heuristic tokenizer (4 chars ≈ 1 token).
///
/// Always available; used when no model tokenizer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for std::sync::Arc<T> {
    fn count_tokens(&self, text: &str) -> usize {
        (**self).count_tokens(text)
    }
}
