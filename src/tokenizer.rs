//! Tokenizer selection for chunk sizing.
//!
//! `chunking.tokenizer = "approx"` uses the ≈4 chars/token heuristic from
//! the core crate. Any other value is a path to a HuggingFace
//! `tokenizer.json`, which requires the `hf-tokenizer` feature.

use std::sync::Arc;

use anyhow::Result;

use docroute_core::tokenizer::{ApproxTokenizer, Tokenizer};

use crate::config::ChunkingConfig;

pub fn create_tokenizer(config: &ChunkingConfig) -> Result<Arc<dyn Tokenizer>> {
    match config.tokenizer.as_str() {
        "approx" | "" => Ok(Arc::new(ApproxTokenizer)),
        #[cfg(feature = "hf-tokenizer")]
        path => Ok(Arc::new(hf::HfTokenizer::from_file(std::path::Path::new(path))?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        path => anyhow::bail!(
            "chunking.tokenizer = '{}' requires the hf-tokenizer feature. \
             Rebuild with --features hf-tokenizer or use \"approx\".",
            path
        ),
    }
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::path::Path;

    use anyhow::{anyhow, Result};

    use docroute_core::tokenizer::Tokenizer;

    /// Exact token counts from a HuggingFace tokenizer.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> Result<Self> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
            Ok(Self { inner })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            match self.inner.encode(text, false) {
                Ok(encoding) => encoding.len(),
                // Counting must not fail; fall back to the character heuristic.
                Err(_) => text.chars().count().div_ceil(4),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_is_default() {
        let tokenizer = create_tokenizer(&ChunkingConfig::default()).unwrap();
        assert_eq!(tokenizer.count_tokens("abcdefgh"), 2);
    }

    #[cfg(not(feature = "hf-tokenizer"))]
    #[test]
    fn test_path_requires_feature() {
        let config = ChunkingConfig {
            tokenizer: "/models/tokenizer.json".into(),
            ..ChunkingConfig::default()
        };
        assert!(create_tokenizer(&config).is_err());
    }
}
