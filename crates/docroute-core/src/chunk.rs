//! Page-aware semantic chunker.
//!
//! Splits extracted document text into [`DocumentChunk`]s that respect a
//! token budget while keeping paragraphs whole whenever possible and
//! linking neighbouring chunks through a sentence-aligned overlap.
//!
//! # Algorithm
//!
//! 1. Scan the text line by line into paragraphs. Blank lines and section
//!    headers (markdown `#` headings or short ALL-CAPS lines) start a new
//!    paragraph. `--- Page N ---` marker lines update the page counter and
//!    are dropped; they never split a paragraph.
//! 2. Accumulate paragraphs while the chunk stays within `max_chunk_tokens`.
//! 3. When the next paragraph does not fit and the chunk holds at least
//!    `min_chunk_tokens`, close it and seed the next chunk with the last
//!    ~`overlap_tokens` worth of its sentences. Below the minimum, the
//!    paragraph is fed sentence by sentence so the chunk fills up to the
//!    budget instead of closing early.
//! 4. A paragraph that alone exceeds `max_chunk_tokens` is split on
//!    sentence boundaries with the same close/overlap policy, starting from
//!    a clean chunk.
//! 5. A trailing chunk below the minimum is still emitted when it carries
//!    text not seen in any earlier chunk, so no text is dropped. A document
//!    ends up with zero chunks only when it has no text at all. This departs
//!    from the stricter rule of emitting a short tail only for single-chunk
//!    documents, which would lose the document's last sentences.
//!
//! # Example
//!
//! ```rust
//! use docroute_core::chunk::{Chunker, ChunkingParams};
//! use docroute_core::tokenizer::ApproxTokenizer;
//!
//! let chunker = Chunker::new(ApproxTokenizer, ChunkingParams::default());
//! let chunks = chunker.chunk("Hello world.\n\nSecond paragraph.", "doc-123");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! assert_eq!(chunks[0].page_number, 1);
//! ```

use serde::{Deserialize, Serialize};

use crate::models::DocumentChunk;
use crate::tokenizer::Tokenizer;

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 1000,
            min_chunk_tokens: 150,
            overlap_tokens: 200,
        }
    }
}

/// A paragraph tagged with the page it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub text: String,
    pub page: u32,
}

/// Token-bounded, overlap-linked chunker.
pub struct Chunker<T> {
    tokenizer: T,
    params: ChunkingParams,
}

impl<T: Tokenizer> Chunker<T> {
    pub fn new(tokenizer: T, params: ChunkingParams) -> Self {
        Self { tokenizer, params }
    }

    pub fn params(&self) -> &ChunkingParams {
        &self.params
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    /// Split `text` into ordered chunks for `document_id`.
    ///
    /// Never fails. Chunk indices are contiguous from 0 and page numbers are
    /// non-decreasing in index order.
    pub fn chunk(&self, text: &str, document_id: &str) -> Vec<DocumentChunk> {
        let paragraphs = scan_paragraphs(text);
        let mut builder = ChunkBuilder::new(self, document_id);
        for para in &paragraphs {
            builder.add_paragraph(para);
        }
        let chunks = builder.finish();

        tracing::debug!(
            document_id,
            paragraphs = paragraphs.len(),
            chunks = chunks.len(),
            "chunked document"
        );
        chunks
    }
}

/// Incremental chunk assembly state.
///
/// The open chunk is `overlap` (sentences carried over from the previous
/// chunk) followed by `fresh` (text first seen in this chunk).
struct ChunkBuilder<'a, T> {
    chunker: &'a Chunker<T>,
    document_id: &'a str,
    chunks: Vec<DocumentChunk>,
    overlap: Vec<String>,
    lead_sep: &'static str,
    fresh: String,
    page: u32,
}

impl<'a, T: Tokenizer> ChunkBuilder<'a, T> {
    fn new(chunker: &'a Chunker<T>, document_id: &'a str) -> Self {
        Self {
            chunker,
            document_id,
            chunks: Vec::new(),
            overlap: Vec::new(),
            lead_sep: PARAGRAPH_SEP,
            fresh: String::new(),
            page: 1,
        }
    }

    fn max(&self) -> usize {
        self.chunker.params.max_chunk_tokens
    }

    fn min(&self) -> usize {
        self.chunker.params.min_chunk_tokens
    }

    /// Render the open chunk, optionally with one more piece appended.
    /// Returns the text and the byte length of its overlap prefix.
    fn render(&self, next: Option<(&str, &str)>) -> (String, usize) {
        let mut out = self.overlap.join(SENTENCE_SEP);
        let overlap_len = out.len();
        if !self.fresh.is_empty() {
            if !out.is_empty() {
                out.push_str(self.lead_sep);
            }
            out.push_str(&self.fresh);
        }
        if let Some((sep, piece)) = next {
            if !out.is_empty() {
                out.push_str(sep);
            }
            out.push_str(piece);
        }
        (out, overlap_len)
    }

    fn tokens(&self) -> usize {
        self.chunker.count_tokens(&self.render(None).0)
    }

    fn fits(&self, sep: &str, piece: &str) -> bool {
        self.chunker.count_tokens(&self.render(Some((sep, piece))).0) <= self.max()
    }

    fn push(&mut self, sep: &'static str, piece: &str, page: u32) {
        if self.fresh.is_empty() {
            self.lead_sep = sep;
            self.page = page;
        } else {
            self.fresh.push_str(sep);
        }
        self.fresh.push_str(piece);
    }

    fn emit(&mut self, content: String, overlap_len: usize) {
        let index = self.chunks.len() as u32;
        let token_count = self.chunker.count_tokens(&content);
        self.chunks.push(DocumentChunk {
            chunk_id: format!("{}_chunk_{}", self.document_id, index),
            document_id: self.document_id.to_string(),
            content,
            page_number: self.page,
            chunk_index: index,
            token_count,
            overlap_len,
        });
    }

    /// Close the open chunk and carry its tail into the next one.
    fn close(&mut self) {
        let (content, overlap_len) = self.render(None);
        let tail = self.overlap_tail(&content);
        self.emit(content, overlap_len);
        self.overlap = tail;
        self.fresh.clear();
    }

    /// The last sentences of `content` whose joined size stays within
    /// `overlap_tokens`.
    fn overlap_tail(&self, content: &str) -> Vec<String> {
        let budget = self.chunker.params.overlap_tokens;
        let sentences: Vec<&str> = content
            .split(PARAGRAPH_SEP)
            .flat_map(split_sentences)
            .collect();

        let mut tail: Vec<String> = Vec::new();
        for sentence in sentences.iter().rev() {
            let mut candidate = vec![sentence.to_string()];
            candidate.extend(tail.iter().cloned());
            if self.chunker.count_tokens(&candidate.join(SENTENCE_SEP)) > budget {
                break;
            }
            tail = candidate;
        }
        tail
    }

    /// Drop leading overlap sentences until `piece` fits behind them.
    fn make_room(&mut self, sep: &str, piece: &str) {
        while !self.overlap.is_empty() && !self.fits(sep, piece) {
            self.overlap.remove(0);
        }
    }

    /// Append a piece, closing the open chunk first if it would overflow.
    ///
    /// Only a piece that alone exceeds the budget produces an oversized chunk.
    fn add_piece(&mut self, sep: &'static str, piece: &str, page: u32) {
        if self.fits(sep, piece) {
            self.push(sep, piece, page);
            return;
        }
        if !self.fresh.is_empty() {
            self.close();
        }
        self.make_room(sep, piece);
        self.push(sep, piece, page);
    }

    fn add_paragraph(&mut self, para: &Paragraph) {
        if self.chunker.count_tokens(&para.text) > self.max() {
            if !self.fresh.is_empty() {
                self.close();
            }
            self.overlap.clear();
            for sentence in split_sentences(&para.text) {
                self.add_piece(SENTENCE_SEP, sentence, para.page);
            }
            return;
        }

        if self.fits(PARAGRAPH_SEP, &para.text) {
            self.push(PARAGRAPH_SEP, &para.text, para.page);
            return;
        }

        if self.fresh.is_empty() || self.tokens() >= self.min() {
            self.add_piece(PARAGRAPH_SEP, &para.text, para.page);
            return;
        }

        // Too small to close: top the chunk up sentence by sentence.
        for (i, sentence) in split_sentences(&para.text).into_iter().enumerate() {
            let sep = if i == 0 { PARAGRAPH_SEP } else { SENTENCE_SEP };
            self.add_piece(sep, sentence, para.page);
        }
    }

    /// Emit whatever fresh text is still open. A tail made only of carried
    /// overlap is dropped; a short tail with fresh text is kept.
    fn finish(mut self) -> Vec<DocumentChunk> {
        if !self.fresh.is_empty() {
            let (content, overlap_len) = self.render(None);
            self.emit(content, overlap_len);
        }
        self.chunks
    }
}

/// Scan text into page-tagged paragraphs.
///
/// A small line-oriented state machine: the page counter advances on
/// marker lines, blank lines close the open paragraph, and headers close
/// it and open a new one.
pub fn scan_paragraphs(text: &str) -> Vec<Paragraph> {
    let mut page: u32 = 1;
    let mut start_page: u32 = 1;
    let mut lines: Vec<&str> = Vec::new();
    let mut out = Vec::new();

    fn flush(lines: &mut Vec<&str>, start_page: u32, out: &mut Vec<Paragraph>) {
        if !lines.is_empty() {
            out.push(Paragraph {
                text: lines.join("\n"),
                page: start_page,
            });
            lines.clear();
        }
    }

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(n) = parse_page_marker(trimmed) {
            page = page.max(n);
            continue;
        }

        if trimmed.is_empty() {
            flush(&mut lines, start_page, &mut out);
            continue;
        }

        if is_header(trimmed) {
            flush(&mut lines, start_page, &mut out);
        }

        if lines.is_empty() {
            start_page = page;
        }
        lines.push(trimmed);
    }
    flush(&mut lines, start_page, &mut out);

    out
}

/// Parse a `--- Page N ---` marker line (case-insensitive).
fn parse_page_marker(line: &str) -> Option<u32> {
    let inner = line.strip_prefix("---")?.strip_suffix("---")?.trim();
    let head = inner.get(..4)?;
    if !head.eq_ignore_ascii_case("page") {
        return None;
    }
    inner[4..].trim().parse().ok()
}

/// Markdown headings, or short ALL-CAPS lines such as `INTRODUCTION:`.
fn is_header(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        let rest = &line[hashes..];
        return rest.starts_with(' ') && !rest.trim().is_empty();
    }

    let body = line.strip_suffix(':').unwrap_or(line).trim_end();
    let len = body.chars().count();
    let mut chars = body.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    (4..=61).contains(&len)
        && chars.all(|c| {
            c.is_ascii_uppercase() || c.is_ascii_digit() || c.is_whitespace() || c == ',' || c == '-' || c == ':'
        })
}

/// Split text after `.`, `!`, or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (i, c) in text.char_indices() {
        if prev_terminal && c.is_whitespace() {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = i;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }

    let sentence = text[start..].trim();
    if !sentence.is_empty() {
        out.push(sentence);
    }
    out
}
