//! Paragraph-aware splitting of raw transcripts into model-sized chunks.
//! Chunks are contiguous slices of the input so nothing is rewritten on the
//! way in; the gaps between them are only the paragraph separators.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, trace};

/// Default upper bound, in characters, for one chunk.
pub const DEFAULT_CHUNK_CHARS: usize = 5000;

/// What to do with a single paragraph that is longer than the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Emit the paragraph as one oversized chunk.
    #[default]
    Keep,
    /// Split the paragraph at sentence boundaries before packing.
    SplitSentences,
}

/// A slice of raw input text awaiting conversion into subtitle blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChunk {
    pub text: String,
    /// Byte range of `text` inside the chunked input.
    pub span: Range<usize>,
}

impl RawChunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into chunks of at most `max_chars` characters, keeping
/// paragraphs whole. An over-long paragraph is emitted on its own.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<RawChunk> {
    chunk_text_with(text, max_chars, OversizePolicy::Keep)
}

/// Split `text` into chunks, choosing how over-long paragraphs are handled.
///
/// Paragraphs are separated by a newline, optional whitespace and another
/// newline. They are packed greedily: a unit joins the running chunk only if
/// the chunk, separator included, stays within `max_chars`. Whitespace-only
/// paragraphs never open a chunk.
pub fn chunk_text_with(text: &str, max_chars: usize, policy: OversizePolicy) -> Vec<RawChunk> {
    trace!(
        "chunk_text len={} max_chars={} policy={:?}",
        text.len(),
        max_chars,
        policy
    );
    let max_chars = max_chars.max(1);
    let mut units = Vec::new();
    for span in paragraph_spans(text) {
        if text[span.clone()].trim().is_empty() {
            continue;
        }
        let oversized = text[span.clone()].chars().count() > max_chars;
        if oversized && policy == OversizePolicy::SplitSentences {
            units.extend(sentence_spans(text, span));
        } else {
            units.push(span);
        }
    }

    let mut chunks = Vec::new();
    let mut current: Option<(Range<usize>, usize)> = None;
    for unit in units {
        current = match current {
            None => Some((unit.clone(), count(text, &unit))),
            Some((open, chars)) => {
                let grown = chars + count(text, &(open.end..unit.end));
                if grown > max_chars {
                    chunks.push(to_chunk(text, open));
                    Some((unit.clone(), count(text, &unit)))
                } else {
                    Some((open.start..unit.end, grown))
                }
            }
        };
    }
    if let Some((open, _)) = current {
        chunks.push(to_chunk(text, open));
    }
    debug!("split {} chars into {} chunk(s)", text.chars().count(), chunks.len());
    chunks
}

fn count(text: &str, span: &Range<usize>) -> usize {
    text[span.clone()].chars().count()
}

fn to_chunk(text: &str, span: Range<usize>) -> RawChunk {
    RawChunk {
        text: text[span.clone()].to_string(),
        span,
    }
}

/// Byte spans of the paragraphs in `text`. A separator starts at a newline
/// and ends at the last newline of the whitespace run that follows it.
fn paragraph_spans(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let mut j = i + 1;
            let mut last_newline = None;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                if bytes[j] == b'\n' {
                    last_newline = Some(j);
                }
                j += 1;
            }
            if let Some(end) = last_newline {
                spans.push(start..i);
                start = end + 1;
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans.push(start..bytes.len());
    spans
}

/// Byte spans of the sentences inside `span`. Leading whitespace is left in
/// the gaps; a sentence ends at `.`, `!`, `?` or `…` followed by whitespace.
fn sentence_spans(text: &str, span: Range<usize>) -> Vec<Range<usize>> {
    let slice = &text[span.clone()];
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = slice.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if matches!(c, '.' | '!' | '?' | '…') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if let (true, Some(s)) = (at_boundary, start) {
                out.push(span.start + s..span.start + i + c.len_utf8());
                start = None;
            }
        }
    }
    if let Some(s) = start {
        out.push(span.start + s..span.end);
    }
    out
}

/// Chunk list cached for one `(input, max_chars, policy)` triple.
/// Setters only re-chunk when the value actually changes.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    input: String,
    max_chars: usize,
    policy: OversizePolicy,
    chunks: Vec<RawChunk>,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CHARS)
    }
}

impl ChunkPlan {
    pub fn new(max_chars: usize) -> Self {
        Self {
            input: String::new(),
            max_chars: max_chars.max(1),
            policy: OversizePolicy::Keep,
            chunks: Vec::new(),
        }
    }

    /// Replace the input. Returns true when the chunks were recomputed.
    pub fn set_input(&mut self, input: impl Into<String>) -> bool {
        let input = input.into();
        if input == self.input {
            return false;
        }
        self.input = input;
        self.rechunk();
        true
    }

    /// Change the size limit. Returns true when the chunks were recomputed.
    pub fn set_max_chars(&mut self, max_chars: usize) -> bool {
        let max_chars = max_chars.max(1);
        if max_chars == self.max_chars {
            return false;
        }
        self.max_chars = max_chars;
        self.rechunk();
        true
    }

    pub fn set_policy(&mut self, policy: OversizePolicy) -> bool {
        if policy == self.policy {
            return false;
        }
        self.policy = policy;
        self.rechunk();
        true
    }

    fn rechunk(&mut self) {
        self.chunks = chunk_text_with(&self.input, self.max_chars, self.policy);
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn policy(&self) -> OversizePolicy {
        self.policy
    }

    pub fn chunks(&self) -> &[RawChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
