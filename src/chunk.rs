//! Sentence-aware text chunker.
//!
//! Splits normalized document text into overlapping chunks sized for
//! embedding. Tries, in order: sentence-boundary packing, paragraph-boundary
//! packing, and word-boundary packing — each falling back to the next when
//! it fails to produce more than one chunk or meets an oversized unit. An
//! overlap pass then prepends a suffix of the previous chunk to each chunk
//! after the first, so nearby chunks share context across the split.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;
use crate::normalize::normalize;

const CONTINUATION_MARKER: &str = "...";
/// Characters the continuation marker and its joining spaces add on top of
/// the overlap tail and body text (`"... " + tail + " " + body`), reserved
/// out of `overlap_chars` so a chunk's total length never exceeds
/// `target_chars + overlap_chars`.
const CONTINUATION_OVERHEAD: usize = CONTINUATION_MARKER.len() + 2;

/// One packed unit before overlap is applied, tracking its span in the
/// normalized source text.
struct Span {
    start: usize,
    end: usize,
}

/// Split `text` into chunks targeting `target_chars` per chunk with
/// `overlap_chars` shared between adjacent chunks. Always returns at least
/// one chunk, even for empty input.
pub fn chunk_text(document_id: &str, text: &str, target_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let normalized = normalize(text);

    if normalized.len() <= target_chars {
        return vec![make_chunk(document_id, 0, &normalized)];
    }

    let mut spans = split_sentences(&normalized, target_chars);
    if spans.len() < 2 {
        spans = split_paragraphs(&normalized, target_chars);
    }
    if spans.len() < 2 {
        spans = split_words(&normalized, target_chars);
    }
    if spans.is_empty() {
        spans = vec![Span { start: 0, end: normalized.len() }];
    }

    let texts = apply_overlap(&normalized, &spans, overlap_chars);

    let mut chunks: Vec<Chunk> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| make_chunk(document_id, i, t))
        .collect();

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, &normalized));
    }

    chunks
}

/// Segment on `.`/`!`/`?` followed by whitespace and an uppercase letter or
/// opening quote, then greedily pack sentences up to `target_chars`. A
/// sentence longer than `target_chars` is further split at word boundaries
/// and flushed as its own chunk(s). Each span's end lands on the byte index
/// where the next sentence starts, so the separating whitespace travels with
/// the preceding sentence instead of being dropped between spans.
fn split_sentences(text: &str, target_chars: usize) -> Vec<Span> {
    let bytes = text.as_bytes();
    let mut sentence_bounds = Vec::new();
    let mut start = 0usize;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for i in 0..chars.len() {
        let (_, c) = chars[i];
        if c == '.' || c == '!' || c == '?' {
            let mut j = i + 1;
            let mut saw_space = false;
            while j < chars.len() && chars[j].1.is_whitespace() {
                saw_space = true;
                j += 1;
            }
            if saw_space && j < chars.len() {
                let next = chars[j].1;
                if next.is_uppercase() || next == '"' || next == '\'' || next == '\u{201C}' {
                    let end = chars.get(j).map(|(b, _)| *b).unwrap_or(bytes.len());
                    sentence_bounds.push((start, end));
                    start = end;
                }
            }
        }
    }
    if start < bytes.len() {
        sentence_bounds.push((start, bytes.len()));
    }

    pack_units(text, &sentence_bounds, target_chars)
}

/// Segment on runs of two-or-more newlines, then pack the same way. A span's
/// end lands on the next paragraph's first byte, so the newline run is kept
/// as part of the preceding span rather than dropped between spans.
fn split_paragraphs(text: &str, target_chars: usize) -> Vec<Span> {
    let mut bounds = Vec::new();
    let mut start = 0usize;
    let mut idx = 0usize;
    let bytes = text.as_bytes();
    while idx < bytes.len() {
        if bytes[idx] == b'\n' {
            let run_start = idx;
            let mut j = idx;
            while j < bytes.len() && bytes[j] == b'\n' {
                j += 1;
            }
            if j - run_start >= 2 {
                bounds.push((start, j));
                start = j;
                idx = j;
                continue;
            }
            idx = j;
            continue;
        }
        idx += 1;
    }
    if start < bytes.len() {
        bounds.push((start, bytes.len()));
    }
    pack_units(text, &bounds, target_chars)
}

/// Segment on whitespace-separated words, packing greedily. Used as the
/// last-resort fallback and also to hard-split any unit too large to fit in
/// one chunk on its own. Each span runs up to the start of the next word, so
/// the whitespace between words is kept rather than dropped between spans.
fn split_words(text: &str, target_chars: usize) -> Vec<Span> {
    let mut word_starts = Vec::new();
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            word_starts.push(i);
            in_word = true;
        }
    }
    let mut bounds = Vec::with_capacity(word_starts.len());
    for w in 0..word_starts.len() {
        let end = word_starts.get(w + 1).copied().unwrap_or(text.len());
        bounds.push((word_starts[w], end));
    }
    pack_word_bounds(&bounds, target_chars)
}

/// Greedily pack `(start, end)` byte-offset units into spans no longer than
/// `target_chars`. A single unit that itself exceeds `target_chars` is
/// hard-split at word boundaries via [`split_words`].
fn pack_units(text: &str, units: &[(usize, usize)], target_chars: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut buf_start: Option<usize> = None;
    let mut buf_end = 0usize;

    for &(u_start, u_end) in units {
        if u_end <= u_start {
            continue;
        }
        let unit_len = u_end - u_start;

        if unit_len > target_chars {
            if let Some(s) = buf_start.take() {
                spans.push(Span { start: s, end: buf_end });
            }
            for sub in split_words(&text[u_start..u_end], target_chars) {
                spans.push(Span { start: u_start + sub.start, end: u_start + sub.end });
            }
            continue;
        }

        let candidate_len = match buf_start {
            None => unit_len,
            Some(s) => u_end - s,
        };

        if candidate_len > target_chars && buf_start.is_some() {
            spans.push(Span { start: buf_start.take().unwrap(), end: buf_end });
        }

        if buf_start.is_none() {
            buf_start = Some(u_start);
        }
        buf_end = u_end;
    }

    if let Some(s) = buf_start {
        spans.push(Span { start: s, end: buf_end });
    }

    spans
}

/// Greedily pack word-level `(start, end)` bounds into spans no longer than
/// `target_chars`. Unlike [`pack_units`], a single word that itself exceeds
/// `target_chars` (no internal whitespace to split on) is emitted as its own
/// oversized span rather than recursing into `split_words` again, which
/// would never terminate.
fn pack_word_bounds(units: &[(usize, usize)], target_chars: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut buf_start: Option<usize> = None;
    let mut buf_end = 0usize;

    for &(u_start, u_end) in units {
        if u_end <= u_start {
            continue;
        }
        let unit_len = u_end - u_start;

        if unit_len > target_chars {
            if let Some(s) = buf_start.take() {
                spans.push(Span { start: s, end: buf_end });
            }
            spans.push(Span { start: u_start, end: u_end });
            continue;
        }

        let candidate_len = match buf_start {
            None => unit_len,
            Some(s) => u_end - s,
        };

        if candidate_len > target_chars && buf_start.is_some() {
            spans.push(Span { start: buf_start.take().unwrap(), end: buf_end });
        }

        if buf_start.is_none() {
            buf_start = Some(u_start);
        }
        buf_end = u_end;
    }

    if let Some(s) = buf_start {
        spans.push(Span { start: s, end: buf_end });
    }

    spans
}

/// Prepend to chunk `i` (`i >= 1`) the tail of chunk `i-1`, cut at the
/// nearest word boundary at most `overlap_chars` back from its end, marked
/// with a continuation prefix.
fn apply_overlap(text: &str, spans: &[Span], overlap_chars: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(spans.len());
    let tail_budget = overlap_chars.saturating_sub(CONTINUATION_OVERHEAD);
    for (i, span) in spans.iter().enumerate() {
        let body = &text[span.start..span.end];
        if i == 0 || overlap_chars == 0 || tail_budget == 0 {
            out.push(body.to_string());
            continue;
        }
        let prev = &spans[i - 1];
        let prev_text = &text[prev.start..prev.end];
        let tail = overlap_tail(prev_text, tail_budget);
        if tail.is_empty() {
            out.push(body.to_string());
        } else {
            out.push(format!("{} {}{}", CONTINUATION_MARKER, tail, format_continuation(body)));
        }
    }
    out
}

fn format_continuation(body: &str) -> String {
    format!(" {}", body)
}

/// Return the suffix of `text` at most `overlap_chars` characters long,
/// trimmed forward to the nearest word boundary so the overlap doesn't start
/// mid-word.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if text.len() <= overlap_chars {
        return text.to_string();
    }
    let cut = text.len() - overlap_chars;
    let boundary = text[cut..]
        .find(char::is_whitespace)
        .map(|p| cut + p)
        .unwrap_or(cut);
    text[boundary..].trim().to_string()
}

fn make_chunk(document_id: &str, index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    let hash = hasher.finalize();
    let chunk_id = Uuid::from_bytes(hash[..16].try_into().unwrap()).to_string();

    Chunk {
        chunk_id,
        chunk_index: index,
        text: text.to_string(),
    }
}
