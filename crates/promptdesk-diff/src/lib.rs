use promptdesk_core::{
    DiffChunk, DiffGranularity, DiffRequest, DiffType, EditDiff, EditSuggestion, byte_offset,
    char_len,
};
use uuid::Uuid;

pub mod apply;

pub use apply::{
    ApplyAllOutcome, apply_all, apply_chunk, apply_order, chunk_matches, fingerprint, rebase_chunk,
    relocate, restore_cursor, revert_chunk,
};

/// Confidence assigned to chunks computed locally from two texts.
const TEXT_DIFF_CONFIDENCE: f64 = 1.0;

/// Position each suggestion in `base` by first-occurrence search.
pub fn from_suggestions(base: &str, suggestions: &[EditSuggestion]) -> EditDiff {
    from_suggestions_near(base, suggestions, 0)
}

/// Like [`from_suggestions`], but prefers occurrences at or after the character
/// offset `hint` (usually the selection start) before falling back to the first
/// occurrence in the whole text.
pub fn from_suggestions_near(base: &str, suggestions: &[EditSuggestion], hint: usize) -> EditDiff {
    let chunks = suggestions
        .iter()
        .map(|s| chunk_for_suggestion(base, s, hint))
        .collect();
    finish(chunks, String::new())
}

pub fn chunk_for_suggestion(base: &str, suggestion: &EditSuggestion, hint: usize) -> DiffChunk {
    let diff_type = if suggestion.suggested_text.is_empty() {
        DiffType::Deletion
    } else if suggestion.original_text.is_empty() {
        DiffType::Addition
    } else {
        DiffType::Modification
    };
    let (start_index, end_index) = match locate(base, &suggestion.original_text, hint) {
        Some((start, end)) => (start as i64, end as i64),
        None => (DiffChunk::UNLOCATED, DiffChunk::UNLOCATED),
    };
    DiffChunk {
        id: Uuid::now_v7(),
        diff_type,
        original_text: (diff_type != DiffType::Addition).then(|| suggestion.original_text.clone()),
        new_text: (diff_type != DiffType::Deletion).then(|| suggestion.suggested_text.clone()),
        start_index,
        end_index,
        confidence: suggestion.confidence,
        reasoning: suggestion.reasoning.clone(),
        applied: false,
        suggestion_id: Some(suggestion.id),
    }
}

/// Character span of `needle` in `haystack`. An empty needle is an insertion
/// point at `hint` (clamped to the end of the text).
pub fn locate(haystack: &str, needle: &str, hint: usize) -> Option<(usize, usize)> {
    let total = char_len(haystack);
    if needle.is_empty() {
        let at = hint.min(total);
        return Some((at, at));
    }
    let hint_byte = byte_offset(haystack, hint.min(total)).unwrap_or(haystack.len());
    let byte = haystack[hint_byte..]
        .find(needle)
        .map(|pos| hint_byte + pos)
        .or_else(|| haystack.find(needle))?;
    let start = char_len(&haystack[..byte]);
    Some((start, start + char_len(needle)))
}

/// Lockstep diff of two texts split into segments of the given granularity.
///
/// A differing position yields a deletion of the old segment followed by a
/// zero-width addition of the new one at the old segment's end. Trailing
/// segments present in only one text become plain deletions or additions.
/// Unchanged segments are reported only when `report_unchanged` is set.
pub fn from_texts(
    original: &str,
    new: &str,
    granularity: DiffGranularity,
    report_unchanged: bool,
) -> EditDiff {
    let old_segments = segments(original, granularity);
    let new_segments = segments(new, granularity);
    let mut chunks = Vec::new();
    let mut cursor = 0usize;

    for (idx, old_seg) in old_segments.iter().enumerate() {
        let start = cursor;
        let end = start + char_len(old_seg);
        cursor = end;
        match new_segments.get(idx) {
            Some(new_seg) if new_seg == old_seg => {
                if report_unchanged {
                    chunks.push(text_chunk(
                        DiffType::Unchanged,
                        Some(old_seg),
                        Some(old_seg),
                        start,
                        end,
                    ));
                }
            }
            Some(new_seg) => {
                chunks.push(text_chunk(DiffType::Deletion, Some(old_seg), None, start, end));
                chunks.push(text_chunk(DiffType::Addition, None, Some(new_seg), end, end));
            }
            None => {
                chunks.push(text_chunk(DiffType::Deletion, Some(old_seg), None, start, end));
            }
        }
    }
    for new_seg in new_segments.iter().skip(old_segments.len()) {
        chunks.push(text_chunk(DiffType::Addition, None, Some(new_seg), cursor, cursor));
    }

    let reasoning = format!(
        "{}-level comparison of {} and {} segments",
        granularity_name(granularity),
        old_segments.len(),
        new_segments.len()
    );
    finish(chunks, reasoning)
}

pub fn from_request(req: &DiffRequest) -> EditDiff {
    from_texts(&req.original_text, &req.new_text, req.granularity, false)
}

/// Arithmetic mean of chunk confidences; an empty list scores 0.
#[must_use]
pub fn overall_confidence(chunks: &[DiffChunk]) -> f64 {
    if chunks.is_empty() {
        return 0.0;
    }
    chunks.iter().map(|c| c.confidence).sum::<f64>() / chunks.len() as f64
}

fn finish(chunks: Vec<DiffChunk>, reasoning: String) -> EditDiff {
    EditDiff {
        overall_confidence: overall_confidence(&chunks),
        total_changes: chunks
            .iter()
            .filter(|c| c.diff_type != DiffType::Unchanged)
            .count(),
        chunks,
        reasoning,
    }
}

fn text_chunk(
    diff_type: DiffType,
    original: Option<&str>,
    new: Option<&str>,
    start: usize,
    end: usize,
) -> DiffChunk {
    DiffChunk {
        id: Uuid::now_v7(),
        diff_type,
        original_text: original.map(ToString::to_string),
        new_text: new.map(ToString::to_string),
        start_index: start as i64,
        end_index: end as i64,
        confidence: TEXT_DIFF_CONFIDENCE,
        reasoning: String::new(),
        applied: false,
        suggestion_id: None,
    }
}

fn granularity_name(granularity: DiffGranularity) -> &'static str {
    match granularity {
        DiffGranularity::Line => "line",
        DiffGranularity::Word => "word",
        DiffGranularity::Sentence => "sentence",
        DiffGranularity::Paragraph => "paragraph",
    }
}

/// Split `text` into non-empty segments that concatenate back to `text`. Each
/// segment keeps its trailing separator.
pub fn segments(text: &str, granularity: DiffGranularity) -> Vec<&str> {
    match granularity {
        DiffGranularity::Line => text.split_inclusive('\n').collect(),
        DiffGranularity::Word => split_after(text, |prev, next| {
            prev.is_whitespace() && !next.is_whitespace()
        }),
        DiffGranularity::Sentence => sentence_segments(text),
        DiffGranularity::Paragraph => paragraph_segments(text),
    }
}

/// Cut between two adjacent characters whenever `cut(prev, next)` holds.
fn split_after(text: &str, cut: impl Fn(char, char) -> bool) -> Vec<&str> {
    let mut out = Vec::new();
    let mut seg_start = 0;
    let mut prev: Option<char> = None;
    for (byte, ch) in text.char_indices() {
        if let Some(p) = prev
            && cut(p, ch)
        {
            out.push(&text[seg_start..byte]);
            seg_start = byte;
        }
        prev = Some(ch);
    }
    if seg_start < text.len() {
        out.push(&text[seg_start..]);
    }
    out
}

fn sentence_segments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut seg_start = 0;
    let mut saw_terminator = false;
    let mut saw_space_after = false;
    for (byte, ch) in text.char_indices() {
        if saw_terminator && saw_space_after && !ch.is_whitespace() {
            out.push(&text[seg_start..byte]);
            seg_start = byte;
            saw_terminator = false;
            saw_space_after = false;
        }
        if matches!(ch, '.' | '!' | '?') {
            saw_terminator = true;
            saw_space_after = false;
        } else if saw_terminator && ch.is_whitespace() {
            saw_space_after = true;
        } else if !ch.is_whitespace() {
            saw_terminator = false;
        }
    }
    if seg_start < text.len() {
        out.push(&text[seg_start..]);
    }
    out
}

fn paragraph_segments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut seg_start = 0;
    let mut newline_run = 0usize;
    for (byte, ch) in text.char_indices() {
        if ch == '\n' {
            newline_run += 1;
            continue;
        }
        if newline_run >= 2 && !ch.is_whitespace() {
            out.push(&text[seg_start..byte]);
            seg_start = byte;
        }
        if !ch.is_whitespace() {
            newline_run = 0;
        }
    }
    if seg_start < text.len() {
        out.push(&text[seg_start..]);
    }
    out
}
