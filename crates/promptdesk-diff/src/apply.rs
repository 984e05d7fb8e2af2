//! Applying and reverting positioned chunks against a text buffer.
//!
//! Offsets are validated against the buffer as it is *now*. A chunk generated
//! against an older buffer either fails the bounds check or the content check,
//! and callers are expected to discard it or re-derive its offsets.

use promptdesk_core::{DiffChunk, EditError, byte_offset, char_len};
use sha2::{Digest, Sha256};
use std::ops::Range;
use uuid::Uuid;

/// Replace the chunk's range with its new text.
pub fn apply_chunk(buffer: &str, chunk: &DiffChunk) -> Result<String, EditError> {
    let bytes = byte_range(buffer, chunk.start_index, chunk.end_index)?;
    Ok(splice(buffer, bytes, chunk.replacement()))
}

/// Inverse of [`apply_chunk`]: put the original text back where the new text was
/// inserted, i.e. over `start .. start + len(new_text)`.
pub fn revert_chunk(buffer: &str, chunk: &DiffChunk) -> Result<String, EditError> {
    let end = chunk
        .start_index
        .saturating_add(char_len(chunk.replacement()) as i64);
    let bytes = byte_range(buffer, chunk.start_index, end)?;
    Ok(splice(buffer, bytes, chunk.original()))
}

/// True when the chunk's original text still sits at its offsets.
pub fn chunk_matches(buffer: &str, chunk: &DiffChunk) -> bool {
    match byte_range(buffer, chunk.start_index, chunk.end_index) {
        Ok(bytes) => &buffer[bytes] == chunk.original(),
        Err(_) => false,
    }
}

/// Re-derive a chunk's offsets against `buffer`, searching from `hint` first.
pub fn relocate(buffer: &str, chunk: &DiffChunk, hint: usize) -> Option<DiffChunk> {
    let (start, end) = crate::locate(buffer, chunk.original(), hint)?;
    let mut moved = chunk.clone();
    moved.start_index = start as i64;
    moved.end_index = end as i64;
    Some(moved)
}

/// Carry `chunk`, positioned against the text before `applied`, over to the
/// text after it. Chunks past the applied span move by its length change;
/// chunks overlapping it have no position left and come back `None`.
pub fn rebase_chunk(chunk: &DiffChunk, applied: &DiffChunk) -> Option<DiffChunk> {
    let (Some(span), Some(done)) = (chunk.span(), applied.span()) else {
        return Some(chunk.clone());
    };
    if span.end <= done.start {
        return Some(chunk.clone());
    }
    if span.start < done.end {
        return None;
    }
    let delta = char_len(applied.replacement()) as i64 - done.len() as i64;
    let mut moved = chunk.clone();
    moved.start_index += delta;
    moved.end_index += delta;
    Some(moved)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyAllOutcome {
    pub text: String,
    pub applied: Vec<Uuid>,
    /// Chunks carrying the unlocatable sentinel.
    pub skipped: Vec<Uuid>,
    /// The chunk that stopped the batch. Chunks after it were not attempted.
    pub error: Option<(Uuid, EditError)>,
}

/// Indices of `chunks` in application order: descending start, wider chunks
/// first on equal starts, later chunks first on identical ranges. Applying in
/// this order leaves the offsets of every not-yet-applied chunk untouched.
pub fn apply_order(chunks: &[DiffChunk]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..chunks.len()).collect();
    order.sort_by(|&a, &b| {
        let ka = (chunks[a].start_index, chunks[a].end_index, a);
        let kb = (chunks[b].start_index, chunks[b].end_index, b);
        kb.cmp(&ka)
    });
    order
}

/// Apply every located chunk, re-validating each one just before it is applied.
pub fn apply_all(buffer: &str, chunks: &[DiffChunk]) -> ApplyAllOutcome {
    let mut outcome = ApplyAllOutcome {
        text: buffer.to_string(),
        applied: Vec::new(),
        skipped: Vec::new(),
        error: None,
    };
    for idx in apply_order(chunks) {
        let chunk = &chunks[idx];
        if !chunk.is_located() {
            outcome.skipped.push(chunk.id);
            continue;
        }
        if !chunk_matches(&outcome.text, chunk) {
            outcome.error = Some((chunk.id, stale(&outcome.text, chunk)));
            break;
        }
        match apply_chunk(&outcome.text, chunk) {
            Ok(next) => {
                outcome.text = next;
                outcome.applied.push(chunk.id);
            }
            Err(err) => {
                outcome.error = Some((chunk.id, err));
                break;
            }
        }
    }
    outcome
}

/// Cursor position after a programmatic mutation, clamped to the new length.
#[must_use]
pub fn restore_cursor(position: usize, new_len: usize) -> usize {
    position.min(new_len)
}

/// SHA-256 of the buffer contents, used to notice out-of-band edits.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn stale(buffer: &str, chunk: &DiffChunk) -> EditError {
    EditError::OffsetOutOfRange {
        start: chunk.start_index,
        end: chunk.end_index,
        len: char_len(buffer),
    }
}

fn byte_range(buffer: &str, start: i64, end: i64) -> Result<Range<usize>, EditError> {
    let len = char_len(buffer);
    let out_of_range = || EditError::OffsetOutOfRange { start, end, len };
    if start < 0 || end < start || end as usize > len {
        return Err(out_of_range());
    }
    let from = byte_offset(buffer, start as usize).ok_or_else(out_of_range)?;
    let to = byte_offset(buffer, end as usize).ok_or_else(out_of_range)?;
    Ok(from..to)
}

fn splice(buffer: &str, bytes: Range<usize>, insert: &str) -> String {
    let mut out = String::with_capacity(buffer.len() - bytes.len() + insert.len());
    out.push_str(&buffer[..bytes.start]);
    out.push_str(insert);
    out.push_str(&buffer[bytes.end..]);
    out
}
