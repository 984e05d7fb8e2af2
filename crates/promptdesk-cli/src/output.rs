use anyhow::Result;
use promptdesk_core::{DiffChunk, DiffType};
use serde::Serialize;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// One line per chunk, prefixed like a unified diff.
pub(crate) fn render_chunk(chunk: &DiffChunk) -> String {
    let (marker, body) = match chunk.diff_type {
        DiffType::Addition => ('+', chunk.replacement()),
        DiffType::Deletion => ('-', chunk.original()),
        DiffType::Unchanged => (' ', chunk.original()),
        DiffType::Modification => {
            return format!(
                "~ [{}..{}] {:?} -> {:?}",
                chunk.start_index,
                chunk.end_index,
                chunk.original(),
                chunk.replacement()
            );
        }
    };
    format!("{marker}{}", body.strip_suffix('\n').unwrap_or(body))
}
