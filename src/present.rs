//! Plain-text rendering of answers and their sources.

use crate::retriever::RetrievedResult;

/// Default number of characters shown per source preview.
pub const DEFAULT_PREVIEW_CHARS: usize = 400;

const RULE_WIDTH: usize = 80;

/// Formats sources as blocks of citation id, distance, provenance and a preview.
pub fn format_sources(results: &[RetrievedResult], max_chars: usize) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    results
        .iter()
        .map(|result| {
            format!(
                "{} (distance={:.4}) {}\n{}",
                result.citation_id,
                result.distance,
                result.metadata.label(),
                truncate_chars(result.content.trim(), max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join(&format!("\n{rule}\n"))
}

/// Full answer view: answer text, sources and optionally the prompt.
pub fn format_answer(
    answer: &str,
    results: &[RetrievedResult],
    prompt: Option<&str>,
    max_chars: usize,
) -> String {
    let mut out = String::new();
    out.push_str("--- Answer ---\n");
    out.push_str(answer.trim());
    out.push_str("\n\n--- Sources ---\n");
    out.push_str(&format_sources(results, max_chars));
    if let Some(prompt) = prompt {
        out.push_str("\n\n--- Prompt ---\n");
        out.push_str(prompt);
    }
    out.push('\n');
    out
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
