// crates/core/src/text.rs
//! Whitespace, truncation and citation helpers shared by both engines.

use crate::error::ValidationError;

/// Maximum length (in chars) of a citation before the ellipsis is appended.
pub const CITATION_MAX_CHARS: usize = 220;

/// Citation used when the document produced no text at all.
pub const NO_TEXT_CITATION: &str = "No text could be extracted from the CV.";

const ELLIPSIS: &str = "...";

/// Collapse every whitespace run into a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep the first `max_chars` characters, appending `...` when anything was cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], ELLIPSIS),
        None => text.to_string(),
    }
}

/// Citation substituted when an engine reports none for an answer.
pub fn fallback_citation(source_text: &str) -> String {
    let normalized = collapse_whitespace(source_text);
    if normalized.is_empty() {
        return NO_TEXT_CITATION.to_string();
    }
    truncate_with_ellipsis(&normalized, CITATION_MAX_CHARS)
}

/// Trim questions and drop blank ones.
///
/// Fails when nothing was submitted or when every entry was blank.
pub fn normalize_questions<I, S>(raw: I) -> Result<Vec<String>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen_any = false;
    let questions: Vec<String> = raw
        .into_iter()
        .inspect(|_| seen_any = true)
        .map(|q| q.as_ref().trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if !seen_any {
        return Err(ValidationError::NoQuestions);
    }
    if questions.is_empty() {
        return Err(ValidationError::BlankQuestions);
    }
    Ok(questions)
}
