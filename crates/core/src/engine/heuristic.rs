// crates/core/src/engine/heuristic.rs
//! Heuristic engine — answers questions by token overlap with document snippets.
//!
//! No model is involved: each question gets a canned answer plus the
//! snippets that share the most tokens with it as citations.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex_lite::Regex;

use super::{SummarizeContext, Summarizer};
use crate::error::EngineError;
use crate::text::{collapse_whitespace, truncate_with_ellipsis, CITATION_MAX_CHARS, NO_TEXT_CITATION};
use crate::types::{AnswerItem, SummarizeResult};

pub const HEURISTIC_MODEL_INFO: &str = "mock-rule-engine-v1";

const MAX_CITATIONS: usize = 2;
const MIN_SNIPPET_CHARS: usize = 20;
const SUMMARY_PREVIEW_CHARS: usize = 300;
const MIN_CONFIDENCE: f64 = 0.25;
const MAX_CONFIDENCE: f64 = 0.98;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
static LINE_BREAK_RE: OnceLock<Regex> = OnceLock::new();
static SENTENCE_END_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("static token regex"))
}

fn line_break_re() -> &'static Regex {
    LINE_BREAK_RE.get_or_init(|| Regex::new(r"\r?\n").expect("static line regex"))
}

fn sentence_end_re() -> &'static Regex {
    SENTENCE_END_RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static sentence regex"))
}

/// In-process engine used when a submission sets `useMock`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEngine;

impl HeuristicEngine {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of the engine; `report` receives engine-scale progress.
    pub fn analyze(
        &self,
        text: &str,
        questions: &[String],
        report: impl Fn(u8, &str),
    ) -> SummarizeResult {
        report(5, "Preparing mock analysis.");
        let normalized = collapse_whitespace(text);
        let summary = if normalized.is_empty() {
            "No text was extracted from the uploaded CV.".to_string()
        } else {
            format!(
                "Candidate profile (mock): {}",
                truncate_with_ellipsis(&normalized, SUMMARY_PREVIEW_CHARS)
            )
        };

        report(30, "Selecting supporting citations.");
        let snippets = split_snippets(text);
        let total = questions.len().max(1);
        let mut answers = Vec::with_capacity(questions.len());

        for (i, question) in questions.iter().enumerate() {
            let (citations, confidence) = if snippets.is_empty() {
                (vec![NO_TEXT_CITATION.to_string()], MIN_CONFIDENCE)
            } else {
                let citations = select_citations(question, &snippets);
                let confidence = estimate_confidence(question, &citations);
                (citations, confidence)
            };

            answers.push(AnswerItem {
                question: question.clone(),
                answer: format!(
                    "Mock answer for: \"{question}\". Switch off mock mode later to run real local GPU inference."
                ),
                confidence,
                citations,
            });

            let done = (i + 1) as f64 / total as f64;
            let progress = 40 + (done * 50.0).round() as u8;
            report(progress, &format!("Generated mock answer {}/{}.", i + 1, total));
        }

        report(100, "Mock inference complete.");
        SummarizeResult {
            mock_mode: true,
            summary,
            answers,
            model_info: HEURISTIC_MODEL_INFO.to_string(),
        }
    }
}

#[async_trait]
impl Summarizer for HeuristicEngine {
    async fn summarize(
        &self,
        text: &str,
        questions: &[String],
        ctx: SummarizeContext<'_>,
    ) -> Result<SummarizeResult, EngineError> {
        let result = self.analyze(text, questions, |p, msg| ctx.report(p, msg));
        tracing::debug!(answers = result.answers.len(), "heuristic analysis complete");
        Ok(result)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Split at line breaks and after sentence-ending punctuation, keeping
/// collapsed pieces longer than 20 chars. Falls back to the whole text.
pub fn split_snippets(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut snippets = Vec::new();
    for line in line_break_re().split(text) {
        let mut start = 0;
        for m in sentence_end_re().find_iter(line) {
            // keep the punctuation with its sentence
            push_snippet(&mut snippets, &line[start..m.start() + 1]);
            start = m.end();
        }
        push_snippet(&mut snippets, &line[start..]);
    }

    if snippets.is_empty() {
        snippets.push(collapse_whitespace(text));
    }
    snippets
}

fn push_snippet(snippets: &mut Vec<String>, raw: &str) {
    let cleaned = collapse_whitespace(raw);
    if cleaned.chars().count() > MIN_SNIPPET_CHARS {
        snippets.push(cleaned);
    }
}

/// Lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    token_re()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Share of question tokens that also appear in `snippet`.
pub fn overlap_score(question_tokens: &HashSet<String>, snippet: &str) -> f64 {
    if question_tokens.is_empty() || snippet.trim().is_empty() {
        return 0.0;
    }
    let snippet_tokens = tokenize(snippet);
    let matches = question_tokens
        .iter()
        .filter(|t| snippet_tokens.contains(*t))
        .count();
    matches as f64 / question_tokens.len() as f64
}

fn select_citations(question: &str, snippets: &[String]) -> Vec<String> {
    let question_tokens = tokenize(question);
    let mut ranked: Vec<(f64, &String)> = snippets
        .iter()
        .map(|s| (overlap_score(&question_tokens, s), s))
        .collect();
    // stable: equal scores keep document order
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    let best = ranked.first().map(|(score, _)| *score).unwrap_or(0.0);
    if best == 0.0 {
        return vec![truncate_with_ellipsis(&snippets[0], CITATION_MAX_CHARS)];
    }

    ranked
        .into_iter()
        .take(MAX_CITATIONS)
        .map(|(_, s)| truncate_with_ellipsis(s, CITATION_MAX_CHARS))
        .collect()
}

fn estimate_confidence(question: &str, citations: &[String]) -> f64 {
    if citations.is_empty() {
        return MIN_CONFIDENCE;
    }
    let question_tokens = tokenize(question);
    let best = citations
        .iter()
        .map(|c| overlap_score(&question_tokens, c))
        .fold(0.0, f64::max);

    let mut confidence = 0.35 + best * 0.55;
    if citations.len() > 1 {
        confidence += 0.05;
    }
    confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}
