// crates/core/src/bridge/protocol.rs
//! Wire format spoken with the inference worker.
//!
//! - stdin: one JSON request `{"cv_text": ..., "questions": [...]}`
//! - stderr: `PROGRESS:{"progress":N,"message":"..."}` lines mixed with free text
//! - stdout: one JSON response document

use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::text::fallback_citation;
use crate::types::{AnswerItem, SummarizeResult};

pub const PROGRESS_PREFIX: &str = "PROGRESS:";
pub const DEFAULT_PROGRESS_MESSAGE: &str = "Running inference.";
pub const DEFAULT_MODEL_INFO: &str = "python-gpu-bridge";
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Request document written to the worker's stdin.
#[derive(Debug, Serialize)]
pub struct InferenceRequest<'a> {
    pub cv_text: &'a str,
    pub questions: &'a [String],
}

impl<'a> InferenceRequest<'a> {
    pub fn new(cv_text: &'a str, questions: &'a [String]) -> Self {
        Self { cv_text, questions }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::Serialize(e.to_string()))
    }
}

/// Classification of one stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Plain diagnostic text.
    NotProgress,
    /// Carried the prefix but the payload did not parse; dropped silently.
    Malformed,
    Update { progress: u8, message: String },
}

pub fn parse_progress_line(line: &str) -> ProgressLine {
    let Some(payload) = line.strip_prefix(PROGRESS_PREFIX) else {
        return ProgressLine::NotProgress;
    };

    let Ok(value) = serde_json::from_str::<Value>(payload.trim()) else {
        return ProgressLine::Malformed;
    };
    let progress = as_i64(&value["progress"]).unwrap_or(0).clamp(0, 100) as u8;
    let message = as_text(&value["message"]).unwrap_or_else(|| DEFAULT_PROGRESS_MESSAGE.to_string());
    ProgressLine::Update { progress, message }
}

/// Parse the worker's stdout into a result, applying defaults and citation
/// fallback against `source_text`.
///
/// Only a document that is not JSON at all is rejected. Missing fields, wrong
/// scalar types and non-array lists fall back to defaults.
pub fn parse_response(stdout: &str, source_text: &str) -> Result<SummarizeResult, EngineError> {
    let root: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

    let answers = array_items(&root["answers"])
        .map(|a| normalize_answer(a, source_text))
        .collect();

    Ok(SummarizeResult {
        mock_mode: as_bool(&root["mockMode"]).unwrap_or(false),
        summary: as_text(&root["summary"]).unwrap_or_default(),
        answers,
        model_info: as_text(&root["modelInfo"]).unwrap_or_else(|| DEFAULT_MODEL_INFO.to_string()),
    })
}

fn normalize_answer(raw: &Value, source_text: &str) -> AnswerItem {
    let mut citations: Vec<String> = array_items(&raw["citations"])
        .filter_map(as_text)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if citations.is_empty() {
        citations.push(fallback_citation(source_text));
    }

    let confidence = as_f64(&raw["confidence"]).unwrap_or(DEFAULT_CONFIDENCE);
    let confidence = if confidence.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        confidence.clamp(0.0, 1.0)
    };

    AnswerItem {
        question: as_text(&raw["question"]).unwrap_or_default(),
        answer: as_text(&raw["answer"]).unwrap_or_default(),
        confidence,
        citations,
    }
}

/// Elements of `value` when it is an array, nothing otherwise.
fn array_items(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().into_iter().flatten()
}

/// Scalar rendered as text. `null`/missing gives `None`; containers give "".
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(String::new()),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integer view of a number or numeric string; fractions are truncated.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
