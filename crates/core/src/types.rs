// crates/core/src/types.rs
//! Answer payload shared by both engines and every transport.

use serde::{Deserialize, Serialize};

/// Structured answer set produced by an engine for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeResult {
    /// True when the heuristic engine produced this result.
    pub mock_mode: bool,
    pub summary: String,
    /// One entry per question, in question order.
    pub answers: Vec<AnswerItem>,
    pub model_info: String,
}

/// Answer to a single question.
///
/// After normalization `confidence` is within `[0, 1]` and `citations` is
/// never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerItem {
    pub question: String,
    pub answer: String,
    pub confidence: f64,
    pub citations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_result_serializes_camel_case() {
        let result = SummarizeResult {
            mock_mode: true,
            summary: "mock summary".to_string(),
            answers: vec![AnswerItem {
                question: "What is the strongest skill?".to_string(),
                answer: "Rust".to_string(),
                confidence: 0.91,
                citations: vec!["5 years Rust development".to_string()],
            }],
            model_info: "mock-v1".to_string(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mockMode"], true);
        assert_eq!(json["modelInfo"], "mock-v1");
        assert_eq!(json["answers"][0]["confidence"], 0.91);
        assert_eq!(json["answers"][0]["citations"][0], "5 years Rust development");
    }
}
