// crates/core/src/error.rs
use thiserror::Error;

/// Rejected submission input. Raised before a job exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("At least one question is required.")]
    NoQuestions,

    #[error("Questions cannot be blank.")]
    BlankQuestions,

    #[error("File is required.")]
    MissingDocument,

    #[error("Only PDF files are supported (got {filename:?}).")]
    UnsupportedDocument { filename: String },
}

/// Errors raised while turning document bytes into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Could not parse PDF file: {0}")]
    Parse(String),

    #[error("Could not parse PDF file: extractor panicked")]
    Panicked,
}

/// Errors raised by an engine (heuristic or subprocess bridge).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn inference process: {0}")]
    SpawnFailed(String),

    #[error("Failed to run inference process: {0}")]
    Io(String),

    #[error("Python inference timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Python inference failed: {diagnostics}")]
    ProcessExit {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Python inference returned no output.")]
    NoOutput,

    #[error("Invalid response from Python inference: {0}")]
    InvalidResponse(String),

    #[error("Python inference was interrupted.")]
    Interrupted,

    #[error("Failed to prepare inference payload: {0}")]
    Serialize(String),
}

impl EngineError {
    pub fn io(context: &str, source: std::io::Error) -> Self {
        Self::Io(format!("{context}: {source}"))
    }

    /// True for the deadline-exceeded sub-kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::NoQuestions.to_string(),
            "At least one question is required."
        );
        assert_eq!(
            ValidationError::BlankQuestions.to_string(),
            "Questions cannot be blank."
        );
        let err = ValidationError::UnsupportedDocument {
            filename: "cv.docx".to_string(),
        };
        assert!(err.to_string().contains("cv.docx"));
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Timeout { secs: 60 };
        assert_eq!(err.to_string(), "Python inference timed out after 60s");
        assert!(err.is_timeout());

        let err = EngineError::ProcessExit {
            code: Some(1),
            diagnostics: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Python inference failed: boom");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_engine_error_io_context() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = EngineError::io("writing request", io_err);
        assert!(err.to_string().contains("writing request"));
        assert!(err.to_string().contains("pipe closed"));
    }
}
