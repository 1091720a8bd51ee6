// crates/core/src/extract.rs
//! Document text extraction.
//!
//! Extraction is synchronous and CPU-bound; async callers should run it on
//! `tokio::task::spawn_blocking`.

use std::panic::{self, AssertUnwindSafe};

use crate::error::ExtractionError;

/// Turns raw document bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// PDF extractor backed by the `pdf-extract` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        // pdf-extract panics on some malformed inputs instead of returning Err.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(bytes)
        }));

        match outcome {
            Ok(Ok(text)) => {
                tracing::debug!(bytes = bytes.len(), chars = text.len(), "pdf text extracted");
                Ok(text)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, bytes = bytes.len(), "pdf extraction failed");
                Err(ExtractionError::Parse(e.to_string()))
            }
            Err(_) => {
                tracing::error!(bytes = bytes.len(), "pdf extractor panicked");
                Err(ExtractionError::Panicked)
            }
        }
    }
}

/// Treats the upload as UTF-8 text (invalid sequences are replaced).
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
