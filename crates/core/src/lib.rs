// crates/core/src/lib.rs
//! Core building blocks for cvsum: answer types, text helpers, the text
//! extraction collaborator, and the two summarization engines (in-process
//! heuristic and the out-of-process inference bridge).

pub mod bridge;
pub mod engine;
pub mod error;
pub mod extract;
pub mod text;
pub mod types;

pub use bridge::{BridgeConfig, InferenceBridge};
pub use engine::{
    EngineKind, Engines, HeuristicEngine, NoopProgress, ProgressListener, SummarizeContext,
    Summarizer,
};
pub use error::*;
pub use extract::{PdfTextExtractor, PlainTextExtractor, TextExtractor};
pub use types::*;
