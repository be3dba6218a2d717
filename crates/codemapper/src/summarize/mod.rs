//! Text-summarization backend consumed by the scan coordinator.

mod ollama;
mod prompts;

pub use ollama::OllamaSummarizer;
pub use prompts::{build_user_prompt, SYSTEM_PROMPT};

use async_trait::async_trait;
use thiserror::Error;

use crate::analysis::Symbol;

#[derive(Debug, Error)]
pub enum SummarizeError {
    /// Transport failure talking to the backend
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A backend that turns one symbol into a short markdown summary.
///
/// Calls carry no timeout; a hung backend stalls the scan that is waiting on it.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Cheap reachability check, run once at the start of every scan.
    async fn is_available(&self) -> bool;

    async fn summarize(&self, symbol: &Symbol) -> Result<String, SummarizeError>;
}
