//! Text embedding generation for notes
//!
//! Embeddings are derived data: a note is always persisted, and an embedding
//! that cannot be produced leaves the note without a vector.

mod openai;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::{OpenAiEmbedder, DEFAULT_EMBEDDING_MODEL};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Invalid embedding configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Embedding HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Embedding API error: {0}")]
    Api(String),
    #[error("Invalid embedding payload: {0}")]
    InvalidPayload(String),
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Embedding generation is disabled")]
    Disabled,
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Turns text into a vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;
}

/// Embedder used when no provider is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
        Err(EmbeddingError::Disabled)
    }
}

/// Build the text embedded for a note
///
/// Returns `None` when both halves are absent or empty, in which case no
/// embedding is requested.
pub fn embedding_text(title: Option<&str>, content: Option<&str>) -> Option<String> {
    let title = title.filter(|title| !title.is_empty());
    let content = content.filter(|content| !content.is_empty());

    match (title, content) {
        (Some(title), Some(content)) => Some(format!("Title: {title}\n\nContent: {content}")),
        (Some(title), None) => Some(format!("Title: {title}")),
        (None, Some(content)) => Some(format!("Content: {content}")),
        (None, None) => None,
    }
}
