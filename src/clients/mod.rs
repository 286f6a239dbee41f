//! Interfaces to the external services the workflow depends on, plus the
//! HTTP adapters used by the CLI.

pub mod json_utils;
pub mod ollama;
pub mod pinecone;
pub mod retry;

pub use ollama::{OllamaEmbedder, OllamaGenerationClient};
pub use pinecone::PineconeRetrievalClient;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Message, RetrievedDocument};
use crate::tools::ToolSpec;

// ============================================================================
// Upstream Errors
// ============================================================================

/// Failure talking to an external service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Transient errors may succeed on retry: connect/timeout failures and
    /// HTTP 408, 429 and 5xx. Other client errors and bad payloads are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Connect(_) | UpstreamError::Timeout(_) => true,
            UpstreamError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            UpstreamError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            UpstreamError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            UpstreamError::Malformed(err.to_string())
        }
    }
}

/// Turn a non-success HTTP response into an [`UpstreamError::Status`].
pub(crate) async fn status_error(response: reqwest::Response) -> UpstreamError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    UpstreamError::Status { status, body }
}

// ============================================================================
// Service Interfaces
// ============================================================================

/// Text-generation service. Returns either free text or a tool-invocation request.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        instruction: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, UpstreamError>;
}

/// Embedding model for retrieval queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError>;
}

/// Vector similarity search over the knowledge store.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn query(
        &self,
        embedding: &[f32],
        namespace: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>, UpstreamError>;
}
