//! Knowledge retrieval: embed once, query every namespace, concatenate.

use std::sync::Arc;

use futures::future::try_join_all;

use crate::clients::{Embedder, RetrievalClient, RetryPolicy};
use crate::models::RetrievedDocument;
use crate::orchestrator::WorkflowError;

/// Tool-result text when nothing matched.
pub const NO_DOCUMENTS: &str = "No documents were found for this query.";

pub const DEFAULT_NAMESPACES: [&str; 2] = ["user-guide", "ticket"];
pub const DEFAULT_TOP_K: usize = 3;

/// Rendered retrieval result.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    pub documents: Vec<RetrievedDocument>,
    pub text: String,
}

#[derive(Clone)]
pub struct KnowledgeRetriever {
    embedder: Arc<dyn Embedder>,
    client: Arc<dyn RetrievalClient>,
    namespaces: Vec<String>,
    top_k: usize,
    retry: RetryPolicy,
}

impl KnowledgeRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, client: Arc<dyn RetrievalClient>) -> Self {
        Self {
            embedder,
            client,
            namespaces: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            top_k: DEFAULT_TOP_K,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub async fn retrieve(&self, query: &str) -> Result<RetrievalOutcome, WorkflowError> {
        let embedding = self
            .retry
            .execute("embedding", || self.embedder.embed(query))
            .await?;

        let per_namespace = try_join_all(self.namespaces.iter().map(|namespace| {
            let embedding = &embedding;
            async move {
                let mut documents = self
                    .retry
                    .execute("retrieval", || {
                        self.client.query(embedding, namespace, self.top_k)
                    })
                    .await?;
                for doc in &mut documents {
                    if doc.namespace.is_empty() {
                        doc.namespace = namespace.clone();
                    }
                }
                Ok::<_, WorkflowError>(documents)
            }
        }))
        .await?;

        // Namespace order preserved, no re-ranking
        let documents: Vec<_> = per_namespace.into_iter().flatten().collect();
        tracing::debug!(
            query_len = query.len(),
            documents = documents.len(),
            "Retrieved documents"
        );

        let text = render(&documents);
        Ok(RetrievalOutcome { documents, text })
    }
}

fn render(documents: &[RetrievedDocument]) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS.to_string();
    }

    documents
        .iter()
        .map(RetrievedDocument::text)
        .collect::<Vec<_>>()
        .join("\n")
}
