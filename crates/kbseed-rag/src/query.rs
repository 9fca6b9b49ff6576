//! Similarity query over the seeded collection
//!
//! Author: hephaex@gmail.com

use kbseed_core::{QueryConfig, QueryResult, Result};
use kbseed_vector::{EmbeddingClient, VectorCollection};
use std::sync::Arc;

/// Context returned when retrieval finds nothing
pub const NO_CONTEXT_FALLBACK: &str = "No specific information found in the knowledge base.";

/// Embeds a question and returns the nearest stored documents
pub struct QueryService {
    embedder: Arc<dyn EmbeddingClient>,
    collection: Arc<dyn VectorCollection>,
    top_k: usize,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        collection: Arc<dyn VectorCollection>,
        config: &QueryConfig,
    ) -> Self {
        Self {
            embedder,
            collection,
            top_k: config.top_k,
        }
    }

    /// Override the number of matches per query
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Top-k matches for `text`, closest first
    pub async fn answer_query(&self, text: &str) -> Result<QueryResult> {
        let embedding = self.embedder.embed(text).await?;
        let result = self.collection.query(&embedding, self.top_k).await?;

        tracing::debug!(
            collection = %self.collection.name(),
            k = self.top_k,
            matches = result.len(),
            "Query answered"
        );
        Ok(result)
    }
}

/// Join retrieved documents into one context block for answer synthesis
pub fn build_context(result: &QueryResult) -> String {
    let documents = result.documents();
    if documents.is_empty() {
        return NO_CONTEXT_FALLBACK.to_string();
    }
    documents.join("\n\n")
}
