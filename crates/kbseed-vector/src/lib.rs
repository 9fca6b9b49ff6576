//! kbseed Vector - Embedding and vector collection clients
//!
//! Provides the two remote collaborators of the pipeline:
//! - [`EmbeddingClient`]: text to fixed-length vector (Hugging Face)
//! - [`VectorCollection`]: one named collection in a Chroma v2 store
//!
//! Both clients are written against [`kbseed_core::HttpTransport`] so they
//! can run over reqwest in production and over in-memory fakes in tests.

use async_trait::async_trait;
use kbseed_core::{DocumentBatch, QueryResult, StoreError};

pub mod chroma_store;
pub mod embedding;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use chroma_store::ChromaCollection;
pub use embedding::{mean_pool, EmbeddingClient, HuggingFaceEmbedding};
pub use transport::ReqwestTransport;

/// Operations on a single named collection
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Human-assigned collection name
    fn name(&self) -> &str;

    /// Server id of the collection, or `None` if it does not exist
    async fn resolve_collection_id(&self) -> Result<Option<String>, StoreError>;

    /// Server id of the collection, creating it if needed
    async fn ensure_collection(&self) -> Result<String, StoreError>;

    /// Insert a whole batch; any failure aborts the batch
    async fn insert_batch(&self, batch: &DocumentBatch) -> Result<usize, StoreError>;

    /// Delete every record; returns how many were deleted
    async fn clear_collection(&self) -> Result<usize, StoreError>;

    /// `k` nearest documents to `embedding`, closest first
    async fn query(&self, embedding: &[f32], k: usize) -> Result<QueryResult, StoreError>;

    /// Number of records; 0 when the collection is missing or unreachable
    async fn count(&self) -> usize;
}
