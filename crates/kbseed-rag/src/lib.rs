//! kbseed RAG - Ingestion and retrieval over a vector collection
//!
//! This crate wires the embedding and collection clients into the two
//! workflows of the knowledge base:
//! - [`IngestionOrchestrator`]: full-replace reseed from text chunks and videos
//! - [`QueryService`]: embed a question and return its nearest documents
//!
//! Author: hephaex@gmail.com

pub mod ingest;
pub mod query;
pub mod source;

pub use ingest::{
    build_documents, IngestOptions, IngestionOrchestrator, IngestionReport, SkippedDocument,
    Throttle,
};
pub use query::{build_context, QueryService, NO_CONTEXT_FALLBACK};
pub use source::{ChunkSource, JsonChunkFile, VideoManifestFile, VideoSource};
