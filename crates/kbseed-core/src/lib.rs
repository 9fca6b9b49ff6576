//! kbseed Core - Document model, errors, and shared seams
//!
//! This crate defines the abstractions shared by the rest of kbseed:
//! - Document and collection data model (documents, batches, query results)
//! - Error taxonomy for configuration, embedding, storage, and ingestion
//! - Configuration management
//! - Backoff policies for retried upstream calls
//! - The HTTP transport trait the REST clients are written against
//!
//! Author: hephaex@gmail.com

pub mod backoff;
pub mod config;
pub mod transport;

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedDelay, NoRetry};
pub use config::{
    AppConfig, ClearPolicy, ConfigError, EmbeddingConfig, IngestConfig, LoggingConfig,
    QueryConfig, StoreConfig,
};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Failures of the HTTP layer itself (no response was received)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Errors raised while turning one text into an embedding
///
/// These are recoverable per item: the ingestion run logs and skips the
/// document, except for [`EmbeddingError::DimensionMismatch`].
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Cannot embed empty text")]
    EmptyInput,

    #[error("Embedding model is still loading after the warm-up retry")]
    ModelLoading,

    #[error("Embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected embedding response shape: {0}")]
    UnexpectedShape(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised by the vector collection client
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid batch: {0}")]
    Validation(String),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an unreadable response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("Vector store transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Run-level ingestion failures
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("No documents were embedded successfully ({attempted} attempted)")]
    NoDocuments { attempted: usize },

    #[error("Document {id} produced a {actual}-dimensional embedding, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to load {name}: {message}")]
    Source { name: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error type for kbseed operations
#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KbError>;

// ============================================================================
// Metadata
// ============================================================================

/// A scalar metadata value as accepted by the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Per-document metadata mapping
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A fixed-length embedding vector
pub type Embedding = Vec<f32>;

// ============================================================================
// Source Records
// ============================================================================

/// One chunk of text produced by the external document loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Chunk text
    pub content: String,

    /// Page of the source document the chunk starts on
    #[serde(default)]
    pub page: u32,
}

impl TextChunk {
    pub fn new(content: impl Into<String>, page: u32) -> Self {
        Self {
            content: content.into(),
            page,
        }
    }
}

/// One entry of the video manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    /// Transcript or description that gets embedded
    pub content: String,
    #[serde(default)]
    pub r2_file_name: Option<String>,
}

// ============================================================================
// Documents
// ============================================================================

/// Kind of source a document was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    Video,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Stable id of the text chunk at `index`
pub fn chunk_document_id(index: usize) -> String {
    format!("faq_chunk_{index}")
}

/// Stable id of a video document
pub fn video_document_id(video_id: &str) -> String {
    format!("video_{video_id}")
}

/// A document ready to be embedded and stored
///
/// Ids are derived only from the source position or the video id, so the
/// same inputs always produce the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source_type: SourceType,
    pub metadata: Metadata,
}

impl Document {
    /// Build the document for the text chunk at `index`
    pub fn from_chunk(index: usize, chunk: &TextChunk, source_name: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), source_name.into());
        metadata.insert("type".to_string(), SourceType::Text.to_string().into());
        metadata.insert("page".to_string(), chunk.page.into());
        metadata.insert("chunk_index".to_string(), index.into());

        Self {
            id: chunk_document_id(index),
            content: chunk.content.clone(),
            source_type: SourceType::Text,
            metadata,
        }
    }

    /// Build the document for a video manifest entry
    pub fn from_video(video: &VideoRecord, source_name: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), source_name.into());
        metadata.insert("type".to_string(), SourceType::Video.to_string().into());
        metadata.insert("video_id".to_string(), video.id.as_str().into());
        metadata.insert(
            "r2_file_name".to_string(),
            video.r2_file_name.clone().unwrap_or_default().into(),
        );
        metadata.insert("video_title".to_string(), video.title.as_str().into());

        Self {
            id: video_document_id(&video.id),
            content: video.content.clone(),
            source_type: SourceType::Video,
            metadata,
        }
    }
}

// ============================================================================
// Batches
// ============================================================================

/// Column-oriented batch as sent to the store's insert endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentBatch {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub embeddings: Vec<Embedding>,
    /// Either one entry per id, or empty (filled with empty mappings on insert)
    pub metadatas: Vec<Metadata>,
}

impl DocumentBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document together with its embedding
    pub fn push(&mut self, document: Document, embedding: Embedding) {
        self.ids.push(document.id);
        self.documents.push(document.content);
        self.embeddings.push(embedding);
        self.metadatas.push(document.metadata);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dimension of the first embedding, if any
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }

    /// Check the column shapes without touching the network
    pub fn validate(&self) -> std::result::Result<(), StoreError> {
        let n = self.ids.len();
        if self.documents.len() != n || self.embeddings.len() != n {
            return Err(StoreError::Validation(format!(
                "ids ({n}), documents ({}) and embeddings ({}) must have the same length",
                self.documents.len(),
                self.embeddings.len()
            )));
        }
        if !self.metadatas.is_empty() && self.metadatas.len() != n {
            return Err(StoreError::Validation(format!(
                "metadatas ({}) must be empty or match ids ({n})",
                self.metadatas.len()
            )));
        }
        let mut seen = HashSet::with_capacity(n);
        if let Some(duplicate) = self.ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(StoreError::Validation(format!("duplicate id {duplicate}")));
        }
        if let Some(dimension) = self.dimension() {
            if let Some((i, e)) = self
                .embeddings
                .iter()
                .enumerate()
                .find(|(_, e)| e.len() != dimension)
            {
                return Err(StoreError::Validation(format!(
                    "embedding for {} has {} dimensions, expected {dimension}",
                    self.ids[i],
                    e.len()
                )));
            }
        }
        Ok(())
    }

    /// Metadata column with one mapping per id
    pub fn metadatas_or_empty(&self) -> Vec<Metadata> {
        if self.metadatas.is_empty() {
            vec![Metadata::new(); self.ids.len()]
        } else {
            self.metadatas.clone()
        }
    }
}

// ============================================================================
// Query Results
// ============================================================================

/// One nearest-neighbour match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Metadata,
    /// Distance from the query vector (smaller is closer)
    pub distance: f32,
}

/// Matches in the order returned by the store (ascending distance)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub matches: Vec<QueryMatch>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryMatch> {
        self.matches.iter()
    }

    /// Document texts of all matches that carry one
    pub fn documents(&self) -> Vec<&str> {
        self.matches
            .iter()
            .filter_map(|m| m.document.as_deref())
            .collect()
    }

    pub fn distances(&self) -> Vec<f32> {
        self.matches.iter().map(|m| m.distance).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
