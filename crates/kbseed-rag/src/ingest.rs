//! Full-replace ingestion
//!
//! A run loads every text chunk and video record, embeds them one at a
//! time behind a shared [`Throttle`], and replaces the contents of the
//! collection with everything that embedded successfully.
//!
//! With [`ClearPolicy::Eager`] the collection is cleared before the first
//! embedding call, so readers see an empty or partial collection until the
//! insert lands. [`ClearPolicy::Staged`] clears only once there is a batch
//! ready to upload. Neither policy serializes concurrent reseeds.
//!
//! Author: hephaex@gmail.com

use chrono::{DateTime, Utc};
use kbseed_core::{
    ClearPolicy, Document, DocumentBatch, EmbeddingError, IngestConfig, IngestionError,
    SourceType, TextChunk, VideoRecord,
};
use kbseed_vector::{EmbeddingClient, VectorCollection};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::source::{ChunkSource, VideoSource};

const TEXT_PREVIEW_CHARS: usize = 50;
const TITLE_PREVIEW_CHARS: usize = 40;

// ============================================================================
// Throttle
// ============================================================================

/// Fixed minimum spacing between calls, shared by every caller
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until at least `interval` has passed since the previous call
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.interval).await;
        }
        *last = Some(Instant::now());
    }
}

// ============================================================================
// Options and report
// ============================================================================

/// Settings for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// `source` metadata for text chunks
    pub text_source_name: String,

    /// `source` metadata for videos
    pub video_source_name: String,

    pub clear_policy: ClearPolicy,

    /// Minimum spacing between embedding calls
    pub throttle: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            text_source_name: config.text_source_name.clone(),
            video_source_name: config.video_source_name.clone(),
            clear_policy: config.clear_policy,
            throttle: config.throttle(),
        }
    }
}

/// A document left out of the upload
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub id: String,
    pub reason: String,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    /// Text chunks plus videos loaded
    pub total_inputs: usize,

    /// Records removed by the clear step
    pub cleared: usize,

    /// Documents sent in the insert batch
    pub uploaded: usize,

    /// Count reported by the store after the insert
    pub verified_count: usize,

    pub skipped: Vec<SkippedDocument>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    /// Whether the store count matches what was uploaded
    pub fn is_verified(&self) -> bool {
        self.uploaded == self.verified_count
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Build the documents for a run, text chunks first, in input order
pub fn build_documents(
    chunks: &[TextChunk],
    videos: &[VideoRecord],
    options: &IngestOptions,
) -> Vec<Document> {
    let text = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| Document::from_chunk(i, chunk, &options.text_source_name));
    let video = videos
        .iter()
        .map(|v| Document::from_video(v, &options.video_source_name));

    text.chain(video).collect()
}

/// Keep the first document for each id; later ones are reported as skipped
fn drop_duplicate_ids(documents: Vec<Document>) -> (Vec<Document>, Vec<SkippedDocument>) {
    let mut seen = HashSet::new();
    let mut skipped = Vec::new();
    let mut kept = Vec::with_capacity(documents.len());

    for document in documents {
        if seen.insert(document.id.clone()) {
            kept.push(document);
        } else {
            tracing::warn!(id = %document.id, "Skipping document with duplicate id");
            skipped.push(SkippedDocument {
                id: document.id,
                reason: "duplicate id".to_string(),
            });
        }
    }

    (kept, skipped)
}

/// Short label for progress lines
fn preview(document: &Document) -> String {
    match document.source_type {
        SourceType::Text => document.content.chars().take(TEXT_PREVIEW_CHARS).collect(),
        SourceType::Video => document
            .metadata
            .get("video_title")
            .and_then(|title| title.as_str())
            .unwrap_or_default()
            .chars()
            .take(TITLE_PREVIEW_CHARS)
            .collect(),
    }
}

/// Reseeds one collection from chunk and video sources
pub struct IngestionOrchestrator {
    embedder: Arc<dyn EmbeddingClient>,
    collection: Arc<dyn VectorCollection>,
    options: IngestOptions,
    throttle: Arc<Throttle>,
}

impl IngestionOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        collection: Arc<dyn VectorCollection>,
        options: IngestOptions,
    ) -> Self {
        let throttle = Arc::new(Throttle::new(options.throttle));
        Self {
            embedder,
            collection,
            options,
            throttle,
        }
    }

    /// Share a throttle with other embedding callers
    pub fn with_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Run a full reseed
    pub async fn run(
        &self,
        chunks: &dyn ChunkSource,
        videos: &dyn VideoSource,
    ) -> Result<IngestionReport, IngestionError> {
        let started_at = Utc::now();

        let chunks = chunks.load_chunks().await?;
        let videos = videos.load_videos().await?;
        let documents = build_documents(&chunks, &videos, &self.options);
        let total_inputs = documents.len();
        let (documents, duplicates) = drop_duplicate_ids(documents);

        tracing::info!(
            collection = %self.collection.name(),
            model = %self.embedder.model(),
            chunks = chunks.len(),
            videos = videos.len(),
            policy = ?self.options.clear_policy,
            "Starting ingestion"
        );

        let mut cleared = 0;
        if self.options.clear_policy == ClearPolicy::Eager {
            cleared = self.collection.clear_collection().await?;
        }

        let (batch, failed) = self.embed_all(documents).await?;
        let skipped: Vec<_> = duplicates.into_iter().chain(failed).collect();
        if batch.is_empty() {
            tracing::error!(attempted = total_inputs, "No documents were embedded");
            return Err(IngestionError::NoDocuments {
                attempted: total_inputs,
            });
        }

        if self.options.clear_policy == ClearPolicy::Staged {
            cleared = self.collection.clear_collection().await?;
        }

        let uploaded = self.collection.insert_batch(&batch).await?;
        let verified_count = self.collection.count().await;

        let report = IngestionReport {
            total_inputs,
            cleared,
            uploaded,
            verified_count,
            skipped,
            started_at,
            finished_at: Utc::now(),
        };

        if report.is_verified() {
            tracing::info!(
                uploaded,
                verified = verified_count,
                skipped = report.skipped.len(),
                "Ingestion complete"
            );
        } else {
            tracing::warn!(
                uploaded,
                verified = verified_count,
                "Store count does not match uploaded documents"
            );
        }

        Ok(report)
    }

    /// Embed every document; per-item failures are skipped
    async fn embed_all(
        &self,
        documents: Vec<Document>,
    ) -> Result<(DocumentBatch, Vec<SkippedDocument>), IngestionError> {
        let total = documents.len();
        let expected = self.embedder.dimension();
        let mut batch = DocumentBatch::new();
        let mut skipped = Vec::new();

        for (i, document) in documents.into_iter().enumerate() {
            tracing::info!(
                "[{}/{}] Embedding {}: {}",
                i + 1,
                total,
                document.id,
                preview(&document)
            );

            self.throttle.wait().await;
            match self.embedder.embed(&document.content).await {
                Ok(embedding) if embedding.len() != expected => {
                    return Err(IngestionError::DimensionMismatch {
                        id: document.id,
                        expected,
                        actual: embedding.len(),
                    });
                }
                Ok(embedding) => batch.push(document, embedding),
                Err(EmbeddingError::DimensionMismatch { expected, actual }) => {
                    return Err(IngestionError::DimensionMismatch {
                        id: document.id,
                        expected,
                        actual,
                    });
                }
                Err(e) => {
                    tracing::warn!(id = %document.id, error = %e, "Skipping document");
                    skipped.push(SkippedDocument {
                        id: document.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok((batch, skipped))
    }
}
