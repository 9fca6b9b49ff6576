//! Ingestion inputs
//!
//! Text chunks come from an external document loader as a JSON array of
//! `{content, page}` records; videos come from a JSON manifest.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use kbseed_core::{IngestionError, TextChunk, VideoRecord};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Supplies pre-chunked text
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn load_chunks(&self) -> Result<Vec<TextChunk>, IngestionError>;
}

/// Supplies video records
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn load_videos(&self) -> Result<Vec<VideoRecord>, IngestionError>;
}

#[async_trait]
impl ChunkSource for Vec<TextChunk> {
    async fn load_chunks(&self) -> Result<Vec<TextChunk>, IngestionError> {
        Ok(self.clone())
    }
}

#[async_trait]
impl VideoSource for Vec<VideoRecord> {
    async fn load_videos(&self) -> Result<Vec<VideoRecord>, IngestionError> {
        Ok(self.clone())
    }
}

// ============================================================================
// JSON files
// ============================================================================

/// Chunk file written by the document loader
#[derive(Debug, Clone)]
pub struct JsonChunkFile {
    path: PathBuf,
}

impl JsonChunkFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ChunkSource for JsonChunkFile {
    async fn load_chunks(&self) -> Result<Vec<TextChunk>, IngestionError> {
        let chunks: Vec<TextChunk> = read_json_array(&self.path).await?;
        tracing::info!(path = %self.path.display(), count = chunks.len(), "Loaded text chunks");
        Ok(chunks)
    }
}

/// Video manifest; a missing file means no videos
#[derive(Debug, Clone)]
pub struct VideoManifestFile {
    path: PathBuf,
}

impl VideoManifestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VideoSource for VideoManifestFile {
    async fn load_videos(&self) -> Result<Vec<VideoRecord>, IngestionError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tracing::warn!(
                path = %self.path.display(),
                "Video manifest not found, continuing without videos"
            );
            return Ok(Vec::new());
        }

        let videos: Vec<VideoRecord> = read_json_array(&self.path).await?;
        tracing::info!(path = %self.path.display(), count = videos.len(), "Loaded videos");
        Ok(videos)
    }
}

async fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, IngestionError> {
    let source_error = |message: String| IngestionError::Source {
        name: path.display().to_string(),
        message,
    };

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| source_error(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| source_error(e.to_string()))
}
