//! Shared fixtures for the ingestion and query tests

#![allow(dead_code)]

use async_trait::async_trait;
use kbseed_core::{Embedding, EmbeddingError, NoRetry, TextChunk, VideoRecord};
use kbseed_vector::testing::InMemoryChroma;
use kbseed_vector::{ChromaCollection, EmbeddingClient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub const BASE: &str = "https://chroma.test/api/v2";
pub const DIMENSION: usize = 3;

/// Deterministic embedder with per-text overrides and failures
pub struct FakeEmbedder {
    vectors: HashMap<String, Embedding>,
    failing: Vec<String>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` for exactly `text`
    pub fn with_vector(mut self, text: &str, vector: Embedding) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Fail with a provider error for any text containing `marker`
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.failing.push(marker.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), Instant::now()));

        if self.failing.iter().any(|marker| text.contains(marker.as_str())) {
            return Err(EmbeddingError::Status {
                status: 500,
                body: "inference failed".to_string(),
            });
        }
        if let Some(vector) = self.vectors.get(text) {
            return Ok(vector.clone());
        }

        let len = text.len() as f32;
        let first = text.bytes().next().unwrap_or(0) as f32;
        Ok(vec![len, first, 1.0])
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model(&self) -> &str {
        "fake-embedder"
    }
}

pub fn collection(store: &Arc<InMemoryChroma>, name: &str) -> Arc<ChromaCollection> {
    Arc::new(
        ChromaCollection::new(store.clone(), BASE, "ck", "tenant", "Prod", name)
            .with_retry_policy(Arc::new(NoRetry)),
    )
}

pub fn chunks(contents: &[&str]) -> Vec<TextChunk> {
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| TextChunk::new(*content, i as u32 + 1))
        .collect()
}

pub fn video(id: &str, title: &str, file: Option<&str>) -> VideoRecord {
    VideoRecord {
        id: id.to_string(),
        title: title.to_string(),
        content: format!("Transcript: {title}"),
        r2_file_name: file.map(str::to_string),
    }
}

pub fn no_videos() -> Vec<VideoRecord> {
    Vec::new()
}
