//! Embedding client for generating vector representations
//!
//! Calls the Hugging Face feature-extraction pipeline. The endpoint answers
//! either with one sentence vector or with one vector per token; the latter
//! is mean-pooled so callers always get a single vector.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use kbseed_core::transport::execute_with_backoff;
use kbseed_core::{
    BackoffPolicy, Embedding, EmbeddingConfig, EmbeddingError, FixedDelay, HttpRequest,
    HttpResponse, HttpTransport, KbError,
};
use ndarray::{Array2, Axis};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::ReqwestTransport;

/// Status the provider uses while a cold model is being loaded
const MODEL_LOADING_STATUS: u16 = 503;

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

// ============================================================================
// Hugging Face Embedding Client
// ============================================================================

/// Hugging Face feature-extraction client
pub struct HuggingFaceEmbedding {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    api_token: String,
    model: String,
    dimension: usize,
    cold_start: Arc<dyn BackoffPolicy>,
}

/// Either a sentence vector or one vector per token
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtractionResponse {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl HuggingFaceEmbedding {
    /// Create a new client
    ///
    /// `api_url` is the models base URL; the model id and pipeline path are
    /// appended to it.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        api_url: &str,
        api_token: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        let model = model.into();
        let endpoint = format!(
            "{}/{}/pipeline/feature-extraction",
            api_url.trim_end_matches('/'),
            model
        );

        Self {
            transport,
            endpoint,
            api_token: api_token.into(),
            model,
            dimension,
            cold_start: Arc::new(FixedDelay::cold_start(Duration::from_secs(20))),
        }
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, KbError> {
        let api_token = config.api_token.as_ref().ok_or_else(|| {
            kbseed_core::ConfigError::MissingRequired("HF_TOKEN".to_string())
        })?;
        let transport = ReqwestTransport::new(config.timeout())?;

        Ok(Self::new(
            Arc::new(transport),
            &config.api_url,
            api_token.clone(),
            config.model.clone(),
            config.dimension,
        )
        .with_cold_start_policy(Arc::new(FixedDelay::cold_start(
            config.cold_start_delay(),
        ))))
    }

    /// Replace the retry policy used for model-loading responses
    pub fn with_cold_start_policy(mut self, policy: Arc<dyn BackoffPolicy>) -> Self {
        self.cold_start = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn normalize(&self, response: &HttpResponse) -> Result<Embedding, EmbeddingError> {
        let parsed: FeatureExtractionResponse = response
            .parse_json()
            .map_err(|_| EmbeddingError::UnexpectedShape(response.body_excerpt()))?;

        let embedding = match parsed {
            FeatureExtractionResponse::Flat(vector) => vector,
            FeatureExtractionResponse::Nested(tokens) => {
                tracing::debug!(tokens = tokens.len(), "Mean pooling token embeddings");
                mean_pool(&tokens)?
            }
        };

        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingClient for HuggingFaceEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let request = HttpRequest::post(
            &self.endpoint,
            json!({
                "inputs": text,
                "options": {
                    "wait_for_model": true,
                    "use_cache": true
                }
            }),
        )
        .with_header("Authorization", format!("Bearer {}", self.api_token));

        let response = execute_with_backoff(
            self.transport.as_ref(),
            &request,
            self.cold_start.as_ref(),
            |outcome| matches!(outcome, Ok(r) if r.status == MODEL_LOADING_STATUS),
        )
        .await?;

        match response.status {
            200..=299 => self.normalize(&response),
            MODEL_LOADING_STATUS => Err(EmbeddingError::ModelLoading),
            status => Err(EmbeddingError::Status {
                status,
                body: response.body_excerpt(),
            }),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Pooling
// ============================================================================

/// Element-wise mean over a sequence of equally sized vectors
pub fn mean_pool(vectors: &[Vec<f32>]) -> Result<Embedding, EmbeddingError> {
    let width = vectors
        .first()
        .map(Vec::len)
        .ok_or_else(|| EmbeddingError::UnexpectedShape("empty token sequence".to_string()))?;

    if let Some(row) = vectors.iter().position(|v| v.len() != width) {
        return Err(EmbeddingError::UnexpectedShape(format!(
            "token vector {row} has {} values, expected {width}",
            vectors[row].len()
        )));
    }

    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let matrix = Array2::from_shape_vec((vectors.len(), width), flat)
        .map_err(|e| EmbeddingError::UnexpectedShape(e.to_string()))?;

    matrix
        .mean_axis(Axis(0))
        .map(|mean| mean.to_vec())
        .ok_or_else(|| EmbeddingError::UnexpectedShape("empty token sequence".to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use kbseed_core::NoRetry;
    use proptest::prelude::*;
    use serde_json::json;

    fn client(transport: Arc<ScriptedTransport>, dimension: usize) -> HuggingFaceEmbedding {
        HuggingFaceEmbedding::new(
            transport,
            "https://hf.test/models/",
            "hf_token",
            "sentence-transformers/all-MiniLM-L6-v2",
            dimension,
        )
    }

    #[test]
    fn test_endpoint_includes_model_and_pipeline() {
        let embedding = client(Arc::new(ScriptedTransport::new()), 384);
        assert_eq!(
            embedding.endpoint(),
            "https://hf.test/models/sentence-transformers/all-MiniLM-L6-v2/pipeline/feature-extraction"
        );
        assert_eq!(embedding.dimension(), 384);
    }

    #[test]
    fn test_mean_pool_two_tokens() {
        let pooled = mean_pool(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(pooled, vec![2.0, 4.0]);
    }

    #[test]
    fn test_mean_pool_rejects_ragged_rows() {
        let err = mean_pool(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, EmbeddingError::UnexpectedShape(_)));
    }

    #[test]
    fn test_mean_pool_rejects_empty() {
        assert!(mean_pool(&[]).is_err());
    }

    proptest! {
        #[test]
        fn prop_mean_pool_matches_pairwise_average(
            pairs in prop::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 1..32)
        ) {
            let a: Vec<f32> = pairs.iter().map(|p| p.0).collect();
            let b: Vec<f32> = pairs.iter().map(|p| p.1).collect();
            let pooled = mean_pool(&[a.clone(), b.clone()]).unwrap();

            prop_assert_eq!(pooled.len(), a.len());
            for i in 0..a.len() {
                prop_assert!((pooled[i] - (a[i] + b[i]) / 2.0).abs() < 1e-3);
            }
        }
    }

    #[tokio::test]
    async fn test_flat_response_returned_as_is() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!([0.1, 0.2, 0.3]));

        let embedding = client(transport.clone(), 3).embed("hello").await.unwrap();

        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
        let request = &transport.requests()[0];
        assert_eq!(request.header("Authorization"), Some("Bearer hf_token"));
        assert_eq!(request.body.as_ref().unwrap()["inputs"], "hello");
        assert_eq!(request.body.as_ref().unwrap()["options"]["wait_for_model"], true);
    }

    #[tokio::test]
    async fn test_nested_response_is_mean_pooled() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!([[1.0, 2.0], [3.0, 4.0]]));

        let embedding = client(transport, 2).embed("hello").await.unwrap();

        assert_eq!(embedding, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_object_response_is_unexpected_shape() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!({"error": "bad input"}));

        let err = client(transport, 2).embed("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::UnexpectedShape(_)));
    }

    #[tokio::test]
    async fn test_dimension_checked_after_pooling() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!([[1.0, 2.0], [3.0, 4.0]]));

        let err = client(transport, 384).embed("hello").await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { expected: 384, actual: 2 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_then_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(503, "{\"error\":\"Model is currently loading\"}");
        transport.push_json(200, json!([0.5, 0.5]));
        let started = tokio::time::Instant::now();

        let embedding = client(transport.clone(), 2).embed("hello").await.unwrap();

        assert_eq!(embedding, vec![0.5, 0.5]);
        assert_eq!(transport.request_count(), 2);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_cold_starts_fail_without_second_retry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(503, "loading");
        transport.push_response(503, "loading");
        transport.push_json(200, json!([0.5, 0.5]));

        let err = client(transport.clone(), 2).embed("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::ModelLoading));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_other_status_is_terminal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(429, "rate limited");
        transport.push_json(200, json!([0.5, 0.5]));

        let err = client(transport.clone(), 2).embed("hello").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Status { status: 429, .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cold_start_policy_is_pluggable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(503, "loading");

        let err = client(transport.clone(), 2)
            .with_cold_start_policy(Arc::new(NoRetry))
            .embed("hello")
            .await
            .unwrap_err();

        assert!(matches!(err, EmbeddingError::ModelLoading));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_rejected_locally() {
        let transport = Arc::new(ScriptedTransport::new());

        let err = client(transport.clone(), 2).embed("   ").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::EmptyInput));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!([1.0, 0.0]));
        transport.push_json(200, json!([0.0, 1.0]));

        let embeddings = client(transport, 2)
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
