//! Chroma implementation for vector storage
//!
//! Talks to the Chroma v2 REST API for one tenant/database/collection.
//! The collection is addressed by name for lookup and creation and by its
//! server-assigned id for everything else; the id is resolved again for
//! every operation and never cached.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use kbseed_core::transport::execute_with_backoff;
use kbseed_core::{
    BackoffPolicy, DocumentBatch, ExponentialBackoff, HttpRequest, HttpResponse, HttpTransport,
    KbError, Metadata, QueryMatch, QueryResult, StoreConfig, StoreError,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::ReqwestTransport;

const TOKEN_HEADER: &str = "X-Chroma-Token";

/// Client for a single Chroma collection
pub struct ChromaCollection {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    api_key: String,
    tenant: String,
    database: String,
    name: String,
    description: String,
    retry: Arc<dyn BackoffPolicy>,
}

#[derive(Debug, Deserialize)]
struct CollectionModel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
}

/// Query results, one inner list per query embedding
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl QueryResponse {
    /// Flatten the results of the first (only) query
    fn into_result(self) -> Result<QueryResult, StoreError> {
        let Some(ids) = self.ids.into_iter().next() else {
            return Ok(QueryResult::empty());
        };
        let documents = first_row(self.documents);
        let metadatas = first_row(self.metadatas);
        let distances = first_row(self.distances);

        let matches = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let distance = distances.get(i).copied().flatten().ok_or_else(|| {
                    StoreError::Decode {
                        operation: "query",
                        message: format!("missing distance for {id}"),
                    }
                })?;

                Ok(QueryMatch {
                    document: documents.get(i).cloned().flatten(),
                    metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
                    distance,
                    id,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(QueryResult { matches })
    }
}

fn first_row<T>(column: Option<Vec<Vec<T>>>) -> Vec<T> {
    column
        .and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
}

impl ChromaCollection {
    /// Create a new collection client
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        api_key: impl Into<String>,
        tenant: impl Into<String>,
        database: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            tenant: tenant.into(),
            database: database.into(),
            name: name.into(),
            description: String::new(),
            retry: Arc::new(ExponentialBackoff::default()),
        }
    }

    /// Create from config
    pub fn from_config(config: &StoreConfig) -> Result<Self, KbError> {
        let api_key = config.api_key.as_ref().ok_or_else(|| {
            kbseed_core::ConfigError::MissingRequired("CHROMA_API_KEY".to_string())
        })?;
        let tenant = config.tenant.as_ref().ok_or_else(|| {
            kbseed_core::ConfigError::MissingRequired("CHROMA_TENANT".to_string())
        })?;
        let transport = ReqwestTransport::new(config.timeout())?;

        Ok(Self::new(
            Arc::new(transport),
            &config.api_url,
            api_key.clone(),
            tenant.clone(),
            config.database.clone(),
            config.collection.clone(),
        )
        .with_description(config.collection_description.clone())
        .with_retry_policy(Arc::new(ExponentialBackoff::new(
            Duration::from_millis(config.retry_base_ms),
            Duration::from_secs(8),
            config.max_retries,
        ))))
    }

    /// Description stored in the collection metadata on creation
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the retry policy for transient failures
    pub fn with_retry_policy(mut self, policy: Arc<dyn BackoffPolicy>) -> Self {
        self.retry = policy;
        self
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }

    fn collection_url(&self, collection_id: &str, action: &str) -> String {
        format!("{}/{}/{}", self.collections_url(), collection_id, action)
    }

    /// Send with the auth header, retrying rate limits, 5xx and transport errors
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StoreError> {
        let request = request.with_header(TOKEN_HEADER, self.api_key.clone());
        let response = execute_with_backoff(
            self.transport.as_ref(),
            &request,
            self.retry.as_ref(),
            |outcome| match outcome {
                Ok(response) => response.is_transient(),
                Err(_) => true,
            },
        )
        .await?;

        Ok(response)
    }

    async fn create_collection(&self) -> Result<String, StoreError> {
        let body = json!({
            "name": self.name,
            "metadata": { "description": self.description },
            "get_or_create": true
        });
        let response = self
            .send(HttpRequest::post(self.collections_url(), body))
            .await?;
        let response = expect_success("create collection", response)?;
        let model: CollectionModel = decode("create collection", &response)?;

        tracing::info!(collection = %self.name, id = %model.id, "Created collection");
        Ok(model.id)
    }

    async fn try_count(&self) -> Result<usize, StoreError> {
        use super::VectorCollection;

        let Some(collection_id) = self.resolve_collection_id().await? else {
            return Ok(0);
        };
        let response = self
            .send(HttpRequest::get(self.collection_url(&collection_id, "count")))
            .await?;
        let response = expect_success("count", response)?;
        decode("count", &response)
    }
}

fn expect_success(
    operation: &'static str,
    response: HttpResponse,
) -> Result<HttpResponse, StoreError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(StoreError::Status {
            operation,
            status: response.status,
            body: response.body_excerpt(),
        })
    }
}

fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: &HttpResponse,
) -> Result<T, StoreError> {
    response.parse_json().map_err(|e| StoreError::Decode {
        operation,
        message: e.to_string(),
    })
}

#[async_trait]
impl super::VectorCollection for ChromaCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_collection_id(&self) -> Result<Option<String>, StoreError> {
        let url = format!("{}/{}", self.collections_url(), self.name);
        let response = self.send(HttpRequest::get(url)).await?;

        if response.status == 404 {
            return Ok(None);
        }
        let response = expect_success("get collection", response)?;
        let model: CollectionModel = decode("get collection", &response)?;
        Ok(Some(model.id))
    }

    async fn ensure_collection(&self) -> Result<String, StoreError> {
        match self.resolve_collection_id().await? {
            Some(id) => Ok(id),
            None => {
                tracing::info!(collection = %self.name, "Collection not found, creating");
                self.create_collection().await
            }
        }
    }

    async fn insert_batch(&self, batch: &DocumentBatch) -> Result<usize, StoreError> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let collection_id = self.ensure_collection().await?;
        let body = json!({
            "ids": batch.ids,
            "documents": batch.documents,
            "embeddings": batch.embeddings,
            "metadatas": batch.metadatas_or_empty(),
        });

        let response = self
            .send(HttpRequest::post(self.collection_url(&collection_id, "add"), body))
            .await?;
        expect_success("add documents", response)?;

        tracing::info!(collection = %self.name, count = batch.len(), "Inserted batch");
        Ok(batch.len())
    }

    async fn clear_collection(&self) -> Result<usize, StoreError> {
        let Some(collection_id) = self.resolve_collection_id().await? else {
            tracing::info!(
                collection = %self.name,
                "Collection does not exist yet, nothing to clear"
            );
            return Ok(0);
        };

        let response = self
            .send(HttpRequest::post(
                self.collection_url(&collection_id, "get"),
                json!({ "include": [] }),
            ))
            .await?;
        let response = expect_success("get ids", response)?;
        let existing: GetResponse = decode("get ids", &response)?;

        if existing.ids.is_empty() {
            tracing::info!(collection = %self.name, "Collection is already empty");
            return Ok(0);
        }

        let deleted = existing.ids.len();
        let response = self
            .send(HttpRequest::post(
                self.collection_url(&collection_id, "delete"),
                json!({ "ids": existing.ids }),
            ))
            .await?;
        expect_success("delete documents", response)?;

        tracing::info!(collection = %self.name, deleted, "Cleared collection");
        Ok(deleted)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<QueryResult, StoreError> {
        if k == 0 {
            return Ok(QueryResult::empty());
        }

        let collection_id = self.ensure_collection().await?;
        let body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"]
        });

        let response = self
            .send(HttpRequest::post(self.collection_url(&collection_id, "query"), body))
            .await?;
        let response = expect_success("query", response)?;
        let parsed: QueryResponse = decode("query", &response)?;

        parsed.into_result()
    }

    async fn count(&self) -> usize {
        self.try_count().await.unwrap_or_else(|e| {
            tracing::warn!(collection = %self.name, error = %e, "Could not get collection count");
            0
        })
    }
}
