//! Test doubles for the HTTP transport
//!
//! - [`ScriptedTransport`] replays queued responses and records requests.
//! - [`InMemoryChroma`] answers the subset of the Chroma v2 REST API used by
//!   [`crate::ChromaCollection`], keeping collections in memory.
//!
//! Enabled with the `test-utils` feature.

use async_trait::async_trait;
use kbseed_core::{
    Embedding, HttpMethod, HttpRequest, HttpResponse, HttpTransport, Metadata, TransportError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// Replays queued outcomes in order; fails once the queue is empty
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        lock(&self.responses).push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_json(&self, status: u16, body: Value) {
        lock(&self.responses).push_back(Ok(HttpResponse::json(status, &body)));
    }

    pub fn push_error(&self, error: TransportError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response".to_string())))
    }
}

// ============================================================================
// In-memory Chroma
// ============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    document: String,
    embedding: Embedding,
    metadata: Metadata,
}

#[derive(Debug, Default)]
struct StoredCollection {
    name: String,
    records: BTreeMap<String, StoredRecord>,
}

#[derive(Default)]
struct ChromaState {
    collections: BTreeMap<String, StoredCollection>,
    next_id: u64,
    injected_failures: VecDeque<u16>,
    log: Vec<String>,
}

impl ChromaState {
    fn id_for_name(&self, name: &str) -> Option<String> {
        self.collections
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| id.clone())
    }

    fn create(&mut self, name: &str) -> String {
        if let Some(id) = self.id_for_name(name) {
            return id;
        }
        self.next_id += 1;
        let id = format!("col-{}", self.next_id);
        self.collections.insert(
            id.clone(),
            StoredCollection {
                name: name.to_string(),
                ..Default::default()
            },
        );
        id
    }
}

#[derive(Deserialize)]
struct AddBody {
    ids: Vec<String>,
    documents: Vec<String>,
    embeddings: Vec<Embedding>,
    #[serde(default)]
    metadatas: Vec<Option<Metadata>>,
}

#[derive(Deserialize)]
struct DeleteBody {
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct QueryBody {
    query_embeddings: Vec<Embedding>,
    n_results: usize,
}

/// In-memory stand-in for a Chroma server
///
/// Distances are squared Euclidean, the store's default space.
pub struct InMemoryChroma {
    base_url: String,
    state: Mutex<ChromaState>,
}

impl InMemoryChroma {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            state: Mutex::new(ChromaState::default()),
        }
    }

    /// Create a collection directly, returning its id
    pub fn create_collection(&self, name: &str) -> String {
        lock(&self.state).create(name)
    }

    /// Seed a record directly, creating the collection if needed
    pub fn insert_record(&self, collection: &str, id: &str, document: &str, embedding: Embedding) {
        let mut state = lock(&self.state);
        let collection_id = state.create(collection);
        if let Some(stored) = state.collections.get_mut(&collection_id) {
            stored.records.insert(
                id.to_string(),
                StoredRecord {
                    document: document.to_string(),
                    embedding,
                    metadata: Metadata::new(),
                },
            );
        }
    }

    /// Ids stored in the named collection, sorted
    pub fn ids(&self, collection: &str) -> Vec<String> {
        let state = lock(&self.state);
        state
            .id_for_name(collection)
            .and_then(|id| state.collections.get(&id))
            .map(|c| c.records.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Metadata of one stored record
    pub fn metadata(&self, collection: &str, id: &str) -> Option<Metadata> {
        let state = lock(&self.state);
        let collection_id = state.id_for_name(collection)?;
        state
            .collections
            .get(&collection_id)?
            .records
            .get(id)
            .map(|r| r.metadata.clone())
    }

    pub fn collection_exists(&self, collection: &str) -> bool {
        lock(&self.state).id_for_name(collection).is_some()
    }

    /// Answer the next request with `status` instead of handling it
    pub fn fail_next(&self, status: u16) {
        lock(&self.state).injected_failures.push_back(status);
    }

    /// `"<METHOD> <path>"` for every request received
    pub fn request_log(&self) -> Vec<String> {
        lock(&self.state).log.clone()
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let path = request
            .url
            .strip_prefix(&self.base_url)
            .unwrap_or(&request.url)
            .to_string();

        let mut state = lock(&self.state);
        state.log.push(format!("{} {}", request.method, path));

        if let Some(status) = state.injected_failures.pop_front() {
            return HttpResponse::json(status, &json!({"error": "injected failure"}));
        }

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let body = request.body.clone().unwrap_or(Value::Null);

        match (request.method, segments.as_slice()) {
            (HttpMethod::Get, ["tenants", _, "databases", _, "collections", name]) => {
                match state.id_for_name(name) {
                    Some(id) => HttpResponse::json(200, &json!({"id": id, "name": name})),
                    None => not_found(),
                }
            }
            (HttpMethod::Post, ["tenants", _, "databases", _, "collections"]) => {
                let Some(name) = body.get("name").and_then(Value::as_str) else {
                    return bad_request("missing name");
                };
                let get_or_create = body
                    .get("get_or_create")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if !get_or_create && state.id_for_name(name).is_some() {
                    return HttpResponse::json(409, &json!({"error": "UniqueConstraintError"}));
                }
                let id = state.create(name);
                HttpResponse::json(200, &json!({"id": id, "name": name}))
            }
            (method, ["tenants", _, "databases", _, "collections", id, action]) => {
                let Some(collection) = state.collections.get_mut(*id) else {
                    return not_found();
                };
                match (method, *action) {
                    (HttpMethod::Post, "add") => add(collection, body),
                    (HttpMethod::Post, "get") => {
                        let ids: Vec<&String> = collection.records.keys().collect();
                        HttpResponse::json(200, &json!({"ids": ids}))
                    }
                    (HttpMethod::Post, "delete") => delete(collection, body),
                    (HttpMethod::Post, "query") => query(collection, body),
                    (HttpMethod::Get, "count") => {
                        HttpResponse::json(200, &json!(collection.records.len()))
                    }
                    _ => not_found(),
                }
            }
            _ => not_found(),
        }
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::json(404, &json!({"error": "NotFoundError"}))
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::json(400, &json!({"error": message}))
}

fn add(collection: &mut StoredCollection, body: Value) -> HttpResponse {
    let Ok(add) = serde_json::from_value::<AddBody>(body) else {
        return bad_request("malformed add body");
    };
    if add.documents.len() != add.ids.len() || add.embeddings.len() != add.ids.len() {
        return bad_request("column length mismatch");
    }
    let mut seen = HashSet::new();
    if add.ids.iter().any(|id| !seen.insert(id)) {
        return HttpResponse::json(
            400,
            &json!({"error": "DuplicateIDError", "message": "expected ids to be unique"}),
        );
    }

    let mut metadatas = add.metadatas.into_iter();
    let rows = add.ids.into_iter().zip(add.documents).zip(add.embeddings);
    for ((id, document), embedding) in rows {
        let metadata = metadatas.next().flatten().unwrap_or_default();
        collection.records.insert(
            id,
            StoredRecord {
                document,
                embedding,
                metadata,
            },
        );
    }
    HttpResponse::json(201, &json!(true))
}

fn delete(collection: &mut StoredCollection, body: Value) -> HttpResponse {
    let Ok(delete) = serde_json::from_value::<DeleteBody>(body) else {
        return bad_request("malformed delete body");
    };
    for id in &delete.ids {
        collection.records.remove(id);
    }
    HttpResponse::json(200, &json!({}))
}

fn query(collection: &StoredCollection, body: Value) -> HttpResponse {
    let Ok(query) = serde_json::from_value::<QueryBody>(body) else {
        return bad_request("malformed query body");
    };

    let mut ids = Vec::new();
    let mut documents = Vec::new();
    let mut metadatas = Vec::new();
    let mut distances = Vec::new();

    for embedding in &query.query_embeddings {
        let mut scored: Vec<(f32, &String, &StoredRecord)> = collection
            .records
            .iter()
            .map(|(id, record)| (squared_l2(embedding, &record.embedding), id, record))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(query.n_results);

        ids.push(scored.iter().map(|s| s.1.clone()).collect::<Vec<_>>());
        documents.push(scored.iter().map(|s| s.2.document.clone()).collect::<Vec<_>>());
        metadatas.push(scored.iter().map(|s| s.2.metadata.clone()).collect::<Vec<_>>());
        distances.push(scored.iter().map(|s| s.0).collect::<Vec<_>>());
    }

    HttpResponse::json(
        200,
        &json!({
            "ids": ids,
            "documents": documents,
            "metadatas": metadatas,
            "distances": distances,
        }),
    )
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[async_trait]
impl HttpTransport for InMemoryChroma {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.handle(&request))
    }
}
