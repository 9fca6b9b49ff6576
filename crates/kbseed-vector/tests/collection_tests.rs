//! Collection client tests against the in-memory Chroma store
//!
//! Author: hephaex@gmail.com

use kbseed_core::{DocumentBatch, HttpRequest, HttpTransport, Metadata, NoRetry, StoreError};
use kbseed_vector::testing::InMemoryChroma;
use kbseed_vector::{ChromaCollection, VectorCollection};
use serde_json::json;
use std::sync::Arc;

const BASE: &str = "https://chroma.test/api/v2";

fn client(store: &Arc<InMemoryChroma>, name: &str) -> ChromaCollection {
    ChromaCollection::new(store.clone(), BASE, "ck", "tenant", "Prod", name)
        .with_retry_policy(Arc::new(NoRetry))
}

fn batch(entries: &[(&str, Vec<f32>)]) -> DocumentBatch {
    let mut batch = DocumentBatch::new();
    for (id, embedding) in entries {
        batch.ids.push(id.to_string());
        batch.documents.push(format!("document {id}"));
        batch.embeddings.push(embedding.clone());
        batch.metadatas.push(Metadata::new());
    }
    batch
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_count_on_never_created_collection_is_zero() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");

    assert_eq!(faq.count().await, 0);
    assert!(!store.collection_exists("faq"));
}

#[tokio::test]
async fn test_query_on_never_created_collection_is_empty() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");

    let result = faq.query(&[0.1, 0.2], 4).await.unwrap();

    assert!(result.is_empty());
}

#[tokio::test]
async fn test_ensure_collection_is_idempotent() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");

    let first = faq.ensure_collection().await.unwrap();
    let second = faq.ensure_collection().await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_concurrent_first_use_creates_one_collection() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let a = client(&store, "faq");
    let b = client(&store, "faq");

    let (id_a, id_b) = tokio::join!(a.ensure_collection(), b.ensure_collection());

    assert_eq!(id_a.unwrap(), id_b.unwrap());
}

#[tokio::test]
async fn test_collections_are_isolated_by_name() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");
    let videos = client(&store, "videos");

    faq.insert_batch(&batch(&[("a", vec![0.0])])).await.unwrap();

    assert_eq!(faq.count().await, 1);
    assert_eq!(videos.count().await, 0);
}

// =============================================================================
// Full replace
// =============================================================================

#[tokio::test]
async fn test_clear_then_insert_counts_exactly_the_batch() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    for i in 0..7 {
        store.insert_record("faq", &format!("old_{i}"), "stale", vec![i as f32]);
    }
    let faq = client(&store, "faq");

    let deleted = faq.clear_collection().await.unwrap();
    let new_batch = batch(&[("a", vec![1.0]), ("b", vec![2.0]), ("c", vec![3.0])]);
    faq.insert_batch(&new_batch).await.unwrap();

    assert_eq!(deleted, 7);
    assert_eq!(faq.count().await, new_batch.len());
    assert_eq!(store.ids("faq"), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_clear_empty_collection_skips_delete() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    store.create_collection("faq");
    let faq = client(&store, "faq");

    let deleted = faq.clear_collection().await.unwrap();

    assert_eq!(deleted, 0);
    assert!(!store.request_log().iter().any(|line| line.ends_with("/delete")));
}

#[tokio::test]
async fn test_clear_surfaces_store_failure() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    store.insert_record("faq", "a", "doc", vec![0.0]);
    let faq = client(&store, "faq");
    store.fail_next(500);

    let err = faq.clear_collection().await.unwrap_err();

    assert!(matches!(err, StoreError::Status { status: 500, .. }));
    assert_eq!(store.ids("faq"), vec!["a"]);
}

#[tokio::test]
async fn test_duplicate_ids_rejected_before_upload() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");

    let err = faq
        .insert_batch(&batch(&[("a", vec![1.0]), ("a", vec![2.0])]))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.request_log().is_empty());
}

#[tokio::test]
async fn test_store_rejects_duplicate_ids_in_add() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let id = store.create_collection("faq");
    let url = format!("{BASE}/tenants/tenant/databases/Prod/collections/{id}/add");
    let body = json!({
        "ids": ["a", "a"],
        "documents": ["first", "second"],
        "embeddings": [[1.0], [2.0]],
    });

    let response = store.execute(HttpRequest::post(url, body)).await.unwrap();

    assert_eq!(response.status, 400);
    assert!(store.ids("faq").is_empty());
}

// =============================================================================
// Query
// =============================================================================

#[tokio::test]
async fn test_query_orders_by_ascending_distance() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");
    // squared distances from the origin: 0.9, 0.1, 0.5
    faq.insert_batch(&batch(&[
        ("far", vec![0.9f32.sqrt()]),
        ("near", vec![0.1f32.sqrt()]),
        ("mid", vec![0.5f32.sqrt()]),
    ]))
    .await
    .unwrap();

    let result = faq.query(&[0.0], 3).await.unwrap();

    let ids: Vec<_> = result.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["near", "mid", "far"]);
    let distances = result.distances();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert!((distances[0] - 0.1).abs() < 1e-5);
    assert!((distances[2] - 0.9).abs() < 1e-5);
}

#[tokio::test]
async fn test_query_returns_documents_and_metadata() {
    let store = Arc::new(InMemoryChroma::new(BASE));
    let faq = client(&store, "faq");
    let mut entries = batch(&[("a", vec![1.0, 0.0])]);
    entries.metadatas[0].insert("type".to_string(), "text".into());
    faq.insert_batch(&entries).await.unwrap();

    let result = faq.query(&[1.0, 0.0], 4).await.unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.matches[0].document.as_deref(), Some("document a"));
    assert_eq!(result.matches[0].metadata["type"].as_str(), Some("text"));
    assert_eq!(result.matches[0].distance, 0.0);
}
