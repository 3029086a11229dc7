//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Mirrors the store semantics the pipeline relies on: documents are keyed
//! by id (a repeated id overwrites), bulk writes become visible to
//! [`count`](Store::count) only after [`refresh`](Store::refresh), and
//! deleting a missing index reports `false` rather than failing.
//!
//! Query strings support a small subset of the query-string syntax:
//! `*`, `field:*` (field present), and `field:value` (exact match, any
//! element for arrays). Whitespace-separated terms are AND-ed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{BulkItem, BulkOperation, BulkResponse, Store, StoreError};

#[derive(Default)]
struct StoredIndex {
    body: Value,
    visible: BTreeMap<String, Value>,
    pending: BTreeMap<String, Value>,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    indices: RwLock<BTreeMap<String, StoredIndex>>,
    bulk_calls: RwLock<Vec<usize>>,
    rejected_ids: RwLock<BTreeSet<String>>,
    calls: AtomicUsize,
    unreachable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(BTreeMap::new()),
            bulk_calls: RwLock::new(Vec::new()),
            rejected_ids: RwLock::new(BTreeSet::new()),
            calls: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Connection`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Reject any bulk item carrying this document id.
    pub fn reject_id(&self, id: &str) {
        self.rejected_ids.write().unwrap().insert(id.to_string());
    }

    /// Total number of store calls made so far, of any kind.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of operations in each bulk call, in call order.
    pub fn bulk_call_sizes(&self) -> Vec<usize> {
        self.bulk_calls.read().unwrap().clone()
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indices.read().unwrap().contains_key(index)
    }

    /// The creation body an index was created with.
    pub fn index_body(&self, index: &str) -> Option<Value> {
        self.indices
            .read()
            .unwrap()
            .get(index)
            .map(|stored| stored.body.clone())
    }

    /// A written document, refreshed or not.
    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        let indices = self.indices.read().unwrap();
        let stored = indices.get(index)?;
        stored
            .pending
            .get(id)
            .or_else(|| stored.visible.get(id))
            .cloned()
    }

    /// Ids of all written documents in an index, refreshed or not.
    pub fn document_ids(&self, index: &str) -> Vec<String> {
        let indices = self.indices.read().unwrap();
        let Some(stored) = indices.get(index) else {
            return Vec::new();
        };
        let mut ids: BTreeSet<String> = stored.visible.keys().cloned().collect();
        ids.extend(stored.pending.keys().cloned());
        ids.into_iter().collect()
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "in-memory store marked unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|v| value_matches(v, expected)),
        Value::Null => false,
        other => other.to_string() == expected,
    }
}

fn term_matches(doc: &Value, term: &str) -> bool {
    if term == "*" {
        return true;
    }
    let Some((field, expected)) = term.split_once(':') else {
        // Bare term: match against any string field.
        return doc
            .as_object()
            .map(|obj| obj.values().any(|v| value_matches(v, term)))
            .unwrap_or(false);
    };
    match doc.get(field) {
        None | Some(Value::Null) => false,
        Some(_) if expected == "*" => true,
        Some(value) => value_matches(value, expected.trim_matches('"')),
    }
}

/// Whether `doc` matches every whitespace-separated term of `query`.
pub(crate) fn matches_query(doc: &Value, query: &str) -> bool {
    query
        .split_whitespace()
        .filter(|term| *term != "AND")
        .all(|term| term_matches(doc, term))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn delete_index(&self, index: &str) -> Result<bool, StoreError> {
        self.enter()?;
        Ok(self.indices.write().unwrap().remove(index).is_some())
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError> {
        self.enter()?;
        let mut indices = self.indices.write().unwrap();
        if indices.contains_key(index) {
            return Err(StoreError::Api {
                status: 400,
                body: format!("resource_already_exists_exception: index [{}]", index),
            });
        }
        indices.insert(
            index.to_string(),
            StoredIndex {
                body: body.clone(),
                ..StoredIndex::default()
            },
        );
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, StoreError> {
        self.enter()?;
        self.bulk_calls.write().unwrap().push(operations.len());

        let rejected = self.rejected_ids.read().unwrap();
        let mut indices = self.indices.write().unwrap();
        let mut response = BulkResponse::default();
        for op in operations {
            if rejected.contains(&op.id) {
                response.errors = true;
                response.items.push(BulkItem {
                    id: op.id.clone(),
                    status: 400,
                    error: Some(json!({
                        "type": "mapper_parsing_exception",
                        "reason": "document rejected by in-memory store",
                    })),
                });
                continue;
            }
            indices
                .entry(op.index.clone())
                .or_default()
                .pending
                .insert(op.id.clone(), op.document.clone());
            response.items.push(BulkItem {
                id: op.id.clone(),
                status: 201,
                error: None,
            });
        }
        Ok(response)
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        self.enter()?;
        let mut indices = self.indices.write().unwrap();
        let stored = indices.get_mut(index).ok_or_else(|| StoreError::Api {
            status: 404,
            body: format!("index_not_found_exception: no such index [{}]", index),
        })?;
        let pending = std::mem::take(&mut stored.pending);
        stored.visible.extend(pending);
        Ok(())
    }

    async fn count(&self, index: &str, query: &str) -> Result<u64, StoreError> {
        self.enter()?;
        let indices = self.indices.read().unwrap();
        let stored = indices.get(index).ok_or_else(|| StoreError::Api {
            status: 404,
            body: format!("index_not_found_exception: no such index [{}]", index),
        })?;
        Ok(stored
            .visible
            .values()
            .filter(|doc| matches_query(doc, query))
            .count() as u64)
    }

    async fn list_indices(&self) -> Result<Vec<String>, StoreError> {
        self.enter()?;
        Ok(self.indices.read().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(index: &str, id: &str, doc: Value) -> BulkOperation {
        BulkOperation {
            index: index.to_string(),
            id: id.to_string(),
            document: doc,
        }
    }

    #[tokio::test]
    async fn same_id_overwrites() {
        let store = InMemoryStore::new();
        store.create_index("finding_nmap_p", &json!({})).await.unwrap();
        store
            .bulk(&[op("finding_nmap_p", "a", json!({"v": 1}))])
            .await
            .unwrap();
        store
            .bulk(&[op("finding_nmap_p", "a", json!({"v": 2}))])
            .await
            .unwrap();
        store.refresh("finding_nmap_p").await.unwrap();

        assert_eq!(store.document_ids("finding_nmap_p"), vec!["a"]);
        assert_eq!(store.document("finding_nmap_p", "a").unwrap()["v"], 2);
        assert_eq!(store.count("finding_nmap_p", "*").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn writes_invisible_until_refresh() {
        let store = InMemoryStore::new();
        store.create_index("host_nmap_p", &json!({})).await.unwrap();
        store
            .bulk(&[op("host_nmap_p", "h1", json!({"ip": "10.0.0.1"}))])
            .await
            .unwrap();
        assert_eq!(store.count("host_nmap_p", "ip:*").await.unwrap(), 0);
        store.refresh("host_nmap_p").await.unwrap();
        assert_eq!(store.count("host_nmap_p", "ip:*").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_missing_index_is_not_an_error() {
        let store = InMemoryStore::new();
        assert!(!store.delete_index("nope").await.unwrap());
        store.create_index("yes", &json!({})).await.unwrap();
        assert!(store.delete_index("yes").await.unwrap());
    }

    #[tokio::test]
    async fn rejected_ids_report_item_errors() {
        let store = InMemoryStore::new();
        store.reject_id("bad");
        let resp = store
            .bulk(&[
                op("i", "good", json!({})),
                op("i", "bad", json!({})),
            ])
            .await
            .unwrap();
        assert!(resp.errors);
        assert_eq!(resp.first_error().unwrap().id, "bad");
        assert!(store.document("i", "good").is_some());
        assert!(store.document("i", "bad").is_none());
    }

    #[tokio::test]
    async fn unreachable_store_fails_with_connection_error() {
        let store = InMemoryStore::new();
        store.set_unreachable(true);
        let err = store.list_indices().await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(store.call_count(), 1);
    }

    #[test]
    fn query_subset() {
        let doc = json!({"name": "TLS1_2", "port": 443, "cve": ["CVE-1", "CVE-2"], "empty": null});
        assert!(matches_query(&doc, "*"));
        assert!(matches_query(&doc, "name:TLS1_2"));
        assert!(!matches_query(&doc, "name:TLS1"));
        assert!(matches_query(&doc, "port:443"));
        assert!(matches_query(&doc, "cve:CVE-2"));
        assert!(matches_query(&doc, "name:* AND port:443"));
        assert!(!matches_query(&doc, "empty:*"));
        assert!(!matches_query(&doc, "missing:*"));
    }
}
