//! Storage abstraction for scan-indexer.
//!
//! The [`Store`] trait is the subset of a document search engine the
//! pipeline needs: index lifecycle, bulk writes, refresh, and a
//! query-string count used by post-ingestion sanity checks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

/// Failure talking to the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached at all.
    #[error("unable to connect to store: {0}")]
    Connection(String),

    /// The store answered with a non-success status.
    #[error("store returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The store answered, but not in the shape we expected.
    #[error("unexpected store response: {0}")]
    Protocol(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// One `index` action of a bulk request: write `document` under `id`.
#[derive(Debug, Clone)]
pub struct BulkOperation {
    pub index: String,
    pub id: String,
    pub document: Value,
}

/// Per-item outcome of a bulk request.
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub id: String,
    pub status: u16,
    pub error: Option<Value>,
}

/// Bulk response: a flag telling whether any item failed, plus the items.
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// The first failed item, if the store reported any errors.
    pub fn first_error(&self) -> Option<&BulkItem> {
        if !self.errors {
            return None;
        }
        self.items.iter().find(|item| item.error.is_some())
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| item.error.is_some()).count()
    }
}

/// Abstract document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`delete_index`](Store::delete_index) | Drop an index; a missing index is not an error |
/// | [`create_index`](Store::create_index) | Create an index with settings and mappings |
/// | [`bulk`](Store::bulk) | Write a batch of documents with explicit ids |
/// | [`refresh`](Store::refresh) | Make recent writes visible to queries |
/// | [`count`](Store::count) | Count documents matching a query string |
/// | [`list_indices`](Store::list_indices) | Names of all existing indices |
#[async_trait]
pub trait Store: Send + Sync {
    /// Delete `index`. Returns `false` when it did not exist.
    async fn delete_index(&self, index: &str) -> Result<bool, StoreError>;

    /// Create `index` from a `{"settings", "mappings"}` body.
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError>;

    /// Issue one bulk write. Item-level failures are reported in the
    /// response, not as an `Err`.
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, StoreError>;

    async fn refresh(&self, index: &str) -> Result<(), StoreError>;

    /// Count documents in `index` matching a query-string query.
    async fn count(&self, index: &str, query: &str) -> Result<u64, StoreError>;

    async fn list_indices(&self) -> Result<Vec<String>, StoreError>;
}
