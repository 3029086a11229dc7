//! Elasticsearch [`Store`] over its REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | delete index | `DELETE /<index>` (404 means it did not exist) |
//! | create index | `PUT /<index>` with `{settings, mappings}` |
//! | bulk | `POST /_bulk` with an NDJSON body |
//! | refresh | `POST /<index>/_refresh` |
//! | count | `POST /<index>/_count` with a `query_string` query |
//! | list indices | `GET /_cat/indices?format=json&h=index` |
//!
//! Bulk actions use the typeless form `{"index": {"_index", "_id"}}`; the
//! document type is always `_doc`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use scan_indexer_core::store::{BulkItem, BulkOperation, BulkResponse, Store, StoreError};

pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
}

impl ElasticsearchStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        request.send().await.map_err(transport_error)
    }

    /// Fail with [`StoreError::Api`] on a non-success status.
    async fn json(&self, response: Response) -> Result<Value, StoreError> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Protocol(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Protocol(e.to_string())
    }
}

/// NDJSON bulk body: an action line followed by the document, for every
/// operation, with a trailing newline.
pub fn bulk_body(operations: &[BulkOperation]) -> String {
    let mut body = String::new();
    for op in operations {
        let action = json!({ "index": { "_index": op.index, "_id": op.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&op.document.to_string());
        body.push('\n');
    }
    body
}

/// Extract per-item outcomes from a `_bulk` response.
pub fn parse_bulk_response(value: &Value) -> Result<BulkResponse, StoreError> {
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Protocol("bulk response without items".to_string()))?;

    let mut response = BulkResponse {
        errors: value.get("errors").and_then(Value::as_bool).unwrap_or(false),
        items: Vec::with_capacity(items.len()),
    };
    for item in items {
        // Each item is keyed by its action name.
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        response.items.push(BulkItem {
            id: result
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status: result
                .get("status")
                .and_then(Value::as_u64)
                .unwrap_or_default() as u16,
            error: result.get("error").cloned(),
        });
    }
    Ok(response)
}

#[async_trait]
impl Store for ElasticsearchStore {
    async fn delete_index(&self, index: &str) -> Result<bool, StoreError> {
        let response = self.send(self.client.delete(self.url(index))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        self.json(response).await?;
        Ok(true)
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError> {
        let response = self
            .send(self.client.put(self.url(index)).json(body))
            .await?;
        self.json(response).await?;
        Ok(())
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, StoreError> {
        let body = bulk_body(operations);
        debug!(operations = operations.len(), bytes = body.len(), "POST _bulk");
        let response = self
            .send(
                self.client
                    .post(self.url("_bulk"))
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        let value = self.json(response).await?;
        parse_bulk_response(&value)
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        let response = self
            .send(self.client.post(self.url(&format!("{index}/_refresh"))))
            .await?;
        self.json(response).await?;
        Ok(())
    }

    async fn count(&self, index: &str, query: &str) -> Result<u64, StoreError> {
        let body = json!({ "query": { "query_string": { "query": query } } });
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("{index}/_count")))
                    .json(&body),
            )
            .await?;
        let value = self.json(response).await?;
        value
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Protocol("count response without count".to_string()))
    }

    async fn list_indices(&self) -> Result<Vec<String>, StoreError> {
        let response = self
            .send(self.client.get(self.url("_cat/indices?format=json&h=index")))
            .await?;
        let value = self.json(response).await?;
        let rows = value
            .as_array()
            .ok_or_else(|| StoreError::Protocol("_cat/indices did not return a list".into()))?;
        let mut names: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("index").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}
